//! hawkBit Direct Device Integration (DDI) protocol support.
//!
//! [`types`] models the wire format, [`feedback`] builds the status payloads
//! sent back to the server, and [`client`] performs the actual HTTP traffic.
//! The [`DdiApi`] trait is the seam between the protocol layer and the agent
//! logic; production code uses [`DdiClient`], tests substitute mocks.

pub mod client;
pub mod feedback;
pub mod types;

pub use client::{DdiClient, DdiError, DownloadOutcome, TransportError, TransportErrorKind};
pub use feedback::{Execution, Feedback, Finished};
pub use types::{BaseResource, CancelResource, DeploymentBase, Handling};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

/// The hawkBit server as seen by the agent.
///
/// One method per DDI operation the agent performs. Implementations must be
/// cheap to share behind an `Arc`.
pub trait DdiApi: Send + Sync + 'static {
    /// GET the controller base resource.
    fn base_resource(&self) -> impl Future<Output = Result<BaseResource, DdiError>> + Send;

    /// GET a deployment resource via the href advertised in the base poll.
    fn deployment(&self, href: &str)
        -> impl Future<Output = Result<DeploymentBase, DdiError>> + Send;

    /// GET a cancel resource via the href advertised in the base poll.
    fn cancel_resource(
        &self,
        href: &str,
    ) -> impl Future<Output = Result<CancelResource, DdiError>> + Send;

    /// PUT the device attributes to the configData endpoint.
    fn identify(
        &self,
        attributes: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), DdiError>> + Send;

    /// POST a feedback payload to the given feedback URL.
    fn send_feedback(
        &self,
        url: &str,
        feedback: &Feedback,
    ) -> impl Future<Output = Result<(), DdiError>> + Send;

    /// Download a binary artifact to `dest`, optionally resuming at an offset
    /// and hashing the resulting file.
    fn download(
        &self,
        url: &str,
        dest: &Path,
        resume_from: u64,
        compute_sha1: bool,
    ) -> impl Future<Output = Result<DownloadOutcome, DdiError>> + Send;

    /// Feedback URL for a deployment action.
    fn deployment_feedback_url(&self, action_id: &str) -> String;

    /// Feedback URL for a cancel action.
    fn cancel_feedback_url(&self, cancel_id: &str) -> String;
}
