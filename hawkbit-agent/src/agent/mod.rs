//! The agent core: poll loop, action coordination and the download worker.
//!
//! [`poll`] drives the periodic DDI poll, [`coordinator`] owns the single
//! active action and serializes deployment/cancel handling, [`download`]
//! runs the staged download and hands off to the installer. All of them
//! share the [`ActiveAction`] monitor defined in [`action`].

pub mod action;
pub mod coordinator;
pub mod download;
pub mod poll;

pub use action::{ActionState, ActiveAction, AlreadyInProgress};
pub use coordinator::Coordinator;
pub use poll::PollLoop;

use thiserror::Error;

use crate::ddi::DdiError;

/// The artifact of an accepted deployment.
///
/// Created by the coordinator when a deployment is accepted, owned by the
/// download worker, gone once the action reaches a terminal state.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub version: String,
    pub size: u64,
    pub sha1: String,
    pub download_url: String,
    pub feedback_url: String,
    pub maintenance_window: Option<String>,
    pub do_install: bool,
}

impl Artifact {
    /// Whether a download-only action may close successfully right now.
    ///
    /// Absent and "available" windows permit it. Unknown marker values are
    /// treated like "unavailable" so the bundle stays staged until the
    /// server opens the window.
    pub fn window_open(&self) -> bool {
        match self.maintenance_window.as_deref() {
            None | Some("available") => true,
            Some(_) => false,
        }
    }
}

/// Failures while processing a deployment or cancel action.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    AlreadyInProgress(#[from] AlreadyInProgress),

    /// Required parts of the deployment resource are missing
    #[error("failed to parse deployment resource")]
    InvalidDeployment,

    #[error("deployment {0} unsupported: cannot handle multiple chunks")]
    MultipleChunks(String),

    #[error("deployment {0} unsupported: cannot handle multiple artifacts")]
    MultipleArtifacts(String),

    #[error("not enough free space. File size: {size}. Free space: {free}")]
    InsufficientSpace { size: u64, free: u64 },

    #[error("bundle_download_location is not configured")]
    NoDownloadLocation,

    #[error("failed to calculate free space: {0}")]
    FreeSpace(std::io::Error),

    #[error(transparent)]
    Ddi(#[from] DdiError),
}
