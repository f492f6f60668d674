//! Action coordinator.
//!
//! Owns the single active action: accepts deployments from the poll loop,
//! spawns the download worker (or the streaming install), and arbitrates
//! server-initiated cancellations against the worker's progress.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::action::{ActionState, ActiveAction};
use super::download::{self, run_download, run_install, WorkerContext};
use super::{AgentError, Artifact};
use crate::config::{AgentConfig, AuthMethod};
use crate::ddi::types::BaseResource;
use crate::ddi::{DdiApi, Feedback, Finished, Handling};
use crate::installer::{BundleInstaller, InstallRequest};
use crate::system;

/// Detail line sent when a deployment resource cannot be used.
const PARSE_FAILURE_DETAIL: &str = "Failed to parse deployment resource.";

pub struct Coordinator<A, I> {
    ctx: WorkerContext<A, I>,
    worker: Mutex<Option<JoinHandle<bool>>>,
}

impl<A: DdiApi, I: BundleInstaller> Coordinator<A, I> {
    pub fn new(
        api: Arc<A>,
        installer: Arc<I>,
        action: Arc<ActiveAction>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                api,
                installer,
                action,
                config,
                last_downloaded: Arc::new(Mutex::new(None)),
            },
            worker: Mutex::new(None),
        }
    }

    pub fn action(&self) -> &Arc<ActiveAction> {
        &self.ctx.action
    }

    /// Handle a base response advertising a deployment.
    ///
    /// Claims the action slot, fetches and validates the deployment
    /// resource, and either spawns the download worker or hands the remote
    /// URL to the installer (streaming mode).
    pub async fn process_deployment(&self, base: &BaseResource) -> Result<(), AgentError> {
        let href = base
            .links
            .deployment_base
            .as_ref()
            .ok_or(AgentError::InvalidDeployment)?
            .href
            .clone();

        self.ctx.action.try_begin()?;

        let resource = match self.ctx.api.deployment(&href).await {
            Ok(resource) => resource,
            Err(e) => {
                self.ctx.action.reset();
                return Err(e.into());
            }
        };
        let id = resource.id;
        let deployment = resource.deployment;

        if deployment.download == Handling::Skip {
            // the server will re-offer the action when it wants the download
            debug!("Deployment {id}: download skipped by server");
            self.ctx.action.reset();
            return Ok(());
        }

        let do_install = deployment.update != Handling::Skip;
        if !do_install && self.staged_action_id().as_deref() == Some(id.as_str()) {
            debug!("Deployment {id}: bundle staged, waiting for the install window");
            self.ctx.action.reset();
            return Ok(());
        }

        // a bundle staged for a superseded action must not be resumed into
        if self.clear_superseded_bundle(&id) {
            if let Some(dest) = &self.ctx.config.bundle_download_location {
                download::cleanup_bundle(dest).await;
            }
        }

        self.ctx.action.assign_id(&id);
        let feedback_url = self.ctx.api.deployment_feedback_url(&id);

        let chunk = match deployment.chunks.as_slice() {
            [chunk] => chunk,
            [] => {
                return self
                    .reject(&id, &feedback_url, PARSE_FAILURE_DETAIL.into(), AgentError::InvalidDeployment)
                    .await;
            }
            _ => {
                let detail = format!("Deployment {id} unsupported: cannot handle multiple chunks.");
                return self
                    .reject(&id, &feedback_url, detail, AgentError::MultipleChunks(id.clone()))
                    .await;
            }
        };
        let artifact_spec = match chunk.artifacts.as_slice() {
            [artifact] => artifact,
            [] => {
                return self
                    .reject(&id, &feedback_url, PARSE_FAILURE_DETAIL.into(), AgentError::InvalidDeployment)
                    .await;
            }
            _ => {
                let detail =
                    format!("Deployment {id} unsupported: cannot handle multiple artifacts.");
                return self
                    .reject(&id, &feedback_url, detail, AgentError::MultipleArtifacts(id.clone()))
                    .await;
            }
        };
        let Some(download_url) = artifact_spec.download_url() else {
            return self
                .reject(&id, &feedback_url, PARSE_FAILURE_DETAIL.into(), AgentError::InvalidDeployment)
                .await;
        };

        let artifact = Artifact {
            name: chunk.name.clone(),
            version: chunk.version.clone(),
            size: artifact_spec.size,
            sha1: artifact_spec.hashes.sha1.clone(),
            download_url: download_url.to_string(),
            feedback_url,
            maintenance_window: deployment.maintenance_window.clone(),
            do_install,
        };

        info!(
            "New software ready for download. (Name: {}, Version: {}, Size: {}, URL: {})",
            artifact.name, artifact.version, artifact.size, artifact.download_url
        );

        if self.ctx.config.stream_bundle {
            self.spawn_stream_install(artifact);
            return Ok(());
        }

        let Some(dest) = self.ctx.config.bundle_download_location.clone() else {
            self.ctx.action.reset();
            return Err(AgentError::NoDownloadLocation);
        };

        match system::available_space(&dest) {
            Ok(free) if free >= artifact.size => {}
            Ok(free) => {
                let detail = format!(
                    "Not enough free space. File size: {}. Free space: {}",
                    artifact.size, free
                );
                let size = artifact.size;
                return self
                    .reject(
                        &id,
                        &artifact.feedback_url,
                        detail,
                        AgentError::InsufficientSpace { size, free },
                    )
                    .await;
            }
            Err(e) => {
                let detail = format!("Failed to calculate free space: {e}");
                return self
                    .reject(&id, &artifact.feedback_url, detail, AgentError::FreeSpace(e))
                    .await;
            }
        }

        self.ctx.action.transition(ActionState::Downloading);
        let handle = tokio::spawn(run_download(self.ctx.clone(), artifact, dest));
        self.store_worker(handle);
        Ok(())
    }

    /// Handle a base response advertising a cancel action.
    pub async fn process_cancel(&self, base: &BaseResource) -> Result<(), AgentError> {
        let href = base
            .links
            .cancel_action
            .as_ref()
            .ok_or(AgentError::InvalidDeployment)?
            .href
            .clone();

        let cancel = self.ctx.api.cancel_resource(&href).await?;
        let stop_id = cancel.cancel_action.stop_id;
        let feedback_url = self.ctx.api.cancel_feedback_url(&cancel.id);

        let state = self.ctx.action.state();
        let matches_active = self.ctx.action.id().as_deref() == Some(stop_id.as_str());

        if matches_active
            && matches!(
                state,
                ActionState::Processing | ActionState::Downloading | ActionState::CancelRequested
            )
        {
            info!("Cancelation requested for action {stop_id}");
            if state != ActionState::CancelRequested {
                self.ctx.action.request_cancel();
            }
            // the worker observes the request at its next checkpoint
            let observed = self
                .ctx
                .action
                .wait_while(|s| s == ActionState::CancelRequested)
                .await;
            match observed {
                ActionState::Canceled => {
                    info!("Action {stop_id} canceled.");
                    self.ctx
                        .feedback(&feedback_url, Feedback::cancel_ack(&cancel.id, "Action canceled."))
                        .await;
                    if let Some(dest) = &self.ctx.config.bundle_download_location {
                        download::cleanup_bundle(dest).await;
                    }
                    self.clear_staged_action();
                    self.ctx.action.reset();
                }
                ActionState::Installing => {
                    self.reject_cancel(&cancel.id, &feedback_url).await;
                }
                // the action concluded on its own; its deployment feedback
                // already told the server
                _ => {}
            }
            return Ok(());
        }

        if matches_active && state == ActionState::Installing {
            self.reject_cancel(&cancel.id, &feedback_url).await;
            return Ok(());
        }

        if matches_active && matches!(state, ActionState::Success | ActionState::Error) {
            return Ok(());
        }

        // unknown or no longer running; acknowledge so the server closes it
        self.ctx
            .feedback(&feedback_url, Feedback::cancel_ack(&cancel.id, "Action canceled."))
            .await;
        Ok(())
    }

    /// Await the currently running worker, if any. Used by run-once mode.
    pub async fn wait_for_worker(&self) -> bool {
        let handle = self.worker.lock().expect("worker slot poisoned").take();
        match handle {
            Some(handle) => handle.await.unwrap_or(false),
            None => true,
        }
    }

    fn spawn_stream_install(&self, artifact: Artifact) {
        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move {
            if !ctx.action.begin_install() {
                return true;
            }
            // streaming always authenticates; RAUC fetches the bundle itself
            let auth_header = ctx
                .config
                .auth
                .header_value()
                .map(|value| format!("Authorization: {value}"));
            let (ssl_key, ssl_cert) = match &ctx.config.auth {
                AuthMethod::ClientCert { key, cert, .. } => (
                    Some(key.display().to_string()),
                    Some(cert.display().to_string()),
                ),
                _ => (None, None),
            };
            let request = InstallRequest {
                bundle: artifact.download_url.clone(),
                auth_header,
                ssl_key,
                ssl_cert,
                ssl_verify: ctx.config.ssl_verify,
            };
            run_install(&ctx, &artifact, request, None).await
        });
        self.store_worker(handle);
    }

    async fn reject(
        &self,
        id: &str,
        feedback_url: &str,
        detail: String,
        error: AgentError,
    ) -> Result<(), AgentError> {
        warn!("Rejecting deployment {id}: {detail}");
        self.ctx
            .feedback(
                feedback_url,
                Feedback::terminal(id, Finished::Failure, detail),
            )
            .await;
        self.ctx.action.reset();
        Err(error)
    }

    async fn reject_cancel(&self, cancel_id: &str, feedback_url: &str) {
        warn!("Cancelation impossible, installation started already.");
        self.ctx
            .feedback(
                feedback_url,
                Feedback::cancel_rejected(
                    cancel_id,
                    "Cancelation impossible, installation started already.",
                ),
            )
            .await;
    }

    fn store_worker(&self, handle: JoinHandle<bool>) {
        *self.worker.lock().expect("worker slot poisoned") = Some(handle);
    }

    fn staged_action_id(&self) -> Option<String> {
        self.ctx
            .last_downloaded
            .lock()
            .expect("bundle registry poisoned")
            .clone()
    }

    fn clear_staged_action(&self) {
        self.ctx
            .last_downloaded
            .lock()
            .expect("bundle registry poisoned")
            .take();
    }

    /// Clear the staged-bundle marker when `id` supersedes it.
    ///
    /// Returns true when a stale bundle file should be removed.
    fn clear_superseded_bundle(&self, id: &str) -> bool {
        let mut last = self
            .ctx
            .last_downloaded
            .lock()
            .expect("bundle registry poisoned");
        if last.as_deref().is_some_and(|staged| staged != id) {
            last.take();
            true
        } else {
            false
        }
    }
}
