//! Background download worker.
//!
//! One worker task exists per staged deployment. It downloads the bundle
//! (resuming across the resumable transport errors when configured),
//! verifies the sha1 over the finished file, reports progress and either
//! closes the action (download-only) or drives the installer on the same
//! task. Cancel requests are observed at the checkpoints: task entry, after
//! a download error, and immediately before the install handoff.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::action::{ActionState, ActiveAction};
use super::Artifact;
use crate::config::AgentConfig;
use crate::ddi::{DdiApi, DdiError, Feedback, Finished};
use crate::installer::{BundleInstaller, InstallRequest, InstallerEvent};
use crate::system;

/// Pause between resumed download attempts.
const RESUME_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Shared handles a worker task needs.
pub(crate) struct WorkerContext<A, I> {
    pub api: Arc<A>,
    pub installer: Arc<I>,
    pub action: Arc<ActiveAction>,
    pub config: Arc<AgentConfig>,
    /// Action id of the bundle currently staged on disk, if any
    pub last_downloaded: Arc<Mutex<Option<String>>>,
}

impl<A, I> Clone for WorkerContext<A, I> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            installer: Arc::clone(&self.installer),
            action: Arc::clone(&self.action),
            config: Arc::clone(&self.config),
            last_downloaded: Arc::clone(&self.last_downloaded),
        }
    }
}

impl<A: DdiApi, I: BundleInstaller> WorkerContext<A, I> {
    pub(crate) async fn feedback(&self, url: &str, feedback: Feedback) {
        if let Err(e) = self.api.send_feedback(url, &feedback).await {
            warn!("Failed to send feedback: {e}");
        }
    }
}

/// Remove the staged bundle file if it exists.
pub(crate) async fn cleanup_bundle(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Failed to delete file: {}: {e}", path.display()),
    }
}

/// Run the staged download for one deployment.
///
/// Returns whether every step succeeded, for run-once mode. A canceled
/// action counts as success; the coordinator acknowledges and cleans up.
pub(crate) async fn run_download<A: DdiApi, I: BundleInstaller>(
    ctx: WorkerContext<A, I>,
    artifact: Artifact,
    dest: PathBuf,
) -> bool {
    let action_id = ctx.action.id().unwrap_or_default();
    info!("Start downloading: {}", artifact.download_url);

    // a cancel may already be pending when the task starts
    if ctx.action.take_cancel() {
        return true;
    }

    let outcome = loop {
        let resume_from = if ctx.config.resume_downloads {
            match tokio::fs::metadata(&dest).await {
                Ok(meta) => meta.len(),
                Err(_) => 0,
            }
        } else {
            0
        };

        match ctx
            .api
            .download(&artifact.download_url, &dest, resume_from, true)
            .await
        {
            Ok(outcome) => break outcome,
            Err(e) => {
                if ctx.action.take_cancel() {
                    return true;
                }
                let resumable = matches!(&e, DdiError::Transport(t) if t.is_resumable());
                if resumable && ctx.config.resume_downloads {
                    debug!("Download interrupted ({e}), resuming");
                    tokio::time::sleep(RESUME_RETRY_DELAY).await;
                    continue;
                }

                let msg = format!("Download failed: {e}");
                error!("{msg}");
                ctx.feedback(
                    &artifact.feedback_url,
                    Feedback::terminal(&action_id, Finished::Failure, msg),
                )
                .await;
                ctx.action.transition(ActionState::Error);
                cleanup_bundle(&dest).await;
                ctx.action.reset();
                return false;
            }
        }
    };

    let msg = format!(
        "Download complete. {:.2} MB/s",
        outcome.bytes_per_sec / (1024.0 * 1024.0)
    );
    info!("{msg}");
    ctx.feedback(&artifact.feedback_url, Feedback::progress(&action_id, msg))
        .await;

    let sha1 = outcome.sha1.unwrap_or_default();
    if sha1 != artifact.sha1 {
        let msg = format!(
            "Software: {} V{}. Invalid checksum: {} expected {}",
            artifact.name, artifact.version, sha1, artifact.sha1
        );
        error!("{msg}");
        ctx.feedback(
            &artifact.feedback_url,
            Feedback::terminal(&action_id, Finished::Failure, msg),
        )
        .await;
        ctx.action.transition(ActionState::Error);
        // a corrupted partial file must not poison the next attempt
        cleanup_bundle(&dest).await;
        ctx.action.reset();
        return false;
    }

    if !artifact.do_install {
        info!("File checksum OK.");
        if ctx.action.take_cancel() {
            return true;
        }
        *ctx.last_downloaded.lock().expect("bundle registry poisoned") = Some(action_id.clone());

        if artifact.window_open() {
            ctx.feedback(
                &artifact.feedback_url,
                Feedback::downloaded(&action_id, "File checksum OK."),
            )
            .await;
            ctx.action.transition(ActionState::Success);
        } else {
            if let Some(window) = artifact.maintenance_window.as_deref() {
                if window != "unavailable" {
                    warn!("Unknown maintenance window '{window}', treating as unavailable");
                }
            }
            // keep the bundle staged; the server re-offers the action once
            // the window opens
            ctx.action.reset();
        }
        return true;
    }

    info!("File checksum OK.");
    ctx.feedback(
        &artifact.feedback_url,
        Feedback::progress(&action_id, "File checksum OK."),
    )
    .await;

    if !ctx.action.begin_install() {
        return true;
    }

    let request = InstallRequest::local(dest.to_string_lossy());
    run_install(&ctx, &artifact, request, Some(&dest)).await
}

/// Drive one installation and relay its events as progress feedback.
///
/// Used for both staged installs (with a bundle file to clean up) and
/// streaming installs. The action must already be in Installing.
pub(crate) async fn run_install<A: DdiApi, I: BundleInstaller>(
    ctx: &WorkerContext<A, I>,
    artifact: &Artifact,
    request: InstallRequest,
    staged_bundle: Option<&Path>,
) -> bool {
    let action_id = ctx.action.id().unwrap_or_default();
    let bundle = request.bundle.clone();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let install = ctx.installer.install(request, events_tx);
    let relay = async {
        let mut status = None;
        while let Some(event) = events_rx.recv().await {
            match event {
                InstallerEvent::Progress(msg) => {
                    info!("Installing: {bundle} : {msg}");
                    ctx.feedback(&artifact.feedback_url, Feedback::progress(&action_id, msg))
                        .await;
                }
                InstallerEvent::Completed(result) => status = Some(result),
            }
        }
        status
    };
    let ((), status) = tokio::join!(install, relay);

    let success = status == Some(0);
    if success {
        info!("Software bundle installed successfully.");
        ctx.action.transition(ActionState::Success);
        ctx.feedback(
            &artifact.feedback_url,
            Feedback::terminal(
                &action_id,
                Finished::Success,
                "Software bundle installed successfully.",
            ),
        )
        .await;
    } else {
        error!("Failed to install software bundle.");
        ctx.action.transition(ActionState::Error);
        ctx.feedback(
            &artifact.feedback_url,
            Feedback::terminal(
                &action_id,
                Finished::Failure,
                "Failed to install software bundle.",
            ),
        )
        .await;
    }

    if let Some(path) = staged_bundle {
        cleanup_bundle(path).await;
        *ctx.last_downloaded.lock().expect("bundle registry poisoned") = None;
    }
    ctx.action.reset();

    if success && ctx.config.post_update_reboot {
        if let Err(e) = system::reboot() {
            error!("Failed to reboot: {e}");
            return false;
        }
    }
    success
}
