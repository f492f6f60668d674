//! Process lifecycle glue.
//!
//! Wires the configuration, DDI client, coordinator and poll loop together,
//! installs the shutdown signal handling, and (with the `systemd` feature)
//! reports readiness and feeds the service watchdog.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{ActiveAction, Coordinator, PollLoop};
use crate::config::AgentConfig;
use crate::ddi::{DdiClient, DdiError};
use crate::installer::RaucInstaller;

/// Run the agent until shutdown (or for one cycle in run-once mode).
///
/// Returns the run-once success flag; in daemon mode the return value is
/// always true once a shutdown signal ends the loop.
pub async fn run(config: AgentConfig, run_once: bool) -> Result<bool, DdiError> {
    let config = Arc::new(config);
    let api = Arc::new(DdiClient::from_config(&config)?);
    let installer = Arc::new(RaucInstaller::new());
    let action = Arc::new(ActiveAction::new());
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&api),
        installer,
        action,
        Arc::clone(&config),
    ));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    #[cfg(feature = "systemd")]
    let watchdog = systemd::announce_ready(shutdown.clone());

    let poll = PollLoop::new(api, coordinator, config, shutdown.clone(), run_once);
    let success = poll.run().await;

    shutdown.cancel();
    #[cfg(feature = "systemd")]
    {
        systemd::announce_stopping();
        if let Some(task) = watchdog {
            let _ = task.await;
        }
    }

    Ok(success)
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });
}

#[cfg(feature = "systemd")]
mod systemd {
    //! sd_notify integration: readiness, stop notification and watchdog.

    use sd_notify::NotifyState;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;
    use tracing::debug;

    /// Notify readiness and start kicking the watchdog when enabled.
    pub(super) fn announce_ready(shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let _ = sd_notify::notify(
            false,
            &[
                NotifyState::Ready,
                NotifyState::Status("Init completed, start polling hawkBit for new software."),
            ],
        );

        let mut usec = 0;
        if !sd_notify::watchdog_enabled(false, &mut usec) || usec == 0 {
            return None;
        }
        // kick at half the configured watchdog period
        let interval = Duration::from_micros(usec / 2);
        debug!("Watchdog enabled, kicking every {:?}", interval);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = sd_notify::notify(false, &[NotifyState::Watchdog]);
                    }
                }
            }
        }))
    }

    pub(super) fn announce_stopping() {
        let _ = sd_notify::notify(
            false,
            &[
                NotifyState::Stopping,
                NotifyState::Status("Stopped polling hawkBit for new software."),
            ],
        );
    }
}
