//! The periodic DDI poll loop.
//!
//! A cooperative 1-second tick accumulates toward the desired poll
//! interval. Each poll fetches the controller base resource and dispatches
//! whatever the server advertised: identification, a deployment, a cancel.
//! The next interval comes from the server (`config.polling.sleep`), drops
//! to a fixed 5 s while an action is active so cancel requests arrive
//! promptly, and falls back to `retry_wait` after poll failures.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::coordinator::Coordinator;
use super::AgentError;
use crate::config::{AgentConfig, AuthMethod};
use crate::ddi::DdiApi;
use crate::installer::BundleInstaller;

/// Poll interval while a deployment or cancel is in flight.
const ACTIVE_POLL_INTERVAL_SECS: u64 = 5;

struct PollOutcome {
    ok: bool,
    next_interval: u64,
}

pub struct PollLoop<A, I> {
    api: Arc<A>,
    coordinator: Arc<Coordinator<A, I>>,
    config: Arc<AgentConfig>,
    shutdown: CancellationToken,
    run_once: bool,
}

impl<A: DdiApi, I: BundleInstaller> PollLoop<A, I> {
    pub fn new(
        api: Arc<A>,
        coordinator: Arc<Coordinator<A, I>>,
        config: Arc<AgentConfig>,
        shutdown: CancellationToken,
        run_once: bool,
    ) -> Self {
        Self {
            api,
            coordinator,
            config,
            shutdown,
            run_once,
        }
    }

    /// Run until shutdown, or for a single cycle in run-once mode.
    ///
    /// The first poll fires immediately. The run-once return value is true
    /// iff the poll, any deployment processing and any spawned
    /// download/install all succeeded.
    pub async fn run(self) -> bool {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut desired: u64 = 0;
        let mut elapsed: u64 = 0;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return true,
                _ = ticker.tick() => {}
            }
            elapsed += 1;
            if elapsed < desired {
                continue;
            }
            elapsed = 0;

            let outcome = self.poll_once().await;
            desired = outcome.next_interval.max(1);

            if self.run_once {
                let worker_ok = self.coordinator.wait_for_worker().await;
                return outcome.ok && worker_ok;
            }
        }
    }

    async fn poll_once(&self) -> PollOutcome {
        info!("Checking for new software...");
        let base = match self.api.base_resource().await {
            Ok(base) => base,
            Err(e) => {
                if e.status() == Some(401) {
                    match &self.config.auth {
                        AuthMethod::TargetToken(_) => {
                            error!("Failed to authenticate. Check if auth_token is correct?")
                        }
                        AuthMethod::GatewayToken(_) => {
                            error!("Failed to authenticate. Check if gateway_token is correct?")
                        }
                        AuthMethod::ClientCert { .. } => {
                            error!("Failed to authenticate. Check if ssl_key and ssl_cert are correct?")
                        }
                    }
                } else {
                    error!("Scheduled check for new software failed: {e}");
                }
                return PollOutcome {
                    ok: false,
                    next_interval: self.config.retry_wait,
                };
            }
        };

        let advertised = base
            .polling_sleep()
            .map(|interval| interval.as_secs())
            .unwrap_or(self.config.retry_wait);
        let mut ok = true;

        if base.links.config_data.is_some() {
            debug!("Identifying ourself to hawkbit server");
            if let Err(e) = self.api.identify(&self.config.device_attributes).await {
                error!("Failed to identify to hawkBit server: {e}");
                ok = false;
            }
        }

        if base.links.deployment_base.is_some() {
            match self.coordinator.process_deployment(&base).await {
                Ok(()) => {}
                Err(AgentError::AlreadyInProgress(_)) => {
                    info!("Deployment is already in progress...");
                }
                Err(e) => {
                    error!("Failed to process deployment: {e}");
                    ok = false;
                }
            }
        } else {
            info!("No new software.");
        }

        if base.links.cancel_action.is_some() {
            if let Err(e) = self.coordinator.process_cancel(&base).await {
                warn!("Failed to process cancel action: {e}");
            }
        }

        // keep polling fast while work is in flight so cancels arrive promptly
        let next_interval = if self.coordinator.action().state().is_active() {
            ACTIVE_POLL_INTERVAL_SECS
        } else {
            advertised
        };
        PollOutcome { ok, next_interval }
    }
}
