//! RAUC installer driver.
//!
//! Talks to the RAUC service over D-Bus: triggers `InstallBundle` and
//! translates the installer's property changes and `Completed` signal into
//! a stream of [`InstallerEvent`]s. Progress lines arrive in FIFO order and
//! the stream ends with exactly one terminal status (0 = success).
//!
//! The [`BundleInstaller`] seam lets tests substitute a scripted installer.

use std::collections::HashMap;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::zvariant::Value;
use zbus::{proxy, Connection};

use futures::StreamExt;

/// Terminal status reported when the bus peer vanishes or the install call
/// itself fails before RAUC takes over.
const STATUS_PEER_LOST: i32 = 2;

/// What to install and how.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Local bundle path, or a remote URL when streaming
    pub bundle: String,
    /// Full `Authorization: ...` header line for streaming installations
    pub auth_header: Option<String>,
    /// Client TLS key/cert paths for streaming installations
    pub ssl_key: Option<String>,
    pub ssl_cert: Option<String>,
    /// Whether RAUC should verify the server certificate when streaming
    pub ssl_verify: bool,
}

impl InstallRequest {
    /// A plain install of a staged local bundle.
    pub fn local(bundle: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            auth_header: None,
            ssl_key: None,
            ssl_cert: None,
            ssl_verify: true,
        }
    }

    /// The `a{sv}` argument dict for `InstallBundle`.
    fn args(&self) -> HashMap<&str, Value<'_>> {
        let mut args = HashMap::new();
        if let Some(header) = &self.auth_header {
            args.insert("http-headers", Value::from(vec![header.as_str()]));
            args.insert("tls-no-verify", Value::from(!self.ssl_verify));
        }
        if let (Some(key), Some(cert)) = (&self.ssl_key, &self.ssl_cert) {
            args.insert("tls-key", Value::from(key.as_str()));
            args.insert("tls-cert", Value::from(cert.as_str()));
            args.insert("tls-no-verify", Value::from(!self.ssl_verify));
        }
        args
    }
}

/// Events produced while an installation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerEvent {
    /// A human-readable progress line
    Progress(String),
    /// The terminal status; 0 means success
    Completed(i32),
}

/// The update executor as seen by the agent.
pub trait BundleInstaller: Send + Sync + 'static {
    /// Run one installation, emitting progress lines and exactly one
    /// `Completed` event on `events` before returning.
    fn install(
        &self,
        request: InstallRequest,
        events: mpsc::UnboundedSender<InstallerEvent>,
    ) -> impl Future<Output = ()> + Send;
}

#[proxy(
    interface = "de.pengutronix.rauc.Installer",
    default_service = "de.pengutronix.rauc",
    default_path = "/"
)]
trait Installer {
    fn install_bundle(&self, source: &str, args: HashMap<&str, Value<'_>>) -> zbus::Result<()>;

    #[zbus(signal)]
    fn completed(&self, result: i32) -> zbus::Result<()>;

    #[zbus(property)]
    fn operation(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn last_error(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn progress(&self) -> zbus::Result<(i32, String, i32)>;
}

/// Production installer driving RAUC over the object bus.
#[derive(Debug, Clone, Default)]
pub struct RaucInstaller;

impl RaucInstaller {
    pub fn new() -> Self {
        Self
    }

    /// Connect to the bus RAUC lives on.
    ///
    /// The session bus is only used when `DBUS_STARTER_BUS_TYPE=session`,
    /// which the integration tests rely on; devices use the system bus.
    async fn connect() -> zbus::Result<Connection> {
        if std::env::var("DBUS_STARTER_BUS_TYPE").as_deref() == Ok("session") {
            Connection::session().await
        } else {
            Connection::system().await
        }
    }

    async fn drive(
        request: InstallRequest,
        events: &mpsc::UnboundedSender<InstallerEvent>,
    ) -> Result<i32, zbus::Error> {
        let connection = Self::connect().await?;
        let proxy = InstallerProxy::new(&connection).await?;

        // subscribe before triggering the install so no event is lost
        let mut completed = proxy.receive_completed().await?;
        let mut operation_changes = proxy.receive_operation_changed().await;
        let mut progress_changes = proxy.receive_progress_changed().await;
        let mut last_error_changes = proxy.receive_last_error_changed().await;
        let mut owner_changes = proxy.inner().receive_owner_changed().await?;

        debug!(bundle = %request.bundle, "Trying to contact RAUC DBUS service");
        proxy
            .install_bundle(&request.bundle, request.args())
            .await?;

        loop {
            tokio::select! {
                Some(signal) = completed.next() => {
                    let result = signal.args()?.result;
                    return Ok(result);
                }
                Some(change) = operation_changes.next() => {
                    if let Ok(operation) = change.get().await {
                        let _ = events.send(InstallerEvent::Progress(operation));
                    }
                }
                Some(change) = progress_changes.next() => {
                    if let Ok((percentage, message, _depth)) = change.get().await {
                        let _ = events.send(InstallerEvent::Progress(format!(
                            "{percentage:3}% {message}"
                        )));
                    }
                }
                Some(change) = last_error_changes.next() => {
                    if let Ok(message) = change.get().await {
                        if !message.is_empty() {
                            let _ = events.send(InstallerEvent::Progress(format!(
                                "LastError: {message}"
                            )));
                        }
                    }
                }
                Some(owner) = owner_changes.next() => {
                    if owner.is_none() {
                        warn!("RAUC DBUS service disappeared");
                        return Ok(STATUS_PEER_LOST);
                    }
                }
                else => {
                    // every stream ended without a Completed signal
                    return Ok(STATUS_PEER_LOST);
                }
            }
        }
    }
}

impl BundleInstaller for RaucInstaller {
    async fn install(
        &self,
        request: InstallRequest,
        events: mpsc::UnboundedSender<InstallerEvent>,
    ) {
        let status = match Self::drive(request, &events).await {
            Ok(status) => status,
            Err(e) => {
                warn!("RAUC installation failed: {e}");
                STATUS_PEER_LOST
            }
        };
        let _ = events.send(InstallerEvent::Completed(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_request_has_no_streaming_args() {
        let request = InstallRequest::local("/tmp/bundle.raucb");
        assert!(request.args().is_empty());
    }

    #[test]
    fn test_streaming_args_carry_auth_and_verify_flag() {
        let request = InstallRequest {
            bundle: "https://h/fw.raucb".into(),
            auth_header: Some("Authorization: TargetToken secret".into()),
            ssl_key: None,
            ssl_cert: None,
            ssl_verify: false,
        };
        let args = request.args();
        assert!(args.contains_key("http-headers"));
        assert_eq!(args["tls-no-verify"], Value::from(true));
    }

    #[test]
    fn test_streaming_args_with_client_cert() {
        let request = InstallRequest {
            bundle: "https://h/fw.raucb".into(),
            auth_header: None,
            ssl_key: Some("/etc/key.pem".into()),
            ssl_cert: Some("/etc/cert.pem".into()),
            ssl_verify: true,
        };
        let args = request.args();
        assert_eq!(args["tls-key"], Value::from("/etc/key.pem"));
        assert_eq!(args["tls-cert"], Value::from("/etc/cert.pem"));
        assert_eq!(args["tls-no-verify"], Value::from(false));
    }

    #[tokio::test]
    async fn test_events_channel_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(InstallerEvent::Progress("Installing".into()))
            .unwrap();
        tx.send(InstallerEvent::Progress(" 50% copying image".into()))
            .unwrap();
        tx.send(InstallerEvent::Completed(0)).unwrap();
        drop(tx);

        assert_eq!(
            rx.recv().await,
            Some(InstallerEvent::Progress("Installing".into()))
        );
        assert_eq!(
            rx.recv().await,
            Some(InstallerEvent::Progress(" 50% copying image".into()))
        );
        assert_eq!(rx.recv().await, Some(InstallerEvent::Completed(0)));
        assert_eq!(rx.recv().await, None);
    }
}
