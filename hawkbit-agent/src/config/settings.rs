//! Configuration settings structs and defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default hawkBit tenant.
pub const DEFAULT_TENANT_ID: &str = "DEFAULT";
/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
/// Default REST request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default wait between poll retries in seconds.
pub const DEFAULT_RETRY_WAIT_SECS: u64 = 300;
/// Default low-speed abort window in seconds.
pub const DEFAULT_LOW_SPEED_TIME_SECS: u64 = 60;
/// Default low-speed abort threshold in bytes per second.
pub const DEFAULT_LOW_SPEED_RATE: u64 = 100;

/// How the agent authenticates against the hawkBit server.
///
/// Exactly one method is configured; `auth_token` and `gateway_token`
/// together are rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Per-target security token (`Authorization: TargetToken <t>`)
    TargetToken(String),
    /// Tenant-wide gateway token (`Authorization: GatewayToken <t>`)
    GatewayToken(String),
    /// Mutual TLS with a client key/cert pair
    ClientCert {
        key: PathBuf,
        cert: PathBuf,
        /// OpenSSL engine hint; accepted for compatibility, see DESIGN.md
        engine: Option<String>,
    },
}

impl AuthMethod {
    /// The `Authorization` header value for token-based methods.
    pub fn header_value(&self) -> Option<String> {
        match self {
            AuthMethod::TargetToken(t) => Some(format!("TargetToken {t}")),
            AuthMethod::GatewayToken(t) => Some(format!("GatewayToken {t}")),
            AuthMethod::ClientCert { .. } => None,
        }
    }
}

/// Log levels understood by the `log_level` config key.
///
/// The set mirrors the GLib level names operators already use in existing
/// deployments; `as_filter_directive` maps them onto tracing levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Message,
    Warning,
    Critical,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "message" => Some(LogLevel::Message),
            "warning" => Some(LogLevel::Warning),
            "critical" => Some(LogLevel::Critical),
            "error" => Some(LogLevel::Error),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Tracing filter directive equivalent to this level.
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug | LogLevel::Info => "debug",
            LogLevel::Message => "info",
            LogLevel::Warning => "warn",
            LogLevel::Critical | LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

/// The agent configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// hawkBit host or IP, optionally with port
    pub hawkbit_server: String,
    /// hawkBit controller id of this device
    pub controller_id: String,
    /// hawkBit tenant id
    pub tenant_id: String,
    /// Authentication method
    pub auth: AuthMethod,
    /// File the software bundle is downloaded to; absent only when streaming
    pub bundle_download_location: Option<PathBuf>,
    /// Use https instead of http
    pub ssl: bool,
    /// Verify the server certificate
    pub ssl_verify: bool,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// REST reply timeout in seconds
    pub timeout: u64,
    /// Wait between poll retries in seconds
    pub retry_wait: u64,
    /// Low-speed abort window in seconds
    pub low_speed_time: u64,
    /// Low-speed abort threshold in bytes per second
    pub low_speed_rate: u64,
    /// Resume interrupted downloads instead of restarting them
    pub resume_downloads: bool,
    /// Let RAUC stream the bundle instead of staging it on disk
    pub stream_bundle: bool,
    /// Reboot immediately after a successful installation
    pub post_update_reboot: bool,
    /// Send the authorization header on bundle downloads
    pub send_download_authentication: bool,
    /// Log level
    pub log_level: LogLevel,
    /// Device attributes sent to hawkBit on identification
    pub device_attributes: BTreeMap<String, String>,
}

impl AgentConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header_values() {
        let auth = AuthMethod::TargetToken("secret".into());
        assert_eq!(auth.header_value().unwrap(), "TargetToken secret");

        let auth = AuthMethod::GatewayToken("gw".into());
        assert_eq!(auth.header_value().unwrap(), "GatewayToken gw");

        let auth = AuthMethod::ClientCert {
            key: "/k.pem".into(),
            cert: "/c.pem".into(),
            engine: None,
        };
        assert!(auth.header_value().is_none());
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("message"), Some(LogLevel::Message));
        assert_eq!(LogLevel::from_str("fatal"), Some(LogLevel::Fatal));
        assert_eq!(LogLevel::from_str("verbose"), None);
    }

    #[test]
    fn test_log_level_filter_directives() {
        assert_eq!(LogLevel::Debug.as_filter_directive(), "debug");
        assert_eq!(LogLevel::Message.as_filter_directive(), "info");
        assert_eq!(LogLevel::Warning.as_filter_directive(), "warn");
        assert_eq!(LogLevel::Critical.as_filter_directive(), "error");
    }
}
