//! Agent configuration.
//!
//! Settings structs live in [`settings`], INI parsing and validation in
//! [`parser`]. The configuration is loaded once at startup and treated as
//! immutable afterwards.

mod parser;
mod settings;

pub use settings::{
    AgentConfig, AuthMethod, LogLevel, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_LOW_SPEED_RATE,
    DEFAULT_LOW_SPEED_TIME_SECS, DEFAULT_RETRY_WAIT_SECS, DEFAULT_TENANT_ID, DEFAULT_TIMEOUT_SECS,
};

use ini::Ini;
use std::path::Path;
use thiserror::Error;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the INI file
    #[error("failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// A required key is absent
    #[error("key '{key}' not found in group '{group}' and no default given")]
    MissingKey { group: String, key: String },

    /// A key holds a value that cannot be interpreted
    #[error("invalid configuration: {group}.{key} = '{value}' - {reason}")]
    InvalidValue {
        group: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Both token-based authentication methods are set
    #[error("both auth_token and gateway_token are set in the config")]
    ConflictingAuth,

    /// No authentication method is configured
    #[error("neither auth_token, gateway_token nor ssl_key/ssl_cert is set in the config")]
    MissingAuth,

    /// ssl_key and ssl_cert must be given together
    #[error("ssl_key and ssl_cert must both be set for certificate authentication")]
    IncompleteClientCert,

    /// bundle_download_location is required unless streaming
    #[error("bundle_download_location is required unless stream_bundle is enabled")]
    MissingDownloadLocation,

    /// timeout must not undercut connect_timeout
    #[error(
        "timeout should be greater than connect_timeout. Timeout: {timeout}, Connect timeout: {connect_timeout}"
    )]
    TimeoutOrder { timeout: u64, connect_timeout: u64 },

    /// The [device] section must carry at least one attribute
    #[error("group 'device' has no keys set")]
    NoDeviceAttributes,
}

impl AgentConfig {
    /// Load and validate the agent configuration from an INI file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }
}
