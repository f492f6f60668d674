//! INI parsing logic for converting `Ini` → `AgentConfig`.
//!
//! This is the single place where INI key names are mapped to struct fields
//! and where cross-key validation happens (authentication exclusivity,
//! timeout ordering, required keys).

use ini::Ini;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::settings::*;
use super::ConfigError;

/// Parse an `Ini` object into a validated `AgentConfig`.
pub(super) fn parse_ini(ini: &Ini) -> Result<AgentConfig, ConfigError> {
    let client = ini
        .section(Some("client"))
        .ok_or_else(|| missing("client", "hawkbit_server"))?;

    let hawkbit_server = require(client, "hawkbit_server")?;
    let controller_id = require(client, "target_name")?;
    let tenant_id = get_string(client, "tenant_id").unwrap_or_else(|| DEFAULT_TENANT_ID.into());

    let auth = parse_auth(client)?;

    let stream_bundle = get_bool(client, "stream_bundle", false)?;
    let bundle_download_location = get_string(client, "bundle_download_location").map(PathBuf::from);
    if bundle_download_location.is_none() && !stream_bundle {
        return Err(ConfigError::MissingDownloadLocation);
    }

    let connect_timeout = get_u64(client, "connect_timeout", DEFAULT_CONNECT_TIMEOUT_SECS)?;
    let timeout = get_u64(client, "timeout", DEFAULT_TIMEOUT_SECS)?;
    if timeout > 0 && connect_timeout > 0 && timeout < connect_timeout {
        return Err(ConfigError::TimeoutOrder {
            timeout,
            connect_timeout,
        });
    }

    let log_level = match get_string(client, "log_level") {
        Some(value) => LogLevel::from_str(&value).ok_or_else(|| ConfigError::InvalidValue {
            group: "client".into(),
            key: "log_level".into(),
            value,
            reason: "must be one of: debug, info, message, warning, critical, error, fatal".into(),
        })?,
        None => LogLevel::default(),
    };

    let config = AgentConfig {
        hawkbit_server,
        controller_id,
        tenant_id,
        auth,
        bundle_download_location,
        ssl: get_bool(client, "ssl", true)?,
        ssl_verify: get_bool(client, "ssl_verify", true)?,
        connect_timeout,
        timeout,
        retry_wait: get_u64(client, "retry_wait", DEFAULT_RETRY_WAIT_SECS)?,
        low_speed_time: get_u64(client, "low_speed_time", DEFAULT_LOW_SPEED_TIME_SECS)?,
        low_speed_rate: get_u64(client, "low_speed_rate", DEFAULT_LOW_SPEED_RATE)?,
        resume_downloads: get_bool(client, "resume_downloads", false)?,
        stream_bundle,
        post_update_reboot: get_bool(client, "post_update_reboot", false)?,
        send_download_authentication: get_bool(client, "send_download_authentication", true)?,
        log_level,
        device_attributes: parse_device_section(ini)?,
    };

    Ok(config)
}

/// Select exactly one authentication method from the `[client]` section.
fn parse_auth(client: &ini::Properties) -> Result<AuthMethod, ConfigError> {
    let auth_token = get_string(client, "auth_token");
    let gateway_token = get_string(client, "gateway_token");
    let ssl_key = get_string(client, "ssl_key");
    let ssl_cert = get_string(client, "ssl_cert");

    if auth_token.is_some() && gateway_token.is_some() {
        return Err(ConfigError::ConflictingAuth);
    }

    if let Some(token) = auth_token {
        return Ok(AuthMethod::TargetToken(token));
    }
    if let Some(token) = gateway_token {
        return Ok(AuthMethod::GatewayToken(token));
    }

    match (ssl_key, ssl_cert) {
        (Some(key), Some(cert)) => Ok(AuthMethod::ClientCert {
            key: PathBuf::from(key),
            cert: PathBuf::from(cert),
            engine: get_string(client, "ssl_engine"),
        }),
        (None, None) => Err(ConfigError::MissingAuth),
        _ => Err(ConfigError::IncompleteClientCert),
    }
}

/// Collect the `[device]` section as the attribute map sent on identify.
fn parse_device_section(ini: &Ini) -> Result<BTreeMap<String, String>, ConfigError> {
    let section = ini
        .section(Some("device"))
        .ok_or(ConfigError::NoDeviceAttributes)?;

    let attributes: BTreeMap<String, String> = section
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if attributes.is_empty() {
        return Err(ConfigError::NoDeviceAttributes);
    }
    Ok(attributes)
}

fn missing(group: &str, key: &str) -> ConfigError {
    ConfigError::MissingKey {
        group: group.into(),
        key: key.into(),
    }
}

fn require(section: &ini::Properties, key: &str) -> Result<String, ConfigError> {
    get_string(section, key).ok_or_else(|| missing("client", key))
}

fn get_string(section: &ini::Properties, key: &str) -> Option<String> {
    section
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn get_u64(section: &ini::Properties, key: &str, default: u64) -> Result<u64, ConfigError> {
    match get_string(section, key) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            group: "client".into(),
            key: key.into(),
            value,
            reason: "must be a non-negative integer".into(),
        }),
        None => Ok(default),
    }
}

/// Parse a boolean config value.
///
/// Accepts 1/yes/true and 0/no/false case-insensitively; anything else is a
/// configuration error.
fn get_bool(section: &ini::Properties, key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = get_string(section, key) else {
        return Ok(default);
    };
    match value.to_lowercase().as_str() {
        "1" | "yes" | "true" => Ok(true),
        "0" | "no" | "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            group: "client".into(),
            key: key.into(),
            value,
            reason: "cannot be interpreted as a boolean".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use tempfile::TempDir;

    fn load(content: &str) -> Result<AgentConfig, ConfigError> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.conf");
        std::fs::write(&path, content).unwrap();
        AgentConfig::load_from(&path)
    }

    const MINIMAL: &str = r#"
[client]
hawkbit_server = hawkbit.example.com:8080
target_name = device-1
auth_token = token123
bundle_download_location = /tmp/bundle.raucb

[device]
product = widget
"#;

    #[test]
    fn test_minimal_config_with_defaults() {
        let config = load(MINIMAL).unwrap();

        assert_eq!(config.hawkbit_server, "hawkbit.example.com:8080");
        assert_eq!(config.controller_id, "device-1");
        assert_eq!(config.tenant_id, "DEFAULT");
        assert_eq!(config.auth, AuthMethod::TargetToken("token123".into()));
        assert_eq!(
            config.bundle_download_location,
            Some(PathBuf::from("/tmp/bundle.raucb"))
        );
        assert!(config.ssl);
        assert!(config.ssl_verify);
        assert_eq!(config.connect_timeout, 20);
        assert_eq!(config.timeout, 60);
        assert_eq!(config.retry_wait, 300);
        assert_eq!(config.low_speed_time, 60);
        assert_eq!(config.low_speed_rate, 100);
        assert!(!config.resume_downloads);
        assert!(!config.stream_bundle);
        assert!(!config.post_update_reboot);
        assert!(config.send_download_authentication);
        assert_eq!(config.log_level, LogLevel::Message);
        assert_eq!(config.device_attributes["product"], "widget");
    }

    #[test]
    fn test_missing_server_is_error() {
        let err = load(
            r#"
[client]
target_name = device-1
auth_token = t

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "hawkbit_server"));
    }

    #[test]
    fn test_missing_target_name_is_error() {
        let err = load(
            r#"
[client]
hawkbit_server = h
auth_token = t
bundle_download_location = /tmp/b

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "target_name"));
    }

    #[test]
    fn test_both_tokens_is_error() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
gateway_token = g
bundle_download_location = /tmp/b

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingAuth));
    }

    #[test]
    fn test_no_auth_is_error() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
bundle_download_location = /tmp/b

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAuth));
    }

    #[test]
    fn test_client_cert_requires_both_halves() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
ssl_key = /etc/key.pem
bundle_download_location = /tmp/b

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteClientCert));
    }

    #[test]
    fn test_client_cert_with_engine() {
        let config = load(
            r#"
[client]
hawkbit_server = h
target_name = t
ssl_key = /etc/key.pem
ssl_cert = /etc/cert.pem
ssl_engine = pkcs11
bundle_download_location = /tmp/b

[device]
a = b
"#,
        )
        .unwrap();
        assert_eq!(
            config.auth,
            AuthMethod::ClientCert {
                key: PathBuf::from("/etc/key.pem"),
                cert: PathBuf::from("/etc/cert.pem"),
                engine: Some("pkcs11".into()),
            }
        );
    }

    #[test]
    fn test_download_location_optional_when_streaming() {
        let config = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
stream_bundle = true

[device]
a = b
"#,
        )
        .unwrap();
        assert!(config.stream_bundle);
        assert!(config.bundle_download_location.is_none());
    }

    #[test]
    fn test_download_location_required_when_staged() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingDownloadLocation));
    }

    #[test]
    fn test_timeout_must_cover_connect_timeout() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
bundle_download_location = /tmp/b
connect_timeout = 30
timeout = 10

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TimeoutOrder {
                timeout: 10,
                connect_timeout: 30
            }
        ));
    }

    #[test]
    fn test_boolean_lexicon() {
        for (value, expected) in [
            ("1", true),
            ("yes", true),
            ("TRUE", true),
            ("Yes", true),
            ("0", false),
            ("no", false),
            ("FALSE", false),
        ] {
            let config = load(&format!(
                r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
bundle_download_location = /tmp/b
resume_downloads = {value}

[device]
a = b
"#
            ))
            .unwrap();
            assert_eq!(config.resume_downloads, expected, "value: {value}");
        }
    }

    #[test]
    fn test_invalid_boolean_is_error() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
bundle_download_location = /tmp/b
resume_downloads = maybe

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "resume_downloads"));
    }

    #[test]
    fn test_invalid_log_level_is_error() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
bundle_download_location = /tmp/b
log_level = verbose

[device]
a = b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "log_level"));
    }

    #[test]
    fn test_empty_device_section_is_error() {
        let err = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
bundle_download_location = /tmp/b

[device]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoDeviceAttributes));
    }

    #[test]
    fn test_device_attributes_collected() {
        let config = load(
            r#"
[client]
hawkbit_server = h
target_name = t
auth_token = a
bundle_download_location = /tmp/b

[device]
mac_address = aa:bb:cc:dd:ee:ff
hw_revision = 2
model = gateway
"#,
        )
        .unwrap();
        assert_eq!(config.device_attributes.len(), 3);
        assert_eq!(config.device_attributes["hw_revision"], "2");
        assert_eq!(config.device_attributes["model"], "gateway");
    }
}
