//! Typed models of the DDI wire format.
//!
//! Required fields are plain struct members so that a missing value fails
//! deserialization; optional parts of the protocol are `Option`.

use serde::Deserialize;
use std::time::Duration;

/// A DDI hyperlink.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

/// Links advertised by the controller base resource.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseLinks {
    #[serde(rename = "deploymentBase")]
    pub deployment_base: Option<Link>,
    #[serde(rename = "configData")]
    pub config_data: Option<Link>,
    #[serde(rename = "cancelAction")]
    pub cancel_action: Option<Link>,
}

/// Server-side polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Polling {
    /// Polling interval as an ISO-8601 clock string, e.g. "00:05:00"
    pub sleep: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub polling: Option<Polling>,
}

/// The controller base resource returned by the periodic poll.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseResource {
    pub config: Option<ServerConfig>,
    #[serde(rename = "_links", default)]
    pub links: BaseLinks,
}

impl BaseResource {
    /// The polling interval advertised by the server, if present and
    /// parseable as "HH:MM:SS".
    pub fn polling_sleep(&self) -> Option<Duration> {
        let sleep = self
            .config
            .as_ref()?
            .polling
            .as_ref()?
            .sleep
            .as_deref()?;
        parse_clock(sleep)
    }
}

/// Parse an "HH:MM:SS" clock string into a duration.
fn parse_clock(value: &str) -> Option<Duration> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// How the server wants download/update handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handling {
    Attempt,
    Forced,
    Skip,
}

/// Artifact checksums.
#[derive(Debug, Clone, Deserialize)]
pub struct Hashes {
    pub sha1: String,
    #[serde(default)]
    pub md5: Option<String>,
}

/// Links on a single artifact; https is favoured over plain http.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactLinks {
    pub download: Option<Link>,
    #[serde(rename = "download-http")]
    pub download_http: Option<Link>,
}

/// One downloadable artifact inside a chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactSpec {
    pub size: u64,
    pub hashes: Hashes,
    #[serde(rename = "_links", default)]
    pub links: ArtifactLinks,
}

impl ArtifactSpec {
    /// The preferred download URL (https before http).
    pub fn download_url(&self) -> Option<&str> {
        self.links
            .download
            .as_ref()
            .or(self.links.download_http.as_ref())
            .map(|link| link.href.as_str())
    }
}

/// One software chunk of a deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct Chunk {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
}

/// The deployment section of a deploymentBase resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    pub download: Handling,
    pub update: Handling,
    #[serde(rename = "maintenanceWindow")]
    pub maintenance_window: Option<String>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// A full deploymentBase resource.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentBase {
    pub id: String,
    pub deployment: Deployment,
}

/// The cancelAction payload inside a cancel resource.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelAction {
    #[serde(rename = "stopId")]
    pub stop_id: String,
}

/// A full cancelAction resource.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelResource {
    pub id: String,
    #[serde(rename = "cancelAction")]
    pub cancel_action: CancelAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_resource_with_all_links() {
        let base: BaseResource = serde_json::from_str(
            r#"{
                "config": {"polling": {"sleep": "00:05:00"}},
                "_links": {
                    "deploymentBase": {"href": "https://h/t/controller/v1/c/deploymentBase/42?c=1"},
                    "configData": {"href": "https://h/t/controller/v1/c/configData"},
                    "cancelAction": {"href": "https://h/t/controller/v1/c/cancelAction/43"}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(base.polling_sleep(), Some(Duration::from_secs(300)));
        assert!(base.links.deployment_base.is_some());
        assert!(base.links.config_data.is_some());
        assert!(base.links.cancel_action.is_some());
    }

    #[test]
    fn test_base_resource_without_links() {
        let base: BaseResource = serde_json::from_str(r#"{"config": {}}"#).unwrap();
        assert!(base.links.deployment_base.is_none());
        assert!(base.links.config_data.is_none());
        assert!(base.links.cancel_action.is_none());
        assert!(base.polling_sleep().is_none());
    }

    #[test]
    fn test_polling_sleep_parsing() {
        assert_eq!(parse_clock("00:00:30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_clock("01:30:00"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_clock("12:00:05"), Some(Duration::from_secs(43205)));
        assert_eq!(parse_clock("00:05"), None);
        assert_eq!(parse_clock("00:05:00:00"), None);
        assert_eq!(parse_clock("abc"), None);
        assert_eq!(parse_clock(""), None);
    }

    #[test]
    fn test_unparseable_sleep_yields_none() {
        let base: BaseResource =
            serde_json::from_str(r#"{"config": {"polling": {"sleep": "soon"}}}"#).unwrap();
        assert!(base.polling_sleep().is_none());
    }

    #[test]
    fn test_deployment_base_full() {
        let deployment: DeploymentBase = serde_json::from_str(
            r#"{
                "id": "42",
                "deployment": {
                    "download": "forced",
                    "update": "forced",
                    "maintenanceWindow": "available",
                    "chunks": [{
                        "name": "fw",
                        "version": "1.0",
                        "artifacts": [{
                            "size": 10,
                            "hashes": {"sha1": "d34db33f", "md5": "aa"},
                            "_links": {
                                "download": {"href": "https://h/fw.raucb"},
                                "download-http": {"href": "http://h/fw.raucb"}
                            }
                        }]
                    }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(deployment.id, "42");
        assert_eq!(deployment.deployment.download, Handling::Forced);
        assert_eq!(deployment.deployment.update, Handling::Forced);
        assert_eq!(
            deployment.deployment.maintenance_window.as_deref(),
            Some("available")
        );
        let artifact = &deployment.deployment.chunks[0].artifacts[0];
        assert_eq!(artifact.size, 10);
        assert_eq!(artifact.hashes.sha1, "d34db33f");
        assert_eq!(artifact.download_url(), Some("https://h/fw.raucb"));
    }

    #[test]
    fn test_download_url_falls_back_to_http() {
        let artifact: ArtifactSpec = serde_json::from_str(
            r#"{
                "size": 1,
                "hashes": {"sha1": "00"},
                "_links": {"download-http": {"href": "http://h/fw.raucb"}}
            }"#,
        )
        .unwrap();
        assert_eq!(artifact.download_url(), Some("http://h/fw.raucb"));
    }

    #[test]
    fn test_missing_required_field_fails() {
        // update is required
        let result: Result<DeploymentBase, _> = serde_json::from_str(
            r#"{"id": "42", "deployment": {"download": "forced", "chunks": []}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cancel_resource() {
        let cancel: CancelResource = serde_json::from_str(
            r#"{"id": "43", "cancelAction": {"stopId": "42"}}"#,
        )
        .unwrap();
        assert_eq!(cancel.id, "43");
        assert_eq!(cancel.cancel_action.stop_id, "42");
    }
}
