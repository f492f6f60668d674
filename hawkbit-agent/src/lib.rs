//! hawkbit-agent - hawkBit DDI client for RAUC-updated devices
//!
//! This library implements the device side of the hawkBit Direct Device
//! Integration (DDI) protocol: it polls the deployment server for pending
//! work, identifies the device, downloads (or streams) a signed update
//! bundle, verifies its sha1, drives the RAUC installer over D-Bus and
//! reports progress and terminal outcome back to the server.
//!
//! # High-Level API
//!
//! Most users only need the [`service`] entry point:
//!
//! ```ignore
//! use hawkbit_agent::config::AgentConfig;
//! use hawkbit_agent::service;
//!
//! let config = AgentConfig::load_from(Path::new("/etc/hawkbit-agent.conf"))?;
//! let success = service::run(config, false).await?;
//! ```

pub mod agent;
pub mod config;
pub mod ddi;
pub mod installer;
pub mod service;
pub mod system;

/// Version of the hawkbit-agent library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
