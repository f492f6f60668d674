//! CLI error handling with distinct exit codes.
//!
//! The exit codes are part of the external interface: 1 argument or runtime
//! failure, 2 no config file given, 3 config file not found, 4 config file
//! invalid.

use hawkbit_agent::config::ConfigError;
use hawkbit_agent::ddi::DdiError;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug)]
pub enum CliError {
    /// No -c/--config-file argument was given
    NoConfigFile,
    /// The given config file does not exist
    ConfigFileNotFound(PathBuf),
    /// The config file could not be parsed or validated
    InvalidConfig(ConfigError),
    /// Logging could not be initialized
    LoggingInit(String),
    /// The tokio runtime could not be created
    Runtime(std::io::Error),
    /// The agent failed to start
    Agent(DdiError),
}

impl CliError {
    /// Print the error and return the matching process exit code.
    pub fn exit(&self) -> ExitCode {
        eprintln!("{self}");
        match self {
            CliError::NoConfigFile => ExitCode::from(2),
            CliError::ConfigFileNotFound(_) => ExitCode::from(3),
            CliError::InvalidConfig(_) => ExitCode::from(4),
            CliError::LoggingInit(_) | CliError::Runtime(_) | CliError::Agent(_) => {
                ExitCode::from(1)
            }
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::NoConfigFile => write!(f, "No configuration file given"),
            CliError::ConfigFileNotFound(path) => {
                write!(f, "No such configuration file: {}", path.display())
            }
            CliError::InvalidConfig(e) => write!(f, "Loading config file failed: {e}"),
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {msg}"),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {e}"),
            CliError::Agent(e) => write!(f, "Agent failed: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::InvalidConfig(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Agent(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CliError::NoConfigFile.to_string(),
            "No configuration file given"
        );
        assert_eq!(
            CliError::ConfigFileNotFound(PathBuf::from("/etc/agent.conf")).to_string(),
            "No such configuration file: /etc/agent.conf"
        );
    }
}
