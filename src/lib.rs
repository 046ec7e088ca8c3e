//! Statecrypt - encryption configuration resolution for state and plan data.
//!
//! This library provides the core functionality for the `statecrypt` CLI
//! tool: decoding encryption declarations, merging them across the root
//! module, override files and the environment, and handing out the flow each
//! purpose (backend, state file, plan file, remote state data source) should
//! use.

pub mod cli;
pub mod commands;
pub mod config;
pub mod flow;
pub mod registry;

pub use config::{ConfigMap, ConfigNode, Diagnostics, PurposeKey, Sources};
pub use flow::{FlowBuilder, FlowPlan, Planner};
pub use registry::Registry;

/// Library-level error type for Statecrypt operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing encryption configuration for {0:?}")]
    MissingConfiguration(String),

    #[error("invalid purpose: {0} (expected backend, statefile, planfile or remote_state:<name>)")]
    InvalidPurpose(String),

    #[error("invalid encryption configuration: {0}")]
    InvalidConfiguration(String),

    #[error("encryption configuration is already set up")]
    AlreadyConfigured,

    #[error("{0}")]
    Diagnostics(Diagnostics),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for Statecrypt operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Diagnostic;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::MissingConfiguration("planfile".to_string()).to_string(),
            "missing encryption configuration for \"planfile\""
        );
        assert_eq!(
            Error::AlreadyConfigured.to_string(),
            "encryption configuration is already set up"
        );
        assert!(
            Error::InvalidPurpose("lockfile".to_string())
                .to_string()
                .starts_with("invalid purpose: lockfile")
        );
        let diags: Diagnostics = Diagnostic::error("Duplicate method block").into();
        assert_eq!(
            Error::Diagnostics(diags).to_string(),
            "Error: Duplicate method block"
        );
    }

    #[test]
    fn test_unreadable_file_is_a_diagnostic_not_an_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let (map, diags) = config::load_file(&dir.path().join("missing.kdl"));
        assert!(map.is_none());
        let err = diags.into_result().err().unwrap();
        assert!(matches!(err, Error::Diagnostics(_)));
        assert!(
            err.to_string()
                .contains("Failed to read encryption configuration file")
        );
    }
}
