//! Common test utilities for statecrypt integration tests.
//!
//! Provides `TestEnv`, a scratch directory for configuration documents, and a
//! `statecrypt()` command that never inherits the caller's
//! `STATECRYPT_ENCRYPTION`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with an isolated working directory.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the statecrypt binary running in the scratch dir.
    pub fn statecrypt(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_statecrypt"));
        cmd.current_dir(self.dir.path());
        cmd.env_remove("STATECRYPT_ENCRYPTION");
        cmd.env_remove("STATECRYPT_LOG");
        cmd
    }

    /// Write `content` to `name` inside the scratch dir and return its path.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn parse_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}
