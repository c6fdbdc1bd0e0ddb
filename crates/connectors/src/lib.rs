//! WeCom Relay Connectors
//!
//! Drives local AI agent CLIs on behalf of chat users. Each user gets an
//! isolated working directory per backend so the agent's own
//! `--continue` session state never leaks between users.

pub mod engine;
pub mod iflow;
pub mod qwen;
pub mod workspace;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

pub use engine::{EngineConfig, ExecutionEngine, RunOutcome, SUMMARY_PROMPT};
pub use workspace::{SessionInfo, SessionKey, WorkspaceRouter};

/// Errors that can occur in connectors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("workspace I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown backend `{0}`")]
    UnknownBackend(String),
}

impl ConnectorError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Agent CLI family the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    IFlow,
    Qwen,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::IFlow => "iflow",
            BackendKind::Qwen => "qwen",
        }
    }

    /// Executable looked up on `PATH` when no explicit binary is configured.
    pub fn default_program(self) -> &'static str {
        match self {
            BackendKind::IFlow => iflow::PROGRAM,
            BackendKind::Qwen => qwen::PROGRAM,
        }
    }

    /// Arguments for one continued-session invocation inside `workspace`.
    pub fn build_args(self, instruction: &str, workspace: &Path) -> Vec<String> {
        match self {
            BackendKind::IFlow => iflow::args(instruction, workspace),
            BackendKind::Qwen => qwen::args(instruction),
        }
    }

    /// Whether `file_name` is a session history file written by this CLI.
    pub fn is_session_artifact(self, file_name: &str) -> bool {
        match self {
            BackendKind::IFlow => iflow::is_session_artifact(file_name),
            BackendKind::Qwen => qwen::is_session_artifact(file_name),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iflow" => Ok(BackendKind::IFlow),
            "qwen" => Ok(BackendKind::Qwen),
            other => Err(ConnectorError::UnknownBackend(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for kind in [BackendKind::IFlow, BackendKind::Qwen] {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!(" QWEN ".parse::<BackendKind>().unwrap(), BackendKind::Qwen);
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let err = "gemini".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownBackend(ref name) if name == "gemini"));
    }
}
