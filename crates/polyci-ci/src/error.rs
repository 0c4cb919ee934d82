//! Error types for discovery, tool execution and orchestration.

use std::path::PathBuf;

use polyci_core::{ConfigError, FrameworkSelection, Stage};

/// Discovery failures. All of them abort the run before any stage executes.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("source root {0} is not a directory")]
    RootNotFound(PathBuf),

    #[error("failed to walk source tree at {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read build file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no test projects found under {root} for framework {hint}, and no fallback project exists")]
    NoProjects {
        root: PathBuf,
        hint: FrameworkSelection,
    },
}

/// Failures to launch or supervise a tool.
///
/// A tool that runs and exits non-zero is not an error; it is a
/// [`polyci_core::StageResult`] with a failure status.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("stage {0} has an empty command")]
    EmptyCommand(Stage),

    #[error("tool '{program}' could not be started: {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("working directory {0} does not exist")]
    InvalidWorkingDir(PathBuf),

    #[error("I/O error while running tool: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("failed to write report {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, OrchestrationError>;
