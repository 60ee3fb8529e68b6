#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KumitateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Error while building the project.\n{0}")]
    Build(#[from] BuildError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

/// Problems found while wiring or resolving the task graph. Nothing runs when
/// one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Cyclic dependency detected at task '{0}'")]
    Cycle(String),

    #[error("Task '{0}' is not registered")]
    Unknown(String),

    #[error("Task '{0}' is registered more than once")]
    Duplicate(String),
}

/// Why a single leaf task did not complete.
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// The stage transform rejected its input, e.g. a syntax error.
    #[error("{0:#}")]
    Execution(anyhow::Error),

    /// An I/O failure in the middle of the transform. The stream is ended
    /// gracefully and the failure is handled like [`TaskFailure::Execution`].
    #[error("stream ended early: {0:#}")]
    Stream(anyhow::Error),

    #[error("task panicked: {0}")]
    Panic(String),
}

impl TaskFailure {
    pub(crate) fn classify(error: anyhow::Error) -> Self {
        if error.chain().any(|cause| cause.is::<std::io::Error>()) {
            TaskFailure::Stream(error)
        } else {
            TaskFailure::Execution(error)
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Task '{task}' failed in phase {phase}:\n{failure}")]
    Task {
        task: String,
        phase: usize,
        failure: TaskFailure,
    },
}

impl BuildError {
    /// Name of the failed task, if the failure came from a task at all.
    pub fn task(&self) -> Option<&str> {
        match self {
            BuildError::Task { task, .. } => Some(task),
            BuildError::Graph(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Couldn't read source file {path}.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't compute artifact for {path}.\n{source:#}")]
    Compute {
        path: Utf8PathBuf,
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Project root {path} is not accessible.\n{source}")]
    Root {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't read dependency manifest {path}.\n{source}")]
    ManifestRead {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse dependency manifest {path}.\n{source}")]
    Manifest {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
