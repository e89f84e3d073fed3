//! Error taxonomy for the build-and-serve core.

use std::path::PathBuf;
use std::time::Duration;

/// An external command (git, the site builder) did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("`{command}` exited with status {}: {stderr}", describe_exit(.exit_code))]
    Exited {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
    #[error("empty command line")]
    Empty,
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// No free port in the allocation window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct AllocationError {
    pub base: u16,
    pub window: u16,
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let end = u32::from(self.base) + u32::from(self.window);
        write!(f, "no free port in {}..{}", self.base, end)
    }
}

/// Submission store failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("submission {0} not found")]
    NotFound(i64),
    /// A generation-guarded write lost to a kill or rebuild.
    #[error("submission {id} moved to generation {actual} (write was for {expected})")]
    ConcurrentModification { id: i64, expected: i64, actual: i64 },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Umbrella error for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum HydraError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("work queue closed")]
    QueueClosed,
}

impl HydraError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HydraError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HydraError::Registry(RegistryError::NotFound(_)))
    }
}

pub type HydraResult<T> = Result<T, HydraError>;
