/// Core types and structures for the pipebox sandbox
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Resource ceilings for one sandboxed execution.
///
/// All fields are optional. Production callers should at least set
/// `wall_time_seconds` so a hung child is always bounded by the parent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Soft CPU time limit in seconds (the hard limit is soft + 1)
    pub cpu_time_seconds: Option<u64>,
    /// Address-space limit in bytes
    pub memory_bytes: Option<u64>,
    /// Wall-clock timeout in seconds, enforced by the parent process
    pub wall_time_seconds: Option<u64>,
}

impl ResourceLimits {
    /// Convenience factory for typical analysis runs.
    pub fn for_run(
        cpu_seconds: Option<u64>,
        memory_mb: Option<u64>,
        wall_seconds: Option<u64>,
    ) -> Self {
        Self {
            cpu_time_seconds: cpu_seconds,
            memory_bytes: memory_mb.map(|mb| mb * 1024 * 1024),
            wall_time_seconds: wall_seconds,
        }
    }

    /// Wall-clock limit as a `Duration`, if set.
    pub fn wall_timeout(&self) -> Option<Duration> {
        self.wall_time_seconds.map(Duration::from_secs)
    }
}

/// Conservative defaults for harness-style tool runs.
pub fn default_tool_limits() -> ResourceLimits {
    ResourceLimits {
        cpu_time_seconds: Some(30),
        memory_bytes: Some(2 * 1024 * 1024 * 1024),
        wall_time_seconds: Some(60),
    }
}

/// Outcome of one sandboxed process, produced once per spawn and never
/// mutated afterwards.
///
/// When `timed_out` is true the child was sent SIGTERM, then SIGKILL if it
/// survived the grace period; `returncode` may still be set if the process
/// exited between the two signals. `killed` records the SIGKILL escalation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub killed: bool,
    /// Wall clock from before spawn to after reaping, in seconds
    pub wall_time: f64,
    /// Side-channel facts about the run: `command`, `limits`, and
    /// `privilege_dropped` (whether a uid/gid drop was armed for the child)
    pub extra: HashMap<String, serde_json::Value>,
}

/// Custom error types for pipebox.
///
/// Only environment-level failures surface here: a child that cannot be
/// spawned, a workspace that cannot be prepared, a working directory
/// escaping the allowed root. Everything untrusted code can do to itself
/// is reported as `RunResult` fields instead.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsafe working directory: {0}")]
    UnsafeWorkingDir(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pipebox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
