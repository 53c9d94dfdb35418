/// Process sandbox: spawn, limit, capture, and reap child processes
use crate::config::types::{ResourceLimits, Result, RunResult, SandboxError};
use crate::exec::preexec::{self, PreExec};
use crate::safety::workspace::WorkerDir;
use crate::security;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL for a timed-out child.
pub const TERM_GRACE: Duration = Duration::from_secs(5);

/// Fallback deadline when neither a timeout nor a wall limit is set.
const DEFAULT_WALL: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One command to run inside the sandbox.
#[derive(Clone, Debug, Default)]
pub struct CommandSpec {
    pub command: Vec<String>,
    /// Bytes piped to the child's stdin; stdin is /dev/null when absent
    pub input_data: Option<Vec<u8>>,
    /// Environment overrides on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Must resolve inside the allowed root; checked before spawning
    pub working_dir: Option<PathBuf>,
    /// Overrides the wall-time limit as the parent-side deadline
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Stateless process sandbox.
///
/// Every run is independent; the only shared resource is the allowed
/// root, where each snippet run gets a private worker directory.
#[derive(Clone, Debug)]
pub struct CommandSandbox {
    allowed_root: PathBuf,
    python: PathBuf,
}

impl Default for CommandSandbox {
    fn default() -> Self {
        Self {
            allowed_root: security::allowed_root().to_path_buf(),
            python: security::python_executable(),
        }
    }
}

impl CommandSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sandbox rooted somewhere other than the process-wide allowed root.
    pub fn with_allowed_root(allowed_root: PathBuf) -> Self {
        Self {
            allowed_root: security::normalize_path(&allowed_root),
            python: security::python_executable(),
        }
    }

    pub fn allowed_root(&self) -> &Path {
        &self.allowed_root
    }

    /// Run a command with resource limits and captured output.
    ///
    /// Spawn failures (and an unsafe working directory) are the only
    /// errors; everything after a successful spawn is reported through
    /// `RunResult` fields.
    pub fn run_command(&self, spec: &CommandSpec, limits: &ResourceLimits) -> Result<RunResult> {
        if spec.command.is_empty() {
            return Err(SandboxError::Config("empty command".to_string()));
        }
        if let Some(dir) = &spec.working_dir {
            let normalized = security::normalize_path(dir);
            if !security::is_safe_path(&normalized, &self.allowed_root) {
                return Err(SandboxError::UnsafeWorkingDir(
                    normalized.display().to_string(),
                ));
            }
            if !normalized.is_dir() {
                return Err(SandboxError::Config(format!(
                    "working directory does not exist: {}",
                    normalized.display()
                )));
            }
        }

        let start = Instant::now();
        let pre = PreExec::new(limits, preexec::resolve_drop_target());
        let privilege_dropped = pre.drops_privileges();

        let mut cmd = Command::new(&spec.command[0]);
        cmd.args(&spec.command[1..]);
        cmd.stdin(if spec.input_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let pre = pre.clone();
            unsafe {
                cmd.pre_exec(move || pre.apply());
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", spec.command[0], e)))?;

        log::debug!("Spawned {:?} as pid {}", spec.command, child.id());

        // Collector threads drain the pipes so a chatty child never
        // deadlocks against a full pipe buffer while we write stdin or
        // poll for exit.
        let stdout_handle = child.stdout.take().map(|mut stream| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stream.read_to_end(&mut buffer);
                buffer
            })
        });
        let stderr_handle = child.stderr.take().map(|mut stream| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stream.read_to_end(&mut buffer);
                buffer
            })
        });

        if let Some(data) = &spec.input_data {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits early closes the pipe; that is its business.
                let _ = stdin.write_all(data);
            }
        }

        let deadline = spec
            .timeout
            .or_else(|| limits.wall_timeout())
            .unwrap_or(DEFAULT_WALL);
        let (returncode, timed_out, killed) = self.wait_with_deadline(&mut child, deadline)?;

        // Child is gone either way, so the collectors see EOF and the
        // full output is available before any parsing happens upstream.
        let stdout = stdout_handle
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();
        let stderr = stderr_handle
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();
        let wall_time = start.elapsed().as_secs_f64();

        let mut extra = HashMap::new();
        extra.insert("privilege_dropped".to_string(), json!(privilege_dropped));
        extra.insert("command".to_string(), json!(spec.command));
        extra.insert(
            "limits".to_string(),
            serde_json::to_value(limits).unwrap_or_default(),
        );

        Ok(RunResult {
            returncode,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
            killed,
            wall_time,
            extra,
        })
    }

    /// Materialize a Python snippet into a private worker directory and
    /// run it with the interpreter.
    ///
    /// Plotting caches are redirected into the worker directory and the
    /// backend forced non-interactive for the child only. The worker
    /// directory is removed unconditionally, whatever the run outcome.
    pub fn run_python_snippet(
        &self,
        snippet: &str,
        limits: &ResourceLimits,
        timeout: Option<Duration>,
    ) -> Result<RunResult> {
        let worker = WorkerDir::create(&self.allowed_root)?;
        let script = worker.write_snippet(snippet)?;

        let spec = CommandSpec {
            command: vec![
                self.python.to_string_lossy().into_owned(),
                script.to_string_lossy().into_owned(),
            ],
            input_data: None,
            env: vec![
                (
                    "MPLCONFIGDIR".to_string(),
                    worker.path().to_string_lossy().into_owned(),
                ),
                ("MPLBACKEND".to_string(), "Agg".to_string()),
            ],
            working_dir: Some(worker.path().to_path_buf()),
            timeout,
        };

        let result = self.run_command(&spec, limits);
        worker.cleanup();
        result
    }

    /// Poll until exit or deadline; on deadline escalate SIGTERM ->
    /// grace -> SIGKILL. Never blocks indefinitely on a hung child.
    fn wait_with_deadline(
        &self,
        child: &mut Child,
        deadline: Duration,
    ) -> Result<(Option<i32>, bool, bool)> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok((status.code(), false, false)),
                Ok(None) => {
                    if started.elapsed() >= deadline {
                        break;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(SandboxError::Process(format!(
                        "process monitoring error: {}",
                        e
                    )))
                }
            }
        }

        let pid = Pid::from_raw(child.id() as i32);
        log::debug!("Deadline exceeded for pid {}; sending SIGTERM", pid);
        let _ = kill(pid, Signal::SIGTERM);

        let grace_started = Instant::now();
        let mut killed = false;
        let returncode = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status.code(),
                Ok(None) => {
                    if grace_started.elapsed() >= TERM_GRACE {
                        log::debug!("Pid {} survived SIGTERM; sending SIGKILL", pid);
                        let _ = kill(pid, Signal::SIGKILL);
                        killed = true;
                        // SIGKILL cannot be caught; wait() returns promptly.
                        break child.wait().ok().and_then(|status| status.code());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(_) => break None,
            }
        };

        Ok((returncode, true, killed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sandbox() -> (tempfile::TempDir, CommandSandbox) {
        let root = tempfile::tempdir().unwrap();
        let sandbox = CommandSandbox::with_allowed_root(root.path().to_path_buf());
        (root, sandbox)
    }

    #[test]
    fn empty_command_is_rejected() {
        let (_root, sandbox) = test_sandbox();
        let err = sandbox
            .run_command(&CommandSpec::default(), &ResourceLimits::default())
            .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn unsafe_working_dir_fails_before_spawn() {
        let (_root, sandbox) = test_sandbox();
        let spec = CommandSpec {
            working_dir: Some(PathBuf::from("/etc")),
            ..CommandSpec::new(["/bin/echo", "hello"])
        };
        let err = sandbox
            .run_command(&spec, &ResourceLimits::default())
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeWorkingDir(_)));
    }

    #[test]
    fn traversal_out_of_root_fails_before_spawn() {
        let (root, sandbox) = test_sandbox();
        let spec = CommandSpec {
            working_dir: Some(root.path().join("workers/../../outside")),
            ..CommandSpec::new(["/bin/echo", "hello"])
        };
        let err = sandbox
            .run_command(&spec, &ResourceLimits::default())
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeWorkingDir(_)));
    }

    #[test]
    fn missing_executable_raises_spawn_error() {
        let (_root, sandbox) = test_sandbox();
        let spec = CommandSpec::new(["/nonexistent/binary-xyz"]);
        let err = sandbox
            .run_command(&spec, &ResourceLimits::default())
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn(_)));
    }

    #[test]
    fn captured_output_and_exit_code() {
        let (_root, sandbox) = test_sandbox();
        let spec = CommandSpec::new(["/bin/sh", "-c", "echo out; echo err 1>&2"]);
        let result = sandbox
            .run_command(&spec, &ResourceLimits::default())
            .unwrap();
        assert_eq!(result.returncode, Some(0));
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert!(!result.timed_out);
        assert!(!result.killed);
        assert!(result.wall_time > 0.0);
        assert!(result.extra["privilege_dropped"].is_boolean());
    }

    #[test]
    fn stdin_is_piped_when_provided() {
        let (_root, sandbox) = test_sandbox();
        let spec = CommandSpec {
            input_data: Some(b"ping\n".to_vec()),
            ..CommandSpec::new(["/bin/cat"])
        };
        let result = sandbox
            .run_command(&spec, &ResourceLimits::default())
            .unwrap();
        assert_eq!(result.stdout, "ping\n");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let (_root, sandbox) = test_sandbox();
        let spec = CommandSpec::new(["/bin/sh", "-c", r"printf '\377\376ok'"]);
        let result = sandbox
            .run_command(&spec, &ResourceLimits::default())
            .unwrap();
        assert!(result.stdout.contains('\u{FFFD}'));
        assert!(result.stdout.ends_with("ok"));
    }

    #[test]
    fn wall_timeout_terminates_the_child() {
        let (_root, sandbox) = test_sandbox();
        let spec = CommandSpec::new(["/bin/sh", "-c", "sleep 30"]);
        let limits = ResourceLimits {
            wall_time_seconds: Some(1),
            ..ResourceLimits::default()
        };
        let started = Instant::now();
        let result = sandbox.run_command(&spec, &limits).unwrap();
        assert!(result.timed_out);
        // sh dies on SIGTERM, so no SIGKILL escalation is expected here.
        assert!(!result.killed);
        assert!(started.elapsed() < Duration::from_secs(1) + TERM_GRACE + Duration::from_secs(2));
    }

    #[test]
    fn explicit_timeout_overrides_wall_limit() {
        let (_root, sandbox) = test_sandbox();
        let spec = CommandSpec {
            timeout: Some(Duration::from_millis(300)),
            ..CommandSpec::new(["/bin/sh", "-c", "sleep 30"])
        };
        let limits = ResourceLimits {
            wall_time_seconds: Some(600),
            ..ResourceLimits::default()
        };
        let result = sandbox.run_command(&spec, &limits).unwrap();
        assert!(result.timed_out);
        assert!(result.wall_time < 10.0);
    }
}
