//! Harness execution and sentinel-JSON extraction
//!
//! The sandboxed child reports its structured result as exactly one
//! stdout line with a fixed prefix; everything else on stdout is log
//! text. Extraction happens only after the child has fully terminated,
//! so the complete output is available before parsing.

pub mod runner;
pub mod template;

use crate::config::types::{default_tool_limits, ResourceLimits, Result, RunResult};
use crate::exec::sandbox::CommandSandbox;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Prefix marking the single JSON result line on child stdout.
///
/// Deliberately long and distinctive. User code that prints a forged
/// sentinel line will be misinterpreted as the result; that is accepted
/// by contract rather than papered over with an escaping scheme.
pub const SENTINEL: &str = "PIPEBOX_RESULT_JSON::";

/// Snippet run with the sentinel payload split out of the log stream.
#[derive(Clone, Debug, Serialize)]
pub struct ToolRun {
    /// Exit 0, no timeout, and a result object was extracted
    pub ok: bool,
    pub result: Option<Value>,
    /// Non-sentinel stdout lines, newline-joined in original order
    pub logs: String,
    pub stderr: String,
    pub returncode: Option<i32>,
    pub timed_out: bool,
    pub wall_time: f64,
    pub raw: RunResult,
}

/// Split stdout into the sentinel JSON payload and the remaining log lines.
///
/// The last parseable sentinel line wins. A sentinel line whose payload
/// is not valid JSON is dropped silently and does not appear in the logs
/// either.
pub fn parse_sentinel_json(stdout: &str) -> (Option<Value>, String) {
    let mut result = None;
    let mut logs: Vec<&str> = Vec::new();
    for line in stdout.lines() {
        if let Some(payload) = line.strip_prefix(SENTINEL) {
            if let Ok(value) = serde_json::from_str::<Value>(payload.trim()) {
                result = Some(value);
            }
        } else {
            logs.push(line);
        }
    }
    (result, logs.join("\n"))
}

/// Run a Python snippet in the sandbox and extract its sentinel result.
pub fn run_snippet_with_result(
    sandbox: &CommandSandbox,
    snippet: &str,
    limits: Option<&ResourceLimits>,
    timeout: Option<Duration>,
) -> Result<ToolRun> {
    let defaults;
    let limits = match limits {
        Some(limits) => limits,
        None => {
            defaults = default_tool_limits();
            &defaults
        }
    };

    let raw = sandbox.run_python_snippet(snippet, limits, timeout)?;
    let (result, logs) = parse_sentinel_json(&raw.stdout);
    let ok = raw.returncode == Some(0) && !raw.timed_out && result.is_some();

    Ok(ToolRun {
        ok,
        result,
        logs,
        stderr: raw.stderr.clone(),
        returncode: raw.returncode,
        timed_out: raw.timed_out,
        wall_time: raw.wall_time,
        raw,
    })
}
