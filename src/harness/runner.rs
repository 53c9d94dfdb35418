/// Full pipeflow run: render the harness, execute it, diagnose failures
use super::{run_snippet_with_result, template};
use crate::config::types::{ResourceLimits, Result};
use crate::exec::sandbox::CommandSandbox;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Runner output consumed by KPI/issue post-processors.
#[derive(Clone, Debug, Serialize)]
pub struct SimRun {
    pub ok: bool,
    pub artifacts: Value,
    pub logs: String,
    pub stderr: String,
    pub returncode: Option<i32>,
    pub timed_out: bool,
    pub wall_time: f64,
    pub reason: Option<String>,
    pub tips: Vec<String>,
}

/// Wrap user code in the harness, run it sandboxed, and post-process.
///
/// `ok` requires a clean process exit AND an artifacts payload free of
/// solve, extraction, and user-code errors. On failure a best-effort
/// human-readable `reason` plus `tips` are derived from whichever error
/// field is populated.
pub fn run_pipeflow_code(
    sandbox: &CommandSandbox,
    code: &str,
    limits: Option<&ResourceLimits>,
    timeout: Option<Duration>,
) -> Result<SimRun> {
    let snippet = template::render_harness(code);
    let run = run_snippet_with_result(sandbox, &snippet, limits, timeout)?;

    let mut artifacts = run.result.clone().unwrap_or_else(|| json!({}));
    let stderr_clean = clean_stderr(&run.stderr);
    let ok = run.ok
        && !truthy(&artifacts, "pipeflow_error")
        && !truthy(&artifacts, "error")
        && !truthy(&artifacts, "user_code_error");

    // Kept for collaborators that later only hold a run id.
    if let Value::Object(map) = &mut artifacts {
        map.insert("source_code".to_string(), Value::String(code.to_string()));
    }

    let (reason, tips) = if ok {
        (None, Vec::new())
    } else {
        diagnose(&artifacts, &stderr_clean)
    };

    Ok(SimRun {
        ok,
        artifacts,
        logs: run.logs.trim().to_string(),
        stderr: stderr_clean,
        returncode: run.returncode,
        timed_out: run.timed_out,
        wall_time: run.wall_time,
        reason,
        tips,
    })
}

fn truthy(artifacts: &Value, key: &str) -> bool {
    match artifacts.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    }
}

/// Hide matplotlib cache noise emitted before the backend redirect lands.
fn clean_stderr(stderr: &str) -> String {
    let mut kept = Vec::new();
    for line in stderr.lines() {
        let low = line.to_lowercase();
        if low.contains("mplconfigdir") {
            continue;
        }
        if low.contains("matplotlib")
            && (low.contains("not a writable directory")
                || low.contains("created a temporary cache directory"))
        {
            continue;
        }
        if low.contains("is not a writable directory")
            && (low.contains("pipebox_worker") || low.contains("pipebox_storage"))
        {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}

/// Best-effort failure reason plus fix tips.
///
/// Priority: user code error (with line) > convergence > other solve
/// error > cleaned stderr tail > structural fallback.
fn diagnose(artifacts: &Value, stderr_clean: &str) -> (Option<String>, Vec<String>) {
    if truthy(artifacts, "user_code_error") {
        let err = artifacts
            .get("user_error")
            .and_then(Value::as_str)
            .unwrap_or("User code error");
        let reason = match artifacts.get("user_error_line").and_then(Value::as_i64) {
            Some(line) => format!("{} (line {})", err, line),
            None => err.to_string(),
        };
        return (
            Some(reason),
            vec![
                "Fix the syntax at the indicated line.".to_string(),
                "Python booleans are True/False (capitalized).".to_string(),
                "Ensure net = pp.create_empty_network(...) exists before creating components."
                    .to_string(),
            ],
        );
    }

    let design = artifacts.get("design");
    let list_len = |key: &str| {
        design
            .and_then(|d| d.get(key))
            .and_then(Value::as_array)
            .map_or(0, |rows| rows.len())
    };

    if let Some(pipe_err) = artifacts
        .get("pipeflow_error")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
    {
        if pipe_err.contains("PipeflowNotConverged") {
            if list_len("ext_grid") == 0 && list_len("source") == 0 {
                return (
                    Some("No supply/boundary condition defined (no ext_grid or source).".to_string()),
                    vec![
                        "Add pp.create_ext_grid(...) or pp.create_source(...).".to_string(),
                        "Ensure supply is connected via pipes to sinks.".to_string(),
                        "Open valves and use realistic diameters/lengths/roughness.".to_string(),
                    ],
                );
            }
            return (
                Some("Pipeflow did not converge.".to_string()),
                vec![
                    "Check connectivity between supply and sinks.".to_string(),
                    "Verify at least one ext_grid/source is connected and in service.".to_string(),
                    "Open valves and check component parameters.".to_string(),
                ],
            );
        }
        return (Some(pipe_err.to_string()), Vec::new());
    }

    if let Some(last) = stderr_clean
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
    {
        return (Some(last.trim().to_string()), Vec::new());
    }

    if list_len("pipe") == 0 {
        return (
            Some("No pipes connecting components.".to_string()),
            vec!["Add pp.create_pipe_from_parameters(...) between junctions.".to_string()],
        );
    }

    (
        Some("Unknown error during run.".to_string()),
        vec![
            "Check boundary conditions and connectivity.".to_string(),
            "Review component parameters.".to_string(),
        ],
    )
}
