//! Integration tests for sandboxed execution
//!
//! These spawn real processes. Snippet tests need a `python3` on PATH and
//! return early when none is available; nothing here needs pandapipes.

use pipebox::harness::{run_snippet_with_result, SENTINEL};
use pipebox::{run_pipeflow_code, CommandSandbox, CommandSpec, ResourceLimits};
use std::time::{Duration, Instant};

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn sandbox_in(dir: &tempfile::TempDir) -> CommandSandbox {
    CommandSandbox::with_allowed_root(dir.path().to_path_buf())
}

#[test]
fn unsafe_working_dir_has_no_side_effects() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let spec = CommandSpec {
        working_dir: Some(std::path::PathBuf::from("/")),
        ..CommandSpec::new(["/bin/sh", "-c", "echo should-not-run"])
    };
    let started = Instant::now();
    let err = sandbox.run_command(&spec, &ResourceLimits::default());
    assert!(err.is_err());
    // Failed fast, before any process ran.
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn timed_out_child_is_reaped_within_bounds() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let spec = CommandSpec::new(["/bin/sh", "-c", "sleep 60"]);
    let limits = ResourceLimits {
        wall_time_seconds: Some(1),
        ..ResourceLimits::default()
    };
    let started = Instant::now();
    let result = sandbox.run_command(&spec, &limits).unwrap();
    assert!(result.timed_out);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "termination must be bounded by wall limit + grace"
    );
}

#[test]
fn snippet_sentinel_roundtrip() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let snippet = format!(
        "print('starting up')\nprint('{}' + '{{\"a\": 1}}')\nprint('done')\n",
        SENTINEL
    );
    let run = run_snippet_with_result(&sandbox, &snippet, None, None).unwrap();
    assert!(run.ok, "stderr: {}", run.stderr);
    assert_eq!(run.result, Some(serde_json::json!({"a": 1})));
    assert!(run.logs.contains("starting up"));
    assert!(run.logs.contains("done"));
    assert!(!run.logs.contains(SENTINEL));
    assert_eq!(run.returncode, Some(0));
}

#[test]
fn snippet_without_sentinel_is_not_ok() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let run = run_snippet_with_result(&sandbox, "print('just logs')\n", None, None).unwrap();
    assert!(!run.ok);
    assert_eq!(run.result, None);
    assert_eq!(run.returncode, Some(0));
}

#[test]
fn snippet_runs_inside_private_worker_dir() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let snippet = "import os\nprint(os.getcwd())\n";
    let run = run_snippet_with_result(&sandbox, snippet, None, None).unwrap();
    assert!(run.logs.contains("pipebox_worker_"));
    assert!(run.logs.contains("workers"));
}

#[test]
fn worker_dirs_are_cleaned_up_after_each_run() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    for _ in 0..2 {
        let _ = run_snippet_with_result(&sandbox, "print('x')\n", None, None).unwrap();
    }
    let workers = root.path().join("workers");
    let leftovers: Vec<_> = std::fs::read_dir(&workers)
        .map(|entries| entries.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(
        leftovers.is_empty(),
        "worker dirs must be removed: {:?}",
        leftovers
    );
}

#[test]
fn concurrent_snippets_never_share_a_worker_dir() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let snippet = "import os\nprint(os.path.basename(os.getcwd()))\n";
    let mut handles = Vec::new();
    for _ in 0..2 {
        let sandbox = sandbox.clone();
        let snippet = snippet.to_string();
        handles.push(std::thread::spawn(move || {
            run_snippet_with_result(&sandbox, &snippet, None, None).unwrap()
        }));
    }
    let runs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let dirs: Vec<_> = runs.iter().map(|r| r.logs.trim().to_string()).collect();
    assert_ne!(dirs[0], dirs[1], "each run must get its own temp dir");
    for dir in &dirs {
        assert!(dir.starts_with("pipebox_worker_"));
    }
}

#[test]
fn snippet_timeout_is_reported_not_raised() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let limits = ResourceLimits {
        wall_time_seconds: Some(1),
        ..ResourceLimits::default()
    };
    let run = run_snippet_with_result(
        &sandbox,
        "import time\ntime.sleep(60)\n",
        Some(&limits),
        None,
    )
    .unwrap();
    assert!(run.timed_out);
    assert!(!run.ok);
}

#[test]
fn harness_reports_user_name_error_with_line() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let run = run_pipeflow_code(&sandbox, "x = undefined_name\n", None, None).unwrap();
    assert!(!run.ok);
    assert_eq!(run.artifacts["user_code_error"], true);
    let user_error = run.artifacts["user_error"].as_str().unwrap();
    assert!(user_error.contains("NameError"), "got: {user_error}");
    assert_eq!(run.artifacts["user_error_line"], 1);
    assert!(run.artifacts["user_traceback"]
        .as_str()
        .unwrap()
        .contains("USER_CODE.py"));
    let reason = run.reason.unwrap();
    assert!(reason.contains("NameError"));
    assert!(reason.contains("line 1"));
}

#[test]
fn harness_reports_missing_net_variable() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let run = run_pipeflow_code(&sandbox, "x = 1\n", None, None).unwrap();
    assert!(!run.ok);
    assert_eq!(run.artifacts["user_code_error"], true);
    assert!(run.artifacts["user_error"]
        .as_str()
        .unwrap()
        .contains("'net' is not defined"));
}

#[test]
fn harness_always_emits_artifacts_even_without_pandapipes() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    // `net` is a plain object; the solve step fails (no pandapipes in the
    // test environment) but extraction still yields empty tables and the
    // sentinel line still arrives.
    let run = run_pipeflow_code(&sandbox, "net = object()\n", None, None).unwrap();
    assert_eq!(run.artifacts["user_code_error"], false);
    assert!(run.artifacts["design"]["junction"].is_array());
    assert!(run.artifacts["results"]["pipe"].is_array());
    assert!(run.artifacts["summary"]["node_count"].is_number());
    assert!(run.artifacts["pipeflow_error"].is_string());
    assert!(!run.ok);
}

#[test]
fn harness_injects_source_code_into_artifacts() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    let code = "net = object()\n";
    let run = run_pipeflow_code(&sandbox, code, None, None).unwrap();
    assert_eq!(run.artifacts["source_code"], code);
}

#[test]
fn forged_sentinel_in_user_output_wins_by_contract() {
    if !python_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox_in(&root);

    // Documented ambiguity: a user-printed sentinel line is
    // indistinguishable from the real one and the last parseable line wins.
    let snippet = format!("print('{}' + '{{\"forged\": true}}')\n", SENTINEL);
    let run = run_snippet_with_result(&sandbox, &snippet, None, None).unwrap();
    assert_eq!(run.result, Some(serde_json::json!({"forged": true})));
}
