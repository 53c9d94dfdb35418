//! pipebox: sandboxed execution and static validation for untrusted
//! pandapipes network code
//!
//! A caller submits arbitrary Python source expected to build a
//! pandapipes network object. pipebox validates it without executing it,
//! runs it inside a resource-limited child process, and recovers a
//! structured JSON result over a sentinel-prefixed stdout line.
//!
//! # Architecture
//!
//! ## Validation ([`validate`])
//! - [`validate::validate`]: parse-only analysis of untrusted source;
//!   import/call/dunder violations plus inferred component facts
//! - [`validate::allowlist`]: checked-in allow-list of sanctioned callables
//!
//! ## Execution Control ([`exec`])
//! - [`exec::sandbox`]: process spawn, output capture, deadline and
//!   SIGTERM/SIGKILL escalation
//! - [`exec::preexec`]: child-side rlimits and best-effort credential drop
//!
//! ## Harness ([`harness`])
//! - [`harness::template`]: the generated Python wrapper around user code
//! - [`harness::runner`]: full simulate runs with failure diagnosis
//! - sentinel-JSON extraction shared by both
//!
//! ## Safety & Configuration ([`safety`], [`security`], [`config`])
//! - [`safety::workspace`]: run-scoped worker directories with cleanup
//! - [`security`]: allowed-root resolution and path containment
//! - [`config::types`]: resource limits, run results, error types
//!
//! # Design Principles
//!
//! 1. **Untrusted failure is data** - anything bad input can cause is a
//!    result field, never a raised error
//! 2. **Environment failure raises** - a child that cannot spawn or a
//!    workspace that cannot be prepared indicates a broken deployment
//! 3. **Termination is bounded** - terminate, grace, kill; never wait
//!    indefinitely on a hung child
//! 4. **Runs share nothing** - one process and one worker directory per
//!    run; the only shared state is read-only

// Validation
pub mod validate;

// Execution Control
pub mod exec;

// Harness generation and result extraction
pub mod harness;

// Safety & Cleanup
pub mod safety;

// Path containment
pub mod security;

// Configuration & shared types
pub mod config;

// CLI entrypoint wiring for the pipebox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::{default_tool_limits, ResourceLimits, Result, RunResult, SandboxError};
pub use exec::sandbox::{CommandSandbox, CommandSpec};
pub use harness::runner::{run_pipeflow_code, SimRun};
pub use harness::{run_snippet_with_result, ToolRun, SENTINEL};
pub use validate::{validate, InferredFacts, ValidationMessage, ValidationResult};
