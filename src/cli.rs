//! CLI entrypoint wiring for the pipebox binary.

use crate::config::types::ResourceLimits;
use crate::exec::sandbox::CommandSandbox;
use crate::harness::{self, runner};
use crate::validate;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "pipebox",
    author,
    version,
    about = "Sandboxed execution and static validation for pandapipes network code",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LimitArgs {
    /// Soft CPU time limit in seconds
    #[arg(long, default_value_t = 30)]
    cpu_seconds: u64,
    /// Address-space limit in megabytes
    #[arg(long, default_value_t = 2048)]
    memory_mb: u64,
    /// Wall-clock limit in seconds
    #[arg(long, default_value_t = 60)]
    wall_seconds: u64,
    /// Explicit deadline in seconds (defaults to the wall limit)
    #[arg(long)]
    timeout: Option<u64>,
}

impl LimitArgs {
    fn limits(&self) -> ResourceLimits {
        ResourceLimits::for_run(
            Some(self.cpu_seconds),
            Some(self.memory_mb),
            Some(self.wall_seconds),
        )
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Statically validate network code without executing it
    Validate {
        /// Source file ('-' for stdin)
        file: PathBuf,
    },
    /// Validate, then run the code through the sandboxed harness
    Run {
        /// Source file ('-' for stdin)
        file: PathBuf,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Run a raw Python snippet and extract its sentinel JSON result
    Exec {
        /// Snippet file ('-' for stdin)
        file: PathBuf,
        #[command(flatten)]
        limits: LimitArgs,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let code = read_source(&file)?;
            let result = validate::validate(&code);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.ok() {
                std::process::exit(1);
            }
        }
        Commands::Run { file, limits } => {
            let code = read_source(&file)?;
            let validation = validate::validate(&code);
            if !validation.ok() {
                println!("{}", serde_json::to_string_pretty(&validation)?);
                std::process::exit(1);
            }
            let sandbox = CommandSandbox::new();
            let run = runner::run_pipeflow_code(
                &sandbox,
                &code,
                Some(&limits.limits()),
                limits.timeout(),
            )?;
            println!("{}", serde_json::to_string_pretty(&run)?);
            if !run.ok {
                std::process::exit(1);
            }
        }
        Commands::Exec { file, limits } => {
            let snippet = read_source(&file)?;
            let sandbox = CommandSandbox::new();
            let run = harness::run_snippet_with_result(
                &sandbox,
                &snippet,
                Some(&limits.limits()),
                limits.timeout(),
            )?;
            println!("{}", serde_json::to_string_pretty(&run)?);
            if !run.ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
    }
}
