pub mod batch;
pub mod config;
pub mod errors;
pub mod invocable;
pub mod lifecycle;
pub mod logging;
pub mod proxy;
pub mod reactor;
pub mod runtime;
pub mod script;
pub mod sequencer;
pub mod targets;
pub mod types;

use clap::{error::ErrorKind, CommandFactory, Parser};
use config::{load_config, CliOverrides};
use errors::BatchError;
use logging::{clear_run_logger, init_run_logger, log_event};
use runtime::ProductionRuntime;
use script::{load_script, run_script};
use serde_json::json;
use std::sync::Arc;
use types::render_results;

#[derive(Debug, Clone, Parser)]
#[command(name = "callback-batch")]
#[command(about = "Replay a recorded batch of callback-style calls in order")]
pub struct Cli {
    /// Batch script (TOML) describing targets and steps.
    #[arg(long)]
    pub script: std::path::PathBuf,
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    /// Give every step invocation its own reactor turn.
    #[arg(long, default_value_t = false)]
    pub defer_calls: bool,
    #[arg(long)]
    pub max_turns: Option<u64>,
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

pub fn run() -> Result<i32, BatchError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| BatchError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, BatchError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(BatchError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        defer_calls: cli.defer_calls,
        max_turns: cli.max_turns,
        log_file: cli.log_file.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    let script_path = config::absolutize_path(cwd, &cli.script);
    let script = load_script(runtime.file_system.as_ref(), &script_path)?;

    let logging_enabled = match cfg.run_logger() {
        Some(logger) => {
            init_run_logger(logger)?;
            true
        }
        None => false,
    };
    log_event(
        "info",
        "run.start",
        json!({
            "script": script_path.display().to_string(),
            "steps": script.steps.len(),
            "defer_calls": cfg.scheduler.defer_calls,
        }),
    );

    let outcome = run_script(&script, &cfg, Arc::clone(&runtime.terminal));
    let result = match outcome {
        Ok(outcome) => {
            log_event(
                "info",
                "run.complete",
                json!({"steps": outcome.steps, "turns": outcome.turns}),
            );
            runtime.terminal.write_line(&format!(
                "batch complete: steps={} turns={} result={}",
                outcome.steps,
                outcome.turns,
                render_results(&outcome.result)
            ))
        }
        Err(error) => {
            log_event("error", "run.failed", json!({"error": error.to_string()}));
            Err(error)
        }
    };

    if logging_enabled {
        clear_run_logger();
    }
    result.map(|()| 0)
}

pub fn render_help() -> String {
    let mut cmd = Cli::command();
    cmd.render_long_help().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakeFileSystem, FakeTerminal};
    use std::ffi::OsString;
    use std::path::Path;

    const SCRIPT: &str = r#"
[[targets]]
name = "console"
kind = "echo"

[[steps]]
target = "console"
operation = "say"
args = ["hi"]

[[steps]]
target = "console"
operation = "exec"
args = [7]
"#;

    fn args(values: &[&str]) -> Vec<OsString> {
        std::iter::once("callback-batch")
            .chain(values.iter().copied())
            .map(OsString::from)
            .collect()
    }

    fn fake_runtime(fs: FakeFileSystem, terminal: &FakeTerminal) -> ProductionRuntime {
        ProductionRuntime {
            file_system: Arc::new(fs),
            terminal: Arc::new(terminal.clone()),
        }
    }

    #[test]
    fn runs_the_script_relative_to_cwd_and_prints_a_summary() {
        let terminal = FakeTerminal::default();
        let fs = FakeFileSystem::with_file("/work/batch.toml", SCRIPT);
        let runtime = fake_runtime(fs, &terminal);

        let code = run_with_runtime(
            &args(&["--script", "batch.toml"]),
            Path::new("/work"),
            &runtime,
        )
        .expect("run");

        assert_eq!(code, 0);
        assert_eq!(
            terminal.written_lines(),
            vec![
                "console: hi".to_string(),
                "batch complete: steps=2 turns=2 result=[\"exec\",7]".to_string(),
            ]
        );
    }

    #[test]
    fn config_file_and_flags_shape_the_run() {
        let fs = FakeFileSystem::with_file("/work/batch.toml", SCRIPT);
        fs.insert("/work/cfg.toml", "[scheduler]\ndefer_calls = true\n");
        let terminal = FakeTerminal::default();
        let runtime = fake_runtime(fs, &terminal);

        run_with_runtime(
            &args(&["--script", "batch.toml", "--config", "cfg.toml"]),
            Path::new("/work"),
            &runtime,
        )
        .expect("run");

        let lines = terminal.written_lines();
        assert_eq!(
            lines.last().map(String::as_str),
            Some("batch complete: steps=2 turns=4 result=[\"exec\",7]")
        );
    }

    #[test]
    fn missing_script_flag_is_a_cli_error() {
        let terminal = FakeTerminal::default();
        let runtime = fake_runtime(FakeFileSystem::default(), &terminal);
        let err =
            run_with_runtime(&args(&[]), Path::new("/work"), &runtime).expect_err("must fail");
        assert!(matches!(err, BatchError::Cli(message) if message.contains("--script")));
    }

    #[test]
    fn terminal_failures_propagate() {
        let terminal = FakeTerminal::new(true);
        let fs = FakeFileSystem::with_file("/work/batch.toml", SCRIPT);
        let runtime = fake_runtime(fs, &terminal);
        let err = run_with_runtime(
            &args(&["--script", "batch.toml"]),
            Path::new("/work"),
            &runtime,
        )
        .expect_err("must fail");
        assert!(matches!(err, BatchError::Io(_)));
    }

    #[test]
    fn help_lists_every_flag() {
        let help = render_help();
        for flag in ["--script", "--config", "--defer-calls", "--max-turns", "--log-file"] {
            assert!(help.contains(flag), "help is missing {flag}");
        }
    }
}
