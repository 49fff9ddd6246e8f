use crate::errors::BatchError;
use crate::logging::{JsonlLogger, DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_TURNS: u64 = 1_000_000;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub defer_calls: bool,
    pub max_turns: Option<u64>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub defer_calls: bool,
    pub max_turns: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig {
                defer_calls: false,
                max_turns: DEFAULT_MAX_TURNS,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl AppConfig {
    /// The configured run logger, if a log path is set.
    pub fn run_logger(&self) -> Option<JsonlLogger> {
        let path = self.logging.path.as_ref()?;
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = self.logging.max_payload_bytes;
        logger.budget_bytes = self.logging.budget_bytes;
        Some(logger)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    scheduler: Option<PartialSchedulerConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSchedulerConfig {
    defer_calls: Option<bool>,
    max_turns: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, BatchError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(&absolutize_path(process_cwd, path))?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| BatchError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    cfg.logging.path = cfg
        .logging
        .path
        .take()
        .map(|path| absolutize_path(process_cwd, &path));
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(scheduler) = partial.scheduler {
        if let Some(value) = scheduler.defer_calls {
            cfg.scheduler.defer_calls = value;
        }
        if let Some(value) = scheduler.max_turns {
            cfg.scheduler.max_turns = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if overrides.defer_calls {
        cfg.scheduler.defer_calls = true;
    }
    if let Some(max_turns) = overrides.max_turns {
        cfg.scheduler.max_turns = max_turns;
    }
    if let Some(path) = &overrides.log_file {
        cfg.logging.path = Some(path.clone());
    }
}

pub fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), BatchError> {
    if cfg.scheduler.max_turns == 0 {
        return Err(BatchError::InvalidConfig(
            "scheduler.max_turns must be greater than zero".to_string(),
        ));
    }

    if cfg.logging.max_payload_bytes == 0 {
        return Err(BatchError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    fn load(text: &str, overrides: CliOverrides) -> Result<AppConfig, BatchError> {
        let fs = FakeFileSystem::with_file("/cfg.toml", text);
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/cfg.toml")),
            ..overrides
        };
        load_config(&overrides, Path::new("/work"), &fs)
    }

    #[test]
    fn no_config_path_uses_defaults() {
        let fs = FakeFileSystem::default();
        let cfg = load_config(&CliOverrides::default(), Path::new("/work"), &fs).expect("defaults");
        assert_eq!(cfg, AppConfig::default());
        assert!(cfg.run_logger().is_none());
    }

    #[test]
    fn partial_file_only_overrides_the_keys_it_sets() {
        let cfg = load(
            "[scheduler]\ndefer_calls = true\n\n[logging]\npath = \"logs/run.jsonl\"\n",
            CliOverrides::default(),
        )
        .expect("load");

        assert!(cfg.scheduler.defer_calls);
        assert_eq!(cfg.scheduler.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(cfg.logging.path, Some(PathBuf::from("/work/logs/run.jsonl")));
        assert_eq!(cfg.logging.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn cli_overrides_win_over_the_file() {
        let cfg = load(
            "[scheduler]\nmax_turns = 10\n\n[logging]\npath = \"/var/a.jsonl\"\nbudget_bytes = 99\n",
            CliOverrides {
                max_turns: Some(25),
                log_file: Some(PathBuf::from("/tmp/b.jsonl")),
                ..CliOverrides::default()
            },
        )
        .expect("load");

        assert_eq!(cfg.scheduler.max_turns, 25);
        let logger = cfg.run_logger().expect("logger");
        assert_eq!(logger.path, PathBuf::from("/tmp/b.jsonl"));
        assert_eq!(logger.budget_bytes, 99);
    }

    #[test]
    fn zero_turn_budget_is_rejected() {
        let err = load("[scheduler]\nmax_turns = 0\n", CliOverrides::default())
            .expect_err("must reject");
        assert!(matches!(err, BatchError::InvalidConfig(message) if message.contains("max_turns")));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = load("[scheduler\n", CliOverrides::default()).expect_err("must reject");
        assert!(matches!(err, BatchError::ConfigParse(_)));
    }

    #[test]
    fn relative_config_path_resolves_against_the_given_cwd() {
        let fs = FakeFileSystem::with_file("/work/conf/run.toml", "[scheduler]\nmax_turns = 7\n");
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("conf/run.toml")),
            ..CliOverrides::default()
        };

        let cfg = load_config(&overrides, Path::new("/work"), &fs).expect("load");
        assert_eq!(cfg.scheduler.max_turns, 7);
    }
}
