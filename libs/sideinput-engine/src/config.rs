use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use sideinput_api::SideInputKey;
use sideinput_store::FileStoreConfig;

use crate::error::EngineError;

/// Root configuration — parsed from TOML.
///
/// ```toml
/// [store]
/// root = "/var/numaflow/side-inputs"
///
/// [[generators]]
/// key = "rate-limit"
/// kind = "command"
/// program = "/usr/local/bin/fetch-limits"
/// schedule = { interval_ms = 5000, immediate = true }
///
/// [watch]
/// keys = ["rate-limit"]
/// poll_interval_ms = 2000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SideInputConfig {
    /// Общий mount.
    pub store: FileStoreConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Генераторы (только для `synchronize`).
    #[serde(default)]
    pub generators: Vec<GeneratorConfig>,

    /// Consumer-сторона (`watch`, `init`).
    #[serde(default)]
    pub watch: WatchConfig,

    /// Куда записать server info при старте.
    #[serde(default)]
    pub info_file: Option<PathBuf>,
}

// ════════════════════════════════════════════════════════════════
//  Retry
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Попыток публикации на один тик (включая первую).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Generators
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    pub key: SideInputKey,
    #[serde(flatten)]
    pub source: GeneratorSource,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorSource {
    /// stdout программы — значение.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_command_timeout_ms")]
        timeout_ms: u64,
    },
    /// Содержимое файла (например, смонтированный ConfigMap).
    File { path: PathBuf },
    /// cdylib, экспортирующий `si_create_generator`.
    Plugin {
        plugin: String,
        #[serde(default)]
        config: Option<toml::Value>,
    },
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScheduleConfig {
    /// Период тиков. `None` — только внешний trigger.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Выравнивать тики по кратным `interval_ms` от Unix epoch.
    #[serde(default)]
    pub align: bool,
    /// Первый тик сразу при старте.
    #[serde(default = "default_immediate")]
    pub immediate: bool,
    /// Тикать по внешнему сигналу (SIGUSR1 в бинарнике).
    #[serde(default)]
    pub trigger: bool,
}

fn default_immediate() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_ms: None,
            align: false,
            immediate: default_immediate(),
            trigger: false,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Watch
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Ключи, которые ждёт и применяет этот consumer.
    #[serde(default)]
    pub keys: Vec<SideInputKey>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Зеркалировать применённые значения в `<out_dir>/<key>`.
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            out_dir: None,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ════════════════════════════════════════════════════════════════
//  Load / validate
// ════════════════════════════════════════════════════════════════

impl SideInputConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.store.root.as_os_str().is_empty() {
            return Err(EngineError::Config("store.root must not be empty".into()));
        }
        if self.store.retain_versions < 2 {
            return Err(EngineError::Config(format!(
                "store.retain_versions must be >= 2, got {}",
                self.store.retain_versions
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(EngineError::Config(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(EngineError::Config("watch.poll_interval_ms must be > 0".into()));
        }

        let mut seen = HashSet::new();
        for generator in &self.generators {
            let ctx = format!("generator '{}'", generator.key);
            if !seen.insert(&generator.key) {
                return Err(EngineError::Config("duplicate key".into()).with_context(&ctx));
            }
            let schedule = &generator.schedule;
            if schedule.interval_ms == Some(0) {
                return Err(EngineError::Config("schedule.interval_ms must be > 0".into()).with_context(&ctx));
            }
            if schedule.interval_ms.is_none() && !schedule.trigger {
                return Err(EngineError::Config(
                    "schedule needs interval_ms or trigger = true".into(),
                )
                .with_context(&ctx));
            }
            if schedule.align && schedule.interval_ms.is_none() {
                return Err(EngineError::Config("schedule.align requires interval_ms".into()).with_context(&ctx));
            }
            if let GeneratorSource::Command { program, timeout_ms, .. } = &generator.source {
                if program.is_empty() {
                    return Err(EngineError::Config("command program is empty".into()).with_context(&ctx));
                }
                if *timeout_ms == 0 {
                    return Err(EngineError::Config("command timeout_ms must be > 0".into()).with_context(&ctx));
                }
            }
        }
        Ok(())
    }
}
