//! Layered configuration: embedded defaults, optional files, environment variables.

use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Seeds and other knobs of the oracle that are not per-invocation flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Every evaluation trains one agent per seed, in this order.
    pub seeds: Vec<u64>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { seeds: vec![1, 2, 3, 4, 5] }
    }
}

/// How to launch the external train+evaluate pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Unset means wait for the trainer indefinitely.
    pub timeout_seconds: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-m".to_string(), "scripts.train_and_evaluate_il".to_string()],
            working_dir: None,
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            enable_target: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root for results logs, reports and per-run trainer logs.
    pub storage_dir: PathBuf,
    pub search: SearchSettings,
    pub trainer: TrainerConfig,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("storage"),
            search: SearchSettings::default(),
            trainer: TrainerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings, with `extra` layered over the working-directory file.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(include_str!("../config.toml"), FileFormat::Toml))
            .add_source(File::with_name("demo_search").required(false));

        if let Some(path) = extra {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("DEMO_SEARCH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("search.seeds")
                    .with_list_parse_key("trainer.args")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        Self::apply_env_overrides(&mut settings);
        settings.validate()?;

        Ok(settings)
    }

    /// The training pipeline resolves its storage root from `BABYAI_STORAGE`;
    /// results follow it so both sides agree.
    fn apply_env_overrides(settings: &mut Settings) {
        if let Ok(storage) = std::env::var("BABYAI_STORAGE") {
            settings.storage_dir = PathBuf::from(storage);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.seeds.is_empty() {
            return Err(anyhow!("At least one seed is required"));
        }
        let mut seen = HashSet::new();
        for seed in &self.search.seeds {
            if !seen.insert(seed) {
                return Err(anyhow!("Duplicate seed: {}", seed));
            }
        }

        if self.trainer.program.trim().is_empty() {
            return Err(anyhow!("Trainer program cannot be empty"));
        }
        if let Some(dir) = &self.trainer.working_dir {
            if !dir.is_dir() {
                warn!("Trainer working directory does not exist: {:?}", dir);
            }
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => return Err(anyhow!("Unknown log format '{}', expected 'text' or 'json'", other)),
        }

        Ok(())
    }
}
