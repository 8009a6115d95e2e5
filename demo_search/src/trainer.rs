//! The seam to the external imitation-learning pipeline.
//!
//! A [`Trainer`] trains one agent for one seed and returns the mean episodic
//! return of its evaluation. [`ProcessTrainer`] does that by running the
//! configured training script as a child process.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use crate::settings::TrainerConfig;

/// Lines of stderr quoted back when the trainer fails.
const STDERR_TAIL_LINES: usize = 20;

/// One train+evaluate job: a single seed at a single demonstration count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub model: String,
    pub env: String,
    pub demos_origin: String,
    pub seed: u64,
    pub num_demos: u64,
    pub test_seed: u64,
    pub test_episodes: u64,
}

impl Trial {
    pub fn model_name(env: &str, demos_origin: &str, seed: u64, num_demos: u64) -> String {
        format!("{}_{}_il_seed_{}_demos_{}", env, demos_origin, seed, num_demos)
    }
}

#[async_trait]
pub trait Trainer: Send + Sync {
    fn name(&self) -> &str;
    async fn train_and_evaluate(&self, trial: &Trial) -> Result<f64>;
}

/// Imitation-learning hyperparameters forwarded verbatim to the pipeline.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    /// Learning rate
    #[arg(long, default_value_t = 7e-4)]
    pub lr: f64,

    /// Entropy term coefficient
    #[arg(long, default_value_t = 0.2)]
    pub entropy_coef: f64,

    /// Number of timesteps gradient is backpropagated
    #[arg(long, default_value_t = 1)]
    pub recurrence: u32,

    /// Adam optimizer epsilon
    #[arg(long, default_value_t = 1e-5)]
    pub optim_eps: f64,

    /// Batch size (demos with memory, frames without); keep it below --min-demo
    #[arg(long, default_value_t = 50)]
    pub batch_size: u64,

    /// Don't use instructions in the model
    #[arg(long)]
    pub no_instr: bool,

    /// Instruction encoder: gru, conv, bow
    #[arg(long, default_value = "gru")]
    pub instr_arch: String,

    /// Don't use memory in the model
    #[arg(long)]
    pub no_mem: bool,

    /// Image embedding architecture: cnn1, cnn2, filmcnn
    #[arg(long, default_value = "cnn1")]
    pub arch: String,

    /// Discount factor
    #[arg(long, default_value_t = 0.99)]
    pub discount: f64,

    /// Epochs between two validation checks
    #[arg(long, default_value_t = 20)]
    pub validation_interval: u32,

    /// Episodes used for validation
    #[arg(long, default_value_t = 1000)]
    pub val_episodes: u64,

    /// Patience for early stopping
    #[arg(long, default_value_t = 3)]
    pub patience: u32,

    /// Seed for the validation environment
    #[arg(long, default_value_t = 0)]
    pub val_seed: u64,

    /// Pick the most probable action when evaluating
    #[arg(long)]
    pub argmax: bool,

    /// Ask the pipeline to log into Tensorboard
    #[arg(long)]
    pub tb: bool,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            lr: 7e-4,
            entropy_coef: 0.2,
            recurrence: 1,
            optim_eps: 1e-5,
            batch_size: 50,
            no_instr: false,
            instr_arch: "gru".to_string(),
            no_mem: false,
            arch: "cnn1".to_string(),
            discount: 0.99,
            validation_interval: 20,
            val_episodes: 1000,
            patience: 3,
            val_seed: 0,
            argmax: false,
            tb: false,
        }
    }
}

/// Runs the external train+evaluate script once per trial.
pub struct ProcessTrainer {
    program: String,
    base_args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    hyper: HyperParams,
    models_dir: PathBuf,
}

#[derive(Deserialize)]
struct TrainerOutput {
    mean_return: f64,
}

impl ProcessTrainer {
    pub fn new(config: &TrainerConfig, hyper: HyperParams, storage_dir: &Path) -> Result<Self> {
        if config.program.trim().is_empty() {
            return Err(anyhow!("Trainer program cannot be empty"));
        }

        Ok(Self {
            program: config.program.clone(),
            base_args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout_seconds.map(Duration::from_secs),
            hyper,
            models_dir: storage_dir.join("models"),
        })
    }

    /// Full argument list for one trial, after the configured base args.
    pub fn command_args(&self, trial: &Trial) -> Vec<String> {
        let h = &self.hyper;
        let mut args = self.base_args.clone();

        let mut flag = |name: &str, value: String| {
            args.push(format!("--{}", name));
            args.push(value);
        };
        flag("env", trial.env.clone());
        flag("demos-origin", trial.demos_origin.clone());
        flag("model", trial.model.clone());
        flag("episodes", trial.num_demos.to_string());
        flag("seed", trial.seed.to_string());
        flag("lr", h.lr.to_string());
        flag("entropy-coef", h.entropy_coef.to_string());
        flag("recurrence", h.recurrence.to_string());
        flag("optim-eps", h.optim_eps.to_string());
        flag("batch-size", h.batch_size.to_string());
        flag("instr-arch", h.instr_arch.clone());
        flag("arch", h.arch.clone());
        flag("discount", h.discount.to_string());
        flag("validation-interval", h.validation_interval.to_string());
        flag("val-episodes", h.val_episodes.to_string());
        flag("patience", h.patience.to_string());
        flag("val-seed", h.val_seed.to_string());
        flag("test-seed", trial.test_seed.to_string());
        flag("test-episodes", trial.test_episodes.to_string());

        for (enabled, switch) in [
            (h.no_instr, "--no-instr"),
            (h.no_mem, "--no-mem"),
            (h.argmax, "--argmax"),
            (h.tb, "--tb"),
        ] {
            if enabled {
                args.push(switch.to_string());
            }
        }
        args
    }

    pub fn run_log_path(&self, model: &str) -> PathBuf {
        self.models_dir.join(model).join("log.txt")
    }

    async fn write_run_log(&self, model: &str, stdout: &str, stderr: &str) -> Result<()> {
        let path = self.run_log_path(model);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create run log directory: {:?}", parent))?;
        }
        let contents = format!("{}\n--- stderr ---\n{}", stdout, stderr);
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write run log: {:?}", path))
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    fn name(&self) -> &str {
        &self.program
    }

    #[instrument(skip(self, trial), fields(model = %trial.model))]
    async fn train_and_evaluate(&self, trial: &Trial) -> Result<f64> {
        let args = self.command_args(trial);
        debug!("Spawning trainer: {} {:?}", self.program, args);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the wait future on timeout must not leave training running.
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn trainer '{}'", self.program))?;

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    error!("Trainer timed out after {:?}, killed", timeout);
                    return Err(anyhow!("Trainer for '{}' timed out after {:?}", trial.model, timeout));
                }
            },
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        self.write_run_log(&trial.model, &stdout, &stderr).await?;

        if !output.status.success() {
            return Err(anyhow!(
                "Trainer for '{}' failed with {}: {}",
                trial.model,
                output.status,
                stderr_tail(&stderr)
            ));
        }

        let mean_return = parse_mean_return(&stdout)
            .with_context(|| format!("Trainer for '{}' produced no usable result", trial.model))?;
        info!(mean_return, "Trial finished");
        Ok(mean_return)
    }
}

/// Read the result from the last non-empty stdout line: a bare number or a
/// JSON object with a `mean_return` field.
pub fn parse_mean_return(stdout: &str) -> Result<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or_else(|| anyhow!("Trainer printed nothing to stdout"))?;

    let value = if line.starts_with('{') {
        serde_json::from_str::<TrainerOutput>(line)
            .with_context(|| format!("Invalid trainer result line: {}", line))?
            .mean_return
    } else {
        line.parse::<f64>()
            .with_context(|| format!("Invalid trainer result line: {}", line))?
    };

    if !value.is_finite() {
        return Err(anyhow!("Trainer reported a non-finite mean return: {}", value));
    }
    Ok(value)
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
