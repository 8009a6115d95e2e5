//! Multi-seed evaluation oracle.
//!
//! `evaluate(n)` trains and evaluates one agent per seed on `n`
//! demonstrations, logs one row per seed, and returns the mean of the
//! per-seed returns. Seeds run one after another; the first failure aborts.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::results::ResultsLog;
use crate::search::Evaluator;
use crate::trainer::{Trainer, Trial};

/// Fixed parts of every trial in one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub env: String,
    pub demos_origin: String,
    pub test_seed: u64,
    pub test_episodes: u64,
}

impl ExperimentSpec {
    pub fn trial(&self, seed: u64, num_demos: u64) -> Trial {
        Trial {
            model: Trial::model_name(&self.env, &self.demos_origin, seed, num_demos),
            env: self.env.clone(),
            demos_origin: self.demos_origin.clone(),
            seed,
            num_demos,
            test_seed: self.test_seed,
            test_episodes: self.test_episodes,
        }
    }
}

pub struct SeededOracle<T> {
    trainer: T,
    spec: ExperimentSpec,
    seeds: Vec<u64>,
    log: ResultsLog,
    calls: u32,
}

impl<T: Trainer> SeededOracle<T> {
    pub fn new(trainer: T, spec: ExperimentSpec, seeds: Vec<u64>, log: ResultsLog) -> Result<Self> {
        if seeds.is_empty() {
            return Err(anyhow!("The oracle needs at least one seed"));
        }
        Ok(Self { trainer, spec, seeds, log, calls: 0 })
    }

    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    /// Number of completed `evaluate` calls.
    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Give back the results log, closing the oracle.
    pub fn into_log(self) -> ResultsLog {
        self.log
    }
}

#[async_trait]
impl<T: Trainer> Evaluator for SeededOracle<T> {
    #[instrument(skip(self), fields(env = %self.spec.env))]
    async fn evaluate(&mut self, num_demos: u64) -> Result<f64> {
        let mut returns = Vec::with_capacity(self.seeds.len());

        for &seed in &self.seeds {
            let trial = self.spec.trial(seed, num_demos);
            info!(seed, num_demos, "Training {}", trial.model);

            let mean_return = self
                .trainer
                .train_and_evaluate(&trial)
                .await
                .with_context(|| format!("Trial '{}' failed", trial.model))?;

            self.log.append(&trial.model, mean_return)?;
            returns.push(mean_return);
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        self.calls += 1;
        info!(num_demos, mean_return = mean, "Evaluated {} seeds", returns.len());
        Ok(mean)
    }
}
