//! Command-line interface definitions using clap derive API.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::oracle::ExperimentSpec;
use crate::search::SearchConfig;
use crate::trainer::HyperParams;

/// Binary search for the number of demonstrations an imitation-learning
/// agent needs to get within epsilon of its best performance.
#[derive(Parser, Debug)]
#[command(name = "demo-search")]
#[command(version)]
pub struct Cli {
    /// Additional configuration file layered over the defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the minimum number of demonstrations within [--min-demo, --max-demo]
    Search(SearchArgs),
    /// Train and evaluate every seed at a single demonstration count
    Probe(ProbeArgs),
}

/// Flags shared by every command that trains agents.
#[derive(Args, Debug, Clone)]
pub struct TrainingArgs {
    /// Name of the environment to train on
    #[arg(long)]
    pub env: String,

    /// Origin of the demonstrations: human | agent
    #[arg(long)]
    pub demos_origin: String,

    /// Seed used for testing a model
    #[arg(long, default_value_t = 6)]
    pub test_seed: u64,

    /// Number of episodes used for testing
    #[arg(long, default_value_t = 1000)]
    pub test_episodes: u64,

    #[command(flatten)]
    pub hyper: HyperParams,
}

impl TrainingArgs {
    pub fn experiment(&self) -> ExperimentSpec {
        ExperimentSpec {
            env: self.env.clone(),
            demos_origin: self.demos_origin.clone(),
            test_seed: self.test_seed,
            test_episodes: self.test_episodes,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub training: TrainingArgs,

    /// The minimum number of demonstrations to start searching
    #[arg(long, default_value_t = 50)]
    pub min_demo: u64,

    /// The maximum number of demonstrations to start searching
    #[arg(long, default_value_t = 3000)]
    pub max_demo: u64,

    /// Tolerable difference between mean returns
    #[arg(long, default_value_t = 0.02)]
    pub epsilon: f64,
}

impl SearchArgs {
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            min_demo: self.min_demo,
            max_demo: self.max_demo,
            epsilon: self.epsilon,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub training: TrainingArgs,

    /// Number of demonstrations to train on
    #[arg(long)]
    pub demos: u64,
}
