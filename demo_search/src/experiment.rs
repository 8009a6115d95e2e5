//! Wiring for the CLI commands.
//!
//! Builds the trainer, the results log and the oracle from settings and
//! arguments, runs the search (or a single probe), prints the answer, and
//! persists the report.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    cli::{ProbeArgs, SearchArgs, TrainingArgs},
    oracle::SeededOracle,
    results::{self, ReportBuilder, ResultsLog, SearchReport},
    search::{BinarySearch, Evaluator, SearchOutcome},
    settings::Settings,
    trainer::{ProcessTrainer, Trainer},
};

/// Run the demonstration-count search described by `args`.
#[instrument(skip(args, settings), fields(env = %args.training.env))]
pub async fn search(args: SearchArgs, settings: &Settings) -> Result<()> {
    let config = args.search_config();
    if args.training.hyper.batch_size > config.min_demo {
        warn!(
            "Batch size {} should be smaller than --min-demo {}",
            args.training.hyper.batch_size, config.min_demo
        );
    }

    let search = BinarySearch::new(config.clone()).context("Invalid search range")?;
    let mut oracle = build_oracle(&args.training, settings)?;

    let report = ReportBuilder {
        run_id: Uuid::new_v4(),
        env: args.training.env.clone(),
        demos_origin: args.training.demos_origin.clone(),
        trainer: oracle.trainer().name().to_string(),
        config,
        seeds: oracle.seeds().to_vec(),
        started_at: Utc::now(),
    };
    info!(run_id = %report.run_id, seeds = ?report.seeds, "Starting demonstration search");

    let trace = search.run(&mut oracle).await?;
    let log = oracle.into_log();
    info!("{} trial rows written to {:?}", log.rows_written(), log.path());
    drop(log);

    let report = report.finish(trace);
    results::save_report(&report, &results::report_path(&settings.storage_dir, &report.env))
        .context("Failed to save search report")?;

    print_outcome(&report)
}

/// Evaluate every seed at one demonstration count and print the mean.
#[instrument(skip(args, settings), fields(env = %args.training.env))]
pub async fn probe(args: ProbeArgs, settings: &Settings) -> Result<()> {
    if args.demos == 0 {
        return Err(anyhow!("--demos must be a positive integer"));
    }

    let mut oracle = build_oracle(&args.training, settings)?;
    let mean_return = oracle.evaluate(args.demos).await?;

    println!("Mean return for {} demos = {}", args.demos, mean_return);
    Ok(())
}

fn build_oracle(training: &TrainingArgs, settings: &Settings) -> Result<SeededOracle<ProcessTrainer>> {
    let trainer = ProcessTrainer::new(&settings.trainer, training.hyper.clone(), &settings.storage_dir)?;
    let log = ResultsLog::open(results::log_path(&settings.storage_dir, &training.env))?;
    SeededOracle::new(trainer, training.experiment(), settings.search.seeds.clone(), log)
}

/// Lines printed to stdout for a finished search, or the error that
/// aborts it when returns were not monotonic.
pub fn outcome_lines(report: &SearchReport) -> Result<Vec<String>> {
    match &report.outcome {
        SearchOutcome::Converged { answer } => {
            Ok(vec![format!("Minimum No. of Samples Required = {}", answer)])
        }
        SearchOutcome::RangeExhausted { answer, log2_ratio } => Ok(vec![
            format!("Minimum No. of Samples Required = {}", answer),
            format!("Ratio : {:.3}", log2_ratio),
        ]),
        SearchOutcome::InvariantViolated(violation) => Err(anyhow!(
            "Search aborted after {} oracle calls: {}",
            report.probes.len(),
            violation
        )),
    }
}

fn print_outcome(report: &SearchReport) -> Result<()> {
    let lines = outcome_lines(report).map_err(|e| {
        error!(run_id = %report.run_id, "Returns are not monotonic in the number of demonstrations");
        e
    })?;
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}
