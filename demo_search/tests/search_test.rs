//! End-to-end tests for the demonstration search: driver, oracle, results log
//! and report working together.

use anyhow::Result;
use async_trait::async_trait;
use demo_search::{
    oracle::{ExperimentSpec, SeededOracle},
    results::{log_path, read_rows, ResultsLog},
    search::{BinarySearch, Evaluator, SearchConfig, SearchOutcome, ViolationKind},
    trainer::{Trainer, Trial},
};
use proptest::prelude::*;
use tempfile::tempdir;

/// Returns follow a saturating curve in the number of demonstrations, with a
/// small seed-dependent offset that averages out across seeds.
struct CurveTrainer {
    cap: u64,
    scale: f64,
}

#[async_trait]
impl Trainer for CurveTrainer {
    fn name(&self) -> &str {
        "curve"
    }

    async fn train_and_evaluate(&self, trial: &Trial) -> Result<f64> {
        let base = trial.num_demos.min(self.cap) as f64 / self.cap as f64 * self.scale;
        let offset = (trial.seed as f64 - 3.0) * 0.001;
        Ok(base + offset)
    }
}

/// Wraps a plain function as an oracle.
struct FnEvaluator<F>(F);

#[async_trait]
impl<F: Fn(u64) -> f64 + Send> Evaluator for FnEvaluator<F> {
    async fn evaluate(&mut self, num_demos: u64) -> Result<f64> {
        Ok((self.0)(num_demos))
    }
}

fn spec(env: &str) -> ExperimentSpec {
    ExperimentSpec {
        env: env.to_string(),
        demos_origin: "agent".to_string(),
        test_seed: 6,
        test_episodes: 1000,
    }
}

#[tokio::test]
async fn test_seeded_search_over_capped_curve() {
    let dir = tempdir().unwrap();
    let path = log_path(dir.path(), "Env-v0");
    let log = ResultsLog::open(&path).unwrap();
    let mut oracle = SeededOracle::new(
        CurveTrainer { cap: 500, scale: 10.0 },
        spec("Env-v0"),
        vec![1, 2, 3, 4, 5],
        log,
    )
    .unwrap();

    let search = BinarySearch::new(SearchConfig { min_demo: 10, max_demo: 1000, epsilon: 0.02 }).unwrap();
    let trace = search.run(&mut oracle).await.unwrap();

    let probed: Vec<u64> = trace.probes.iter().map(|p| p.num_demos).collect();
    assert_eq!(probed, vec![10, 1000, 505, 257, 381]);
    assert_eq!(trace.outcome.answer(), Some(505));
    assert_eq!(oracle.calls(), 5);
    drop(oracle);

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 5 * 5);
    assert_eq!(rows[0].model, "Env-v0_agent_il_seed_1_demos_10");
    assert_eq!(rows[24].model, "Env-v0_agent_il_seed_5_demos_381");
}

#[tokio::test]
async fn test_non_monotonic_oracle_stops_search() {
    // Dips in the middle of the range
    let mut oracle = FnEvaluator(|n: u64| if n == 10 || n >= 1000 { n as f64 } else { 0.0 });
    let search = BinarySearch::new(SearchConfig { min_demo: 10, max_demo: 1000, epsilon: 0.02 }).unwrap();

    let trace = search.run(&mut oracle).await.unwrap();
    match trace.outcome {
        SearchOutcome::InvariantViolated(v) => assert_eq!(v.kind, ViolationKind::MidpointOutOfBounds),
        other => panic!("expected invariant violation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_range_rejected_before_any_training() {
    assert!(BinarySearch::new(SearchConfig { min_demo: 100, max_demo: 50, epsilon: 0.02 }).is_err());
}

/// Settings and arguments for running `experiment::search` against an `sh`
/// trainer whose body computes the mean return from `$n` (the `--episodes`
/// value the oracle passes down).
#[cfg(unix)]
fn sh_search(
    storage: &std::path::Path,
    body: &str,
) -> (demo_search::cli::SearchArgs, demo_search::settings::Settings) {
    use demo_search::{
        cli::{SearchArgs, TrainingArgs},
        settings::{Settings, TrainerConfig},
        trainer::HyperParams,
    };

    let script = format!(
        r#"
n=0
while [ $# -gt 0 ]; do
  if [ "$1" = "--episodes" ]; then n=$2; fi
  shift
done
{}
"#,
        body
    );

    let mut settings = Settings::default();
    settings.storage_dir = storage.to_path_buf();
    settings.search.seeds = vec![1, 2];
    settings.trainer = TrainerConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script, "trainer".to_string()],
        working_dir: None,
        timeout_seconds: Some(60),
    };

    let args = SearchArgs {
        training: TrainingArgs {
            env: "Env-v0".to_string(),
            demos_origin: "agent".to_string(),
            test_seed: 6,
            test_episodes: 10,
            hyper: HyperParams { batch_size: 5, ..HyperParams::default() },
        },
        min_demo: 10,
        max_demo: 1000,
        epsilon: 0.02,
    };
    (args, settings)
}

#[cfg(unix)]
fn read_report(storage: &std::path::Path) -> serde_json::Value {
    let path = demo_search::results::report_path(storage, "Env-v0");
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[cfg(unix)]
#[tokio::test]
async fn test_search_command_with_process_trainer() {
    let dir = tempdir().unwrap();
    let (args, settings) = sh_search(
        dir.path(),
        r#"awk -v n="$n" 'BEGIN { if (n > 500) n = 500; print n / 500 * 10 }'"#,
    );

    demo_search::experiment::search(args, &settings).await.unwrap();

    let rows = read_rows(&log_path(dir.path(), "Env-v0")).unwrap();
    assert_eq!(rows.len(), 5 * 2);

    let report = read_report(dir.path());
    assert_eq!(report["outcome"]["status"], "range_exhausted");
    assert_eq!(report["outcome"]["answer"], 505);
    assert_eq!(report["seeds"], serde_json::json!([1, 2]));
    assert!(dir
        .path()
        .join("models/Env-v0_agent_il_seed_2_demos_505/log.txt")
        .exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_search_command_fails_on_non_monotonic_trainer() {
    let dir = tempdir().unwrap();
    // Boundaries return their demo count, everything in between returns 0.
    let (args, settings) = sh_search(
        dir.path(),
        r#"if [ "$n" -eq 10 ] || [ "$n" -ge 1000 ]; then echo "$n"; else echo 0; fi"#,
    );

    let err = demo_search::experiment::search(args, &settings).await.unwrap_err();
    assert!(err.to_string().contains("after 3 oracle calls"));

    // 10, 1000 and the rejected midpoint 505, two seeds each
    let rows = read_rows(&log_path(dir.path(), "Env-v0")).unwrap();
    assert_eq!(rows.len(), 3 * 2);

    let report = read_report(dir.path());
    assert_eq!(report["outcome"]["status"], "invariant_violated");
    assert_eq!(report["outcome"]["kind"], "midpoint_out_of_bounds");
    assert_eq!(report["outcome"]["mid"], 505);
}

proptest! {
    #[test]
    fn prop_monotonic_oracle_answer_within_range(
        low in 1u64..2_000,
        factor in 2u64..200,
        cap in 1u64..400_000,
        epsilon in 0.0f64..0.5,
    ) {
        let high = low * factor;
        let curve = move |n: u64| n.min(cap) as f64 / cap as f64;
        let search = BinarySearch::new(SearchConfig { min_demo: low, max_demo: high, epsilon }).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let trace = runtime.block_on(search.run(&mut FnEvaluator(curve))).unwrap();

        let answer = trace.outcome.answer();
        prop_assert!(answer.is_some(), "unexpected outcome {:?}", trace.outcome);
        let answer = answer.unwrap();
        prop_assert!(low <= answer && answer <= high);
        prop_assert!(trace.probes.iter().all(|p| low <= p.num_demos && p.num_demos <= high));
        if let SearchOutcome::Converged { .. } = trace.outcome {
            prop_assert!(curve(answer) >= curve(high) - epsilon - 1e-12);
        }
    }
}
