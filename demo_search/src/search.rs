//! Adaptive sample-size search.
//!
//! Drives a black-box [`Evaluator`] with a binary search over the number of
//! demonstrations, looking for the smallest count whose mean return is within
//! `epsilon` of the best return seen so far. Every evaluation trains one agent
//! per seed, so the driver keeps the number of oracle calls to a minimum: both
//! boundaries once, then one midpoint per iteration.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Once `log2(high / low)` drops to this value the range can no longer be
/// halved meaningfully and the upper bound is reported.
pub const MIN_LOG2_RATIO: f64 = 0.5;

/// Anything that can turn a demonstration count into a mean return.
#[async_trait]
pub trait Evaluator: Send {
    async fn evaluate(&mut self, num_demos: u64) -> Result<f64>;
}

/// Caller-supplied search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub min_demo: u64,
    pub max_demo: u64,
    /// Tolerable gap between a candidate's return and the best return seen.
    pub epsilon: f64,
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_demo == 0 {
            return Err(anyhow!("min_demo must be a positive integer"));
        }
        if self.min_demo >= self.max_demo {
            return Err(anyhow!(
                "min_demo ({}) must be smaller than max_demo ({})",
                self.min_demo,
                self.max_demo
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(anyhow!("epsilon must be a finite non-negative number, got {}", self.epsilon));
        }
        Ok(())
    }
}

/// Current bounds on the demonstration count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRange {
    pub low: u64,
    pub high: u64,
}

impl SearchRange {
    /// Floor of the arithmetic mean.
    pub fn midpoint(&self) -> u64 {
        // low + (high - low) / 2 == (low + high) / 2 for low <= high, without overflow
        self.low + (self.high - self.low) / 2
    }

    pub fn log2_ratio(&self) -> f64 {
        (self.high as f64 / self.low as f64).log2()
    }

    pub fn is_exhausted(&self) -> bool {
        self.log2_ratio() <= MIN_LOG2_RATIO
    }
}

/// Mutable state carried between iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchState {
    pub range: SearchRange,
    pub return_low: f64,
    pub return_high: f64,
    /// Never decreases.
    pub best_return_seen: f64,
}

/// One oracle call, in the order it was made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub num_demos: u64,
    pub mean_return: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// `return_high < return_low` at the top of an iteration.
    BoundsInverted,
    /// The midpoint's return fell outside `[return_low, return_high]`.
    MidpointOutOfBounds,
}

/// Evidence that returns were not monotonic in the demonstration count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub kind: ViolationKind,
    pub low: u64,
    pub high: u64,
    pub return_low: f64,
    pub return_high: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_mid: Option<f64>,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::BoundsInverted => write!(
                f,
                "return at {} demos ({}) is below return at {} demos ({})",
                self.high, self.return_high, self.low, self.return_low
            ),
            ViolationKind::MidpointOutOfBounds => write!(
                f,
                "return at {} demos ({}) is outside [{}, {}] spanned by {}..{} demos",
                self.mid.unwrap_or_default(),
                self.return_mid.unwrap_or(f64::NAN),
                self.return_low,
                self.return_high,
                self.low,
                self.high
            ),
        }
    }
}

/// How a search ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// The lower bound is already within tolerance of the best return.
    Converged { answer: u64 },
    /// The range is too narrow to split; the larger bound is reported.
    RangeExhausted { answer: u64, log2_ratio: f64 },
    /// Evaluation noise broke the monotonicity the search relies on.
    InvariantViolated(InvariantViolation),
}

impl SearchOutcome {
    pub fn answer(&self) -> Option<u64> {
        match self {
            SearchOutcome::Converged { answer } | SearchOutcome::RangeExhausted { answer, .. } => {
                Some(*answer)
            }
            SearchOutcome::InvariantViolated(_) => None,
        }
    }
}

/// Outcome plus every probe that led to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTrace {
    pub outcome: SearchOutcome,
    pub probes: Vec<Probe>,
    pub iterations: u32,
}

/// What a single iteration decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Done(SearchOutcome),
    /// Split at `mid`; carries the probe that was made.
    Narrowed(Probe),
}

pub struct BinarySearch {
    config: SearchConfig,
}

impl BinarySearch {
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Evaluate both boundaries and iterate until a terminal outcome.
    #[instrument(skip(self, evaluator), fields(min_demo = self.config.min_demo, max_demo = self.config.max_demo))]
    pub async fn run<E: Evaluator + ?Sized>(&self, evaluator: &mut E) -> Result<SearchTrace> {
        let mut probes = Vec::new();

        let return_low = evaluator.evaluate(self.config.min_demo).await?;
        probes.push(Probe { num_demos: self.config.min_demo, mean_return: return_low });
        let return_high = evaluator.evaluate(self.config.max_demo).await?;
        probes.push(Probe { num_demos: self.config.max_demo, mean_return: return_high });

        info!(return_low, return_high, "Boundary evaluations complete");

        let mut state = SearchState {
            range: SearchRange { low: self.config.min_demo, high: self.config.max_demo },
            return_low,
            return_high,
            best_return_seen: return_high,
        };

        let mut iterations = 0;
        loop {
            match self.step(&mut state, evaluator).await? {
                Step::Done(outcome) => {
                    match &outcome {
                        SearchOutcome::InvariantViolated(v) => warn!("Search stopped: {}", v),
                        other => info!(?other, iterations, "Search finished"),
                    }
                    return Ok(SearchTrace { outcome, probes, iterations });
                }
                Step::Narrowed(probe) => {
                    probes.push(probe);
                    iterations += 1;
                }
            }
        }
    }

    /// Run one iteration of the state machine against `state`.
    pub async fn step<E: Evaluator + ?Sized>(
        &self,
        state: &mut SearchState,
        evaluator: &mut E,
    ) -> Result<Step> {
        let SearchRange { low, high } = state.range;

        if state.return_high < state.return_low {
            return Ok(Step::Done(SearchOutcome::InvariantViolated(InvariantViolation {
                kind: ViolationKind::BoundsInverted,
                low,
                high,
                return_low: state.return_low,
                return_high: state.return_high,
                mid: None,
                return_mid: None,
            })));
        }

        if state.best_return_seen - state.return_low <= self.config.epsilon {
            return Ok(Step::Done(SearchOutcome::Converged { answer: low }));
        }

        if state.range.is_exhausted() {
            return Ok(Step::Done(SearchOutcome::RangeExhausted {
                answer: high,
                log2_ratio: state.range.log2_ratio(),
            }));
        }

        let mid = state.range.midpoint();
        let return_mid = evaluator.evaluate(mid).await?;
        debug!(low, mid, high, return_mid, "Evaluated midpoint");

        if return_mid < state.return_low || return_mid > state.return_high {
            return Ok(Step::Done(SearchOutcome::InvariantViolated(InvariantViolation {
                kind: ViolationKind::MidpointOutOfBounds,
                low,
                high,
                return_low: state.return_low,
                return_high: state.return_high,
                mid: Some(mid),
                return_mid: Some(return_mid),
            })));
        }

        // The upper bound is assumed to track the ceiling of achievable
        // performance, so the bar follows return_high rather than return_mid.
        state.best_return_seen = state.best_return_seen.max(state.return_high);

        if state.best_return_seen - return_mid >= self.config.epsilon {
            state.range.low = mid;
            state.return_low = return_mid;
        } else {
            state.range.high = mid;
            state.return_high = return_mid;
        }

        Ok(Step::Narrowed(Probe { num_demos: mid, mean_return: return_mid }))
    }
}
