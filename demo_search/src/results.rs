//! Persisted search artefacts: the append-only trial log and the JSON report.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::search::{Probe, SearchConfig, SearchOutcome, SearchTrace};

pub const RESULTS_SUBDIR: &str = "binary_search_results";

pub fn results_dir(storage_dir: &Path) -> PathBuf {
    storage_dir.join(RESULTS_SUBDIR)
}

pub fn log_path(storage_dir: &Path, env: &str) -> PathBuf {
    results_dir(storage_dir).join(format!("{}_binary_search.csv", env))
}

pub fn report_path(storage_dir: &Path, env: &str) -> PathBuf {
    results_dir(storage_dir).join(format!("{}_binary_search_report.json", env))
}

/// Space-delimited `model_identifier mean_return` rows, opened in append mode.
///
/// The file handle lives as long as the value; every row is flushed as soon
/// as it is written so a crash mid-search keeps all completed trials.
pub struct ResultsLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rows_written: usize,
}

impl ResultsLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create results directory: {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open results log: {:?}", path))?;

        info!("Appending trial results to {:?}", path);
        Ok(Self { path, writer: BufWriter::new(file), rows_written: 0 })
    }

    pub fn append(&mut self, model: &str, mean_return: f64) -> Result<()> {
        writeln!(self.writer, "{} {}", model, mean_return)
            .and_then(|_| self.writer.flush())
            .with_context(|| format!("Failed to write to results log: {:?}", self.path))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl Drop for ResultsLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush results log {:?}: {}", self.path, e);
        }
    }
}

/// One parsed row of a results log.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRow {
    pub model: String,
    pub mean_return: f64,
}

/// Read back a results log, skipping blank lines.
pub fn read_rows(path: &Path) -> Result<Vec<TrialRow>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read results log: {:?}", path))?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| -> Result<TrialRow> {
            let (model, value) = line
                .trim()
                .rsplit_once(' ')
                .with_context(|| format!("{:?}:{}: expected two columns", path, idx + 1))?;
            let mean_return = value
                .parse::<f64>()
                .with_context(|| format!("{:?}:{}: invalid mean return '{}'", path, idx + 1, value))?;
            Ok(TrialRow { model: model.to_string(), mean_return })
        })
        .collect()
}

/// Everything known about one finished search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub run_id: Uuid,
    pub env: String,
    pub demos_origin: String,
    pub trainer: String,
    pub config: SearchConfig,
    pub seeds: Vec<u64>,
    pub outcome: SearchOutcome,
    pub probes: Vec<Probe>,
    pub iterations: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SearchReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

pub struct ReportBuilder {
    pub run_id: Uuid,
    pub env: String,
    pub demos_origin: String,
    pub trainer: String,
    pub config: SearchConfig,
    pub seeds: Vec<u64>,
    pub started_at: DateTime<Utc>,
}

impl ReportBuilder {
    pub fn finish(self, trace: SearchTrace) -> SearchReport {
        SearchReport {
            run_id: self.run_id,
            env: self.env,
            demos_origin: self.demos_origin,
            trainer: self.trainer,
            config: self.config,
            seeds: self.seeds,
            outcome: trace.outcome,
            probes: trace.probes,
            iterations: trace.iterations,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Save a search report as pretty JSON, replacing any previous one.
pub fn save_report(report: &SearchReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize search report")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {:?}", parent))?;
    }
    fs::write(path, json)
        .with_context(|| format!("Failed to write report to: {:?}", path))?;

    info!("Search report saved to: {:?}", path);
    Ok(())
}
