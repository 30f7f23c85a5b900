//! Results ledger
//!
//! A JSON array of `TrialRecord`s on disk. Appends re-read the file first
//! so that records written by earlier runs are kept.

use crate::trial::{TrialOutcome, TrialRecord};
use agentbench_core::error::serialization;
use agentbench_core::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_LEDGER: &str = "runs/ledger.json";

/// Aggregated results for one model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub trials: usize,
    pub successes: usize,
    pub provider_failures: usize,
    pub timeouts: usize,
    pub mean_rounds: f64,
}

impl ModelStats {
    pub fn success_rate(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.successes as f64 / self.trials as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    records: Vec<TrialRecord>,
}

impl Ledger {
    /// Load a ledger. A missing file is an empty ledger.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = read_records(&path)?;
        debug!(path = %path.display(), records = records.len(), "ledger loaded");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record and write the whole ledger back, pretty-printed.
    pub fn append(&mut self, record: TrialRecord) -> Result<()> {
        self.records = read_records(&self.path)?;
        self.records.push(record);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::from(e)
                    .with_operation("Ledger::append")
                    .with_context("path", parent.display().to_string())
            })?;
        }

        let content = serde_json::to_string_pretty(&self.records).map_err(serialization)?;
        fs::write(&self.path, content).map_err(|e| {
            Error::from(e)
                .with_operation("Ledger::append")
                .with_context("path", self.path.display().to_string())
        })?;
        debug!(path = %self.path.display(), records = self.records.len(), "ledger written");
        Ok(())
    }

    /// Fraction of successful trials for a model, `None` if it has none
    pub fn success_rate(&self, model: &str) -> Option<f64> {
        let trials: Vec<_> = self.records.iter().filter(|r| r.model == model).collect();
        if trials.is_empty() {
            return None;
        }
        let successes = trials.iter().filter(|r| r.success()).count();
        Some(successes as f64 / trials.len() as f64)
    }

    /// Per-model statistics, sorted by model name
    pub fn stats(&self) -> Vec<ModelStats> {
        let mut by_model: BTreeMap<&str, (ModelStats, usize)> = BTreeMap::new();

        for record in &self.records {
            let (stats, rounds) = by_model.entry(record.model.as_str()).or_insert_with(|| {
                (
                    ModelStats {
                        model: record.model.clone(),
                        ..Default::default()
                    },
                    0,
                )
            });
            stats.trials += 1;
            *rounds += record.rounds;
            if record.success() {
                stats.successes += 1;
            }
            match record.outcome {
                TrialOutcome::ProviderFailed { .. } => stats.provider_failures += 1,
                TrialOutcome::TimedOut { .. } => stats.timeouts += 1,
                TrialOutcome::Completed => {}
            }
        }

        by_model
            .into_values()
            .map(|(mut stats, rounds)| {
                stats.mean_rounds = rounds as f64 / stats.trials as f64;
                stats
            })
            .collect()
    }
}

fn read_records(path: &Path) -> Result<Vec<TrialRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::from(e)
                .with_operation("Ledger::load")
                .with_context("path", path.display().to_string()))
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|e| {
        Error::parse_failed(format!("invalid ledger {}: {}", path.display(), e))
            .with_operation("Ledger::load")
            .set_source(e)
    })
}
