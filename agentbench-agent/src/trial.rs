//! Trial harness
//!
//! Runs one agent on one task prompt inside a fresh isolated directory,
//! grades what it left behind and records the result. Provider failures and
//! deadline overruns become part of the record instead of aborting a batch.

use crate::agent::AgentLoop;
use crate::grader::{GradeReport, Grader};
use agentbench_core::isolation::{make_path_safe, IsolatedDir};
use agentbench_core::{Conversation, LlmProvider, Result, Usage};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Short description of the open-data layout given to the model
pub const ECMWF_API_NOTES: &str = "\
ECMWF open data is served over plain HTTPS from https://data.ecmwf.int/forecasts.
Files follow the pattern
  {ROOT}/{yyyymmdd}/{HH}z/{model}/{resol}/{stream}/{yyyymmdd}{HH}0000-{step}{U}-{stream}-{type}.{format}
where HH is one of 00, 06, 12, 18; model is ifs; resol is 0p25; stream is one of
oper, enfo, waef, wave, scda, scwv, mmsf; step is the forecast step and U its unit (h);
type is one of fc, ef, ep, tf; format is grib2 or bufr.
Only the most recent few days of forecasts are kept on the server.
";

/// Result recorded for tool calls cut off by the trial deadline
pub const DEADLINE_CANCELLED: &str = "cancelled: deadline elapsed";

/// A named task prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPrompt {
    pub name: String,
    pub text: String,
}

impl TaskPrompt {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// The baseline download task for a forecast date. ECMWF only keeps
    /// recent forecasts, so the date should be within a couple of days.
    pub fn baseline(date: NaiveDate) -> Self {
        let text = format!(
            "Please download a short time forecast from ECMWF for the current date {}.\n\
             The forecast should start at 06:00 UTC and have a step size of 24 hours.\n\
             The forecast should be in grib2 format and saved in the current directory.\n\
             \n\
             After downloading the data, please verify it was downloaded successfully.\n\
             An easy way to do this is by checking the file size, which should be on the order of 100 MB\n\
             \n\
             Here is the documentation for using the ECMWF API:\n{}",
            date.format("%Y-%m-%d"),
            ECMWF_API_NOTES
        );
        Self::new("baseline", text)
    }
}

/// Trial harness settings
#[derive(Debug, Clone)]
pub struct TrialConfig {
    /// Parent directory for all trial workdirs
    pub runs_dir: PathBuf,
    /// Workdir name; `{timestamp}` and `{model}` are substituted
    pub template: String,
    /// Remove the workdir if the agent wrote nothing
    pub delete_empty: bool,
    /// Hard ceiling for one trial
    pub deadline: Option<Duration>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("runs"),
            template: "{timestamp}--{model}".to_string(),
            delete_empty: true,
            deadline: None,
        }
    }
}

impl TrialConfig {
    pub fn with_runs_dir(mut self, runs_dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = runs_dir.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_delete_empty(mut self, delete_empty: bool) -> Self {
        self.delete_empty = delete_empty;
        self
    }

    /// Directory template for a model, ready for `IsolatedDir::enter`
    pub fn workdir_template(&self, model: &str) -> String {
        let name = self.template.replace("{model}", &make_path_safe(model));
        self.runs_dir.join(name).to_string_lossy().into_owned()
    }
}

/// How the agent run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    /// The model stopped requesting tools
    Completed,
    /// A model round could not be started
    ProviderFailed { error: String },
    /// The deadline elapsed first
    TimedOut { after_secs: u64 },
}

impl TrialOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TrialOutcome::Completed)
    }
}

/// Everything recorded about one trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub model: String,
    pub prompt_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rounds: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    #[serde(default)]
    pub usage: Usage,
    pub outcome: TrialOutcome,
    pub grade: GradeReport,
    pub workdir: PathBuf,
    pub transcript: Conversation,
}

impl TrialRecord {
    /// Completed and graded successful
    pub fn success(&self) -> bool {
        self.outcome.is_completed() && self.grade.success
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Run one trial.
///
/// The agent works inside a fresh directory under `config.runs_dir`; the
/// previous working directory is restored before this returns. Only a
/// failure to set up the directory is an `Err`.
pub async fn run_trial<P: LlmProvider>(
    mut agent: AgentLoop<P>,
    prompt: &TaskPrompt,
    grader: &dyn Grader,
    config: &TrialConfig,
) -> Result<TrialRecord> {
    let model = agent.model().to_string();
    let dir = IsolatedDir::enter(&config.workdir_template(&model), config.delete_empty)?;
    let workdir = dir.path().to_path_buf();
    let started_at = Utc::now();
    info!(model = %model, prompt = %prompt.name, workdir = %workdir.display(), "trial started");

    let result = match config.deadline {
        Some(deadline) => match tokio::time::timeout(deadline, agent.run(&prompt.text)).await {
            Ok(result) => Some(result),
            Err(_) => None,
        },
        None => Some(agent.run(&prompt.text).await),
    };

    let outcome = match result {
        Some(Ok(_)) => TrialOutcome::Completed,
        Some(Err(err)) => {
            warn!(model = %model, error = %err, "trial aborted by provider failure");
            TrialOutcome::ProviderFailed {
                error: err.to_string(),
            }
        }
        None => {
            let after_secs = config.deadline.map(|d| d.as_secs()).unwrap_or_default();
            warn!(model = %model, after_secs, "trial deadline elapsed");
            agent.cancel_pending(DEADLINE_CANCELLED)?;
            TrialOutcome::TimedOut { after_secs }
        }
    };

    // grade before the guard can reclaim an empty directory
    let grade = grader.grade(agent.conversation(), &workdir);
    drop(dir);
    let finished_at = Utc::now();

    let summary = agent.summary().clone();
    info!(
        model = %model,
        success = outcome.is_completed() && grade.success,
        rounds = summary.rounds,
        tool_calls = summary.tool_calls,
        "trial finished"
    );

    Ok(TrialRecord {
        model,
        prompt_name: prompt.name.clone(),
        started_at,
        finished_at,
        rounds: summary.rounds,
        tool_calls: summary.tool_calls,
        tool_errors: summary.tool_errors,
        usage: summary.usage,
        outcome,
        grade,
        workdir,
        transcript: agent.into_conversation(),
    })
}
