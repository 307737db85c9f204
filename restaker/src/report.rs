//! Run outcomes and how they are persisted

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::countdown::Countdown;
use crate::eligibility::EligibilityDecision;
use crate::errors::RestakeError;
use crate::workflow::Stage;

/// Terminal status of one run. Exactly one is produced per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Succeeded,
    Skipped,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Failed => "failed",
        }
    }

    /// Whether the scheduler should treat the run as healthy.
    pub fn is_ok(&self) -> bool {
        !matches!(self, RunOutcome::Failed)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended without claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The countdown is further away than the threshold.
    PlentyOfTime {
        remaining: Countdown,
        threshold: Countdown,
    },
    /// The claim control is rendered but disabled.
    NothingToClaim,
}

impl SkipReason {
    pub fn describe(&self) -> String {
        match self {
            SkipReason::PlentyOfTime {
                remaining,
                threshold,
            } => format!("{remaining} remaining exceeds the {threshold} threshold"),
            SkipReason::NothingToClaim => "claim control is disabled, nothing to claim".to_string(),
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<EligibilityDecision>,
    pub completed_stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn message(&self) -> String {
        match self.outcome {
            RunOutcome::Succeeded => "Claimed and restaked".to_string(),
            RunOutcome::Skipped => self
                .skip_reason
                .map(|reason| reason.describe())
                .unwrap_or_else(|| "Run skipped".to_string()),
            RunOutcome::Failed => match (&self.failed_stage, &self.error) {
                (Some(stage), Some(error)) => format!("{stage} failed: {error}"),
                (None, Some(error)) => error.clone(),
                _ => "Run failed".to_string(),
            },
        }
    }
}

/// The durable artifact left for the invoking environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusArtifact {
    pub status: RunOutcome,
}

/// Persists the outcome of a run.
#[async_trait]
pub trait RunReporter: Send + Sync {
    async fn report(&self, report: &RunReport) -> Result<(), RestakeError>;
}

/// Writes `{"status": "..."}` to a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStatusReporter {
    path: PathBuf,
}

impl JsonStatusReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RunReporter for JsonStatusReporter {
    async fn report(&self, report: &RunReport) -> Result<(), RestakeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let artifact = StatusArtifact {
            status: report.outcome,
        };
        tokio::fs::write(&self.path, serde_json::to_vec(&artifact)?).await?;
        info!(path = %self.path.display(), status = %report.outcome, "Wrote run status");
        Ok(())
    }
}
