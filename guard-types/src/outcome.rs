use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ClusterStatus;

/// Per-cluster terminal outcome of a batch run, as returned by the batch
/// runner (C10) and printed as the CLI's "per-cluster line".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterOutcome {
    pub cluster_id: String,
    pub status: ClusterStatus,
    pub error: Option<String>,
}

impl ClusterOutcome {
    pub fn ok(cluster_id: impl Into<String>, status: ClusterStatus) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            status,
            error: None,
        }
    }

    pub fn errored(cluster_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            status: ClusterStatus::Error,
            error: Some(error.into()),
        }
    }
}

/// Aggregate counts over a batch run, keyed by terminal status string —
/// this is what the CLI renders as its summary table (`total`, `success`,
/// `failed`) and what `run_batch` logs on completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRunSummary {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
}

impl BatchRunSummary {
    pub fn from_outcomes(outcomes: &[ClusterOutcome]) -> Self {
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for outcome in outcomes {
            *by_status.entry(outcome.status.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            total: outcomes.len(),
            by_status,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.by_status.get(ClusterStatus::Healthy.as_str()).copied().unwrap_or(0)
            + self.by_status.get(ClusterStatus::DryRunSuccess.as_str()).copied().unwrap_or(0)
    }

    /// True iff no cluster ended in `error` or `pre_check_failed` — the
    /// CLI's non-zero exit code condition (spec.md §6).
    pub fn any_failed(&self) -> bool {
        self.by_status.get(ClusterStatus::Error.as_str()).copied().unwrap_or(0) > 0
            || self
                .by_status
                .get(ClusterStatus::PreCheckFailed.as_str())
                .copied()
                .unwrap_or(0)
                > 0
    }
}
