use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Datadog tag triple attached to every metric query issued for a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatadogTags {
    pub cluster: String,
    pub service: String,
    pub env: String,
}

/// Tagged state machine for a managed cluster's upgrade lifecycle.
///
/// Transitions: `pending -> pre_check_running -> pre_check_failed | mr_created
/// -> upgrading -> validating -> healthy | validation_failed -> rolling_back
/// -> rolled_back`. The terminal set is `{healthy, pre_check_failed,
/// rolled_back}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Pending,
    PreCheckRunning,
    PreCheckFailed,
    MrCreated,
    Upgrading,
    Validating,
    Healthy,
    ValidationFailed,
    RollingBack,
    RolledBack,
    /// Not part of the state machine proper: assigned to a cluster whose
    /// per-cluster pipeline task raised an unhandled error. Never reached
    /// via `update_status_atomic`'s CAS path.
    Error,
    /// Assigned when the batch runner short-circuits at the GitOps step
    /// because the run was invoked with `dry_run = true`.
    DryRunSuccess,
}

impl ClusterStatus {
    /// A cluster in a terminal status will never transition again during
    /// this run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClusterStatus::Healthy | ClusterStatus::PreCheckFailed | ClusterStatus::RolledBack
        )
    }

    /// `validate_batch_prerequisites` treats the legacy string `"completed"`
    /// as synonymous with `Healthy` — preserved intentionally from the
    /// source system for forward-compat (see DESIGN.md open questions).
    pub fn satisfies_prerequisite(status_str: &str) -> bool {
        matches!(status_str, "healthy" | "completed")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Pending => "pending",
            ClusterStatus::PreCheckRunning => "pre_check_running",
            ClusterStatus::PreCheckFailed => "pre_check_failed",
            ClusterStatus::MrCreated => "mr_created",
            ClusterStatus::Upgrading => "upgrading",
            ClusterStatus::Validating => "validating",
            ClusterStatus::Healthy => "healthy",
            ClusterStatus::ValidationFailed => "validation_failed",
            ClusterStatus::RollingBack => "rolling_back",
            ClusterStatus::RolledBack => "rolled_back",
            ClusterStatus::Error => "error",
            ClusterStatus::DryRunSuccess => "dry_run_success",
        }
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor of a managed cluster, as persisted by the cluster
/// registry (C1). `status`, `last_updated`, and `version` are the only
/// fields mutated in place, and only through `update_status_atomic`'s CAS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub batch_id: String,
    pub environment: String,
    pub region: String,
    pub gitlab_repo: String,
    pub flux_config_path: String,
    pub cloud_role_arn: String,
    pub current_istio_version: String,
    pub datadog_tags: DatadogTags,
    pub owner_team: String,
    pub owner_handle: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub status: ClusterStatus,
    pub last_updated: DateTime<Utc>,
    /// Monotonic counter bumped on every successful CAS transition; used
    /// as the optimistic-concurrency guard by the registry.
    pub version: u64,
}

impl ClusterConfig {
    /// Convenience constructor for tests and the CLI's reference fixtures:
    /// a brand-new cluster starts `pending` at version 0.
    pub fn new(
        cluster_id: impl Into<String>,
        batch_id: impl Into<String>,
        gitlab_repo: impl Into<String>,
        flux_config_path: impl Into<String>,
        current_istio_version: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            batch_id: batch_id.into(),
            environment: String::new(),
            region: String::new(),
            gitlab_repo: gitlab_repo.into(),
            flux_config_path: flux_config_path.into(),
            cloud_role_arn: String::new(),
            current_istio_version: current_istio_version.into(),
            datadog_tags: DatadogTags {
                cluster: String::new(),
                service: String::new(),
                env: String::new(),
            },
            owner_team: String::new(),
            owner_handle: String::new(),
            metadata: HashMap::new(),
            status: ClusterStatus::Pending,
            last_updated: Utc::now(),
            version: 0,
        }
    }
}
