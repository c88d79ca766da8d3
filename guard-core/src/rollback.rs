//! Rollback producer (C9): emergency (non-draft) reverse MR with failure
//! context. Shares the C6 `update_version` path with the upgrade MR
//! producer — no separate config-editing logic exists here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use guard_types::{ClusterConfig, MergeRequestInfo};

use crate::config_editor;
use crate::error::{ConfigUpdaterError, GitOpsProviderError};
use crate::providers::GitOpsProvider;

const MAIN_BRANCH: &str = "main";

fn rollback_branch_name(batch_id: &str, previous_version: &str) -> String {
    format!(
        "rollback/istio-{batch_id}-{}-{}",
        config_editor::strip_v_prefix(previous_version),
        Utc::now().format("%Y%m%d%H%M%S"),
    )
}

fn rollback_commit_message(current_version: &str, previous_version: &str, failure_reason: &str, failure_metrics: &HashMap<String, f64>) -> String {
    let mut message = format!("Rollback Istio from {current_version} to {previous_version}\n\nReason: {failure_reason}");
    if !failure_metrics.is_empty() {
        message.push_str("\n\nmetrics:\n");
        let mut keys: Vec<&String> = failure_metrics.keys().collect();
        keys.sort();
        for k in keys {
            message.push_str(&format!("  {k}: {}\n", failure_metrics[k]));
        }
    }
    message
}

fn rollback_mr_title(batch_id: &str, current_version: &str, previous_version: &str) -> String {
    format!("[ROLLBACK] {batch_id}: {current_version} \u{2192} {previous_version}")
}

fn rollback_mr_description(
    batch_id: &str,
    cluster_id: &str,
    current_version: &str,
    previous_version: &str,
    failure_reason: &str,
    failure_metrics: &HashMap<String, f64>,
) -> String {
    let mut metrics_section = String::new();
    if !failure_metrics.is_empty() {
        let mut keys: Vec<&String> = failure_metrics.keys().collect();
        keys.sort();
        metrics_section = keys
            .iter()
            .map(|k| format!("- `{k}`: {}", failure_metrics[*k]))
            .collect::<Vec<_>>()
            .join("\n");
    }
    format!(
        "## :rotating_light: EMERGENCY ROLLBACK :rotating_light:\n\n\
         **Batch**: {batch_id}\n\
         **Cluster**: `{cluster_id}`\n\
         **Version**: {current_version} -> {previous_version}\n\n\
         **Reason**: {failure_reason}\n\n\
         **Failure metrics**:\n{metrics_section}\n\n\
         This merge request reverts a failed Istio upgrade and should be merged immediately.\n"
    )
}

pub struct RollbackProducer {
    provider: Arc<dyn GitOpsProvider>,
}

impl RollbackProducer {
    pub fn new(provider: Arc<dyn GitOpsProvider>) -> Self {
        Self { provider }
    }

    pub async fn create_rollback_mr(
        &self,
        cluster: &ClusterConfig,
        current_version: &str,
        previous_version: &str,
        failure_reason: &str,
        failure_metrics: Option<HashMap<String, f64>>,
    ) -> Result<MergeRequestInfo, GitOpsProviderError> {
        let failure_metrics = failure_metrics.unwrap_or_default();
        let branch = rollback_branch_name(&cluster.batch_id, previous_version);

        self.provider.create_branch(&cluster.gitlab_repo, &branch, MAIN_BRANCH).await?;

        edit_remote_file_legacy(
            self.provider.as_ref(),
            &cluster.gitlab_repo,
            &cluster.flux_config_path,
            &branch,
            previous_version,
            &rollback_commit_message(current_version, previous_version, failure_reason, &failure_metrics),
        )
        .await?;

        // Rollbacks are never drafts — they must be mergeable immediately.
        self.provider
            .create_merge_request(
                &cluster.gitlab_repo,
                &branch,
                MAIN_BRANCH,
                &rollback_mr_title(&cluster.batch_id, current_version, previous_version),
                &rollback_mr_description(&cluster.batch_id, &cluster.cluster_id, current_version, previous_version, failure_reason, &failure_metrics),
                false,
            )
            .await
    }

    /// Single-cluster convenience overload matching the original source's
    /// simpler `create_rollback_mr(cluster, rollback_version, reason)`
    /// signature — no failure metrics section.
    pub async fn create_rollback_mr_simple(
        &self,
        cluster: &ClusterConfig,
        rollback_version: &str,
        reason: &str,
    ) -> Result<MergeRequestInfo, GitOpsProviderError> {
        self.create_rollback_mr(cluster, &cluster.current_istio_version, rollback_version, reason, None).await
    }
}

async fn edit_remote_file_legacy(
    provider: &dyn GitOpsProvider,
    repo: &str,
    path: &str,
    branch: &str,
    target_version: &str,
    commit_message: &str,
) -> Result<(), GitOpsProviderError> {
    let original = provider.get_file_content(repo, path, MAIN_BRANCH).await?;

    let scratch = std::env::temp_dir().join(format!("guard-rollback-{}.yaml", uuid::Uuid::new_v4().simple()));
    let result = edit_scratch_file_legacy(&scratch, &original, target_version);
    let _ = std::fs::remove_file(&scratch);
    let edited = result?;

    provider.update_file(repo, path, branch, &edited, commit_message).await
}

fn edit_scratch_file_legacy(scratch: &std::path::Path, original: &str, target_version: &str) -> Result<String, ConfigUpdaterError> {
    std::fs::write(scratch, original).map_err(|e| ConfigUpdaterError::Io {
        path: scratch.display().to_string(),
        message: e.to_string(),
    })?;
    config_editor::update_version(scratch.to_str().expect("temp path is valid UTF-8"), target_version, false)?;
    std::fs::read_to_string(scratch).map_err(|e| ConfigUpdaterError::Io {
        path: scratch.display().to_string(),
        message: e.to_string(),
    })
}
