//! GitOps orchestrator (C5): group clusters, edit config atomically,
//! produce one MR per group.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use guard_types::{ClusterConfig, MergeRequestInfo, UpgradeSpec};
use uuid::Uuid;

use crate::config_editor;
use crate::error::{ConfigUpdaterError, GitOpsProviderError, PartialFailureError};
use crate::providers::GitOpsProvider;

const MAIN_BRANCH: &str = "main";

/// `(gitlab_repo, flux_config_path)` — clusters sharing this tuple point
/// at the same file and therefore share exactly one merge request.
pub type GroupKey = (String, String);

pub fn group_key_string(key: &GroupKey) -> String {
    format!("{}::{}", key.0, key.1)
}

/// Groups clusters by `(gitlab_repo, flux_config_path)`. Order-independent,
/// stable: `|result| == |unique (repo, path) pairs|`, every cluster appears
/// in exactly one group (§8 invariant).
pub fn group_clusters_by_repo_path(clusters: &[ClusterConfig]) -> HashMap<GroupKey, Vec<ClusterConfig>> {
    let mut groups: HashMap<GroupKey, Vec<ClusterConfig>> = HashMap::new();
    for cluster in clusters {
        let key = (cluster.gitlab_repo.clone(), cluster.flux_config_path.clone());
        groups.entry(key).or_default().push(cluster.clone());
    }
    groups
}

fn batch_id_for_group(clusters: &[ClusterConfig]) -> String {
    let mut batches: Vec<&str> = clusters.iter().map(|c| c.batch_id.as_str()).collect();
    batches.sort_unstable();
    batches.dedup();
    if batches.len() == 1 {
        batches[0].to_string()
    } else {
        batches.join("-")
    }
}

fn timestamp_suffix() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn clean_version(target_version: &str) -> String {
    config_editor::strip_v_prefix(target_version)
}

pub fn upgrade_branch_name(scope: &str, target_version: &str) -> String {
    format!("upgrade/{scope}/{}/{}-{}", clean_version(target_version), timestamp_suffix(), short_uuid())
}

fn commit_message(version: &str, cluster_ids: &[String]) -> String {
    let shown: Vec<&str> = cluster_ids.iter().take(3).map(String::as_str).collect();
    let mut message = format!("Upgrade to {version} for {}", shown.join(", "));
    if cluster_ids.len() > 3 {
        message.push_str(&format!(" and {} more", cluster_ids.len() - 3));
    }
    message
}

fn mr_title(batch_id: &str, version: &str, cluster_count: usize) -> String {
    format!("Upgrade {batch_id} to {version} ({cluster_count} clusters)")
}

fn mr_description(batch_id: &str, version: &str, flux_path: &str, cluster_ids: &[String]) -> String {
    format!(
        "## Istio upgrade: {batch_id} -> {version}\n\n\
         **Flux config path**: `{flux_path}`\n\n\
         **Clusters ({count})**:\n{cluster_list}\n\n\
         Please review pre-check results before merging.\n\n\
         _After merge, the reconciler will apply this change; the orchestrator will wait for sync and validate traffic metrics before closing out the run._\n",
        count = cluster_ids.len(),
        cluster_list = cluster_ids.iter().map(|id| format!("- `{id}`")).collect::<Vec<_>>().join("\n"),
    )
}

pub struct GitOpsOrchestrator {
    provider: Arc<dyn GitOpsProvider>,
}

impl GitOpsOrchestrator {
    pub fn new(provider: Arc<dyn GitOpsProvider>) -> Self {
        Self { provider }
    }

    /// Primary contract (§4.5). Per-group isolation: one group's failure
    /// never aborts its siblings; collected into a `PartialFailureError`
    /// if any group failed.
    pub async fn create_upgrade_mrs_for_batch(
        &self,
        clusters: &[ClusterConfig],
        target_version: &str,
        draft: bool,
        dry_run: bool,
    ) -> Result<HashMap<String, MergeRequestInfo>, PartialFailureError> {
        let groups = group_clusters_by_repo_path(clusters);

        let mut successful_items = HashMap::new();
        let mut failed_items = HashMap::new();
        let mut errors = Vec::new();

        for (key, group_clusters) in groups {
            let key_str = group_key_string(&key);
            match self.create_mr_for_group(&key, &group_clusters, target_version, draft, dry_run).await {
                Ok(mr) => {
                    successful_items.insert(key_str, mr);
                }
                Err(e) => {
                    errors.push(format!("{key_str}: {e}"));
                    failed_items.insert(key_str, e.to_string());
                }
            }
        }

        if failed_items.is_empty() {
            Ok(successful_items)
        } else {
            let successful_keys: Vec<String> = successful_items.keys().cloned().collect();
            let failed_keys: Vec<String> = failed_items.keys().cloned().collect();
            Err(PartialFailureError {
                successful_items,
                failed_items,
                errors,
                successful_keys,
                failed_keys,
            })
        }
    }

    async fn create_mr_for_group(
        &self,
        key: &GroupKey,
        clusters: &[ClusterConfig],
        target_version: &str,
        draft: bool,
        dry_run: bool,
    ) -> Result<MergeRequestInfo, GitOpsProviderError> {
        let (repo, path) = key;
        let batch_id = batch_id_for_group(clusters);
        let cluster_ids: Vec<String> = clusters.iter().map(|c| c.cluster_id.clone()).collect();

        if dry_run {
            return Ok(MergeRequestInfo::dry_run(
                mr_title(&batch_id, target_version, clusters.len()),
                mr_description(&batch_id, target_version, path, &cluster_ids),
                upgrade_branch_name(&batch_id, target_version),
                MAIN_BRANCH,
                draft,
            ));
        }

        let branch = upgrade_branch_name(&batch_id, target_version);
        self.provider.create_branch(repo, &branch, MAIN_BRANCH).await?;

        let spec = UpgradeSpec::new(
            clean_version(target_version),
            vec![guard_types::FieldUpdate::new("spec.chart.spec.version", clean_version(target_version))
                .expect("constant path is always valid")],
        );
        edit_remote_file(self.provider.as_ref(), repo, path, &branch, &spec, &commit_message(target_version, &cluster_ids)).await?;

        self.provider
            .create_merge_request(
                repo,
                &branch,
                MAIN_BRANCH,
                &mr_title(&batch_id, target_version, clusters.len()),
                &mr_description(&batch_id, target_version, path, &cluster_ids),
                draft,
            )
            .await
    }

    /// Secondary contract: single-cluster MR, not grouped with any other
    /// cluster even if it shares a `(repo, path)` with others — used by
    /// ad-hoc single-cluster reruns.
    pub async fn create_upgrade_mr(
        &self,
        cluster: &ClusterConfig,
        target_version: &str,
        draft: bool,
        dry_run: bool,
    ) -> Result<MergeRequestInfo, GitOpsProviderError> {
        if dry_run {
            return Ok(MergeRequestInfo::dry_run(
                mr_title(&cluster.cluster_id, target_version, 1),
                mr_description(&cluster.cluster_id, target_version, &cluster.flux_config_path, &[cluster.cluster_id.clone()]),
                upgrade_branch_name(&cluster.cluster_id, target_version),
                MAIN_BRANCH,
                draft,
            ));
        }

        let branch = upgrade_branch_name(&cluster.cluster_id, target_version);
        self.provider.create_branch(&cluster.gitlab_repo, &branch, MAIN_BRANCH).await?;

        let spec = UpgradeSpec::new(
            clean_version(target_version),
            vec![guard_types::FieldUpdate::new("spec.chart.spec.version", clean_version(target_version))
                .expect("constant path is always valid")],
        );
        edit_remote_file(
            self.provider.as_ref(),
            &cluster.gitlab_repo,
            &cluster.flux_config_path,
            &branch,
            &spec,
            &commit_message(target_version, &[cluster.cluster_id.clone()]),
        )
        .await?;

        self.provider
            .create_merge_request(
                &cluster.gitlab_repo,
                &branch,
                MAIN_BRANCH,
                &mr_title(&cluster.cluster_id, target_version, 1),
                &mr_description(&cluster.cluster_id, target_version, &cluster.flux_config_path, &[cluster.cluster_id.clone()]),
                draft,
            )
            .await
    }
}

/// Fetches the file at `main`, writes it to a scratch path, applies the
/// upgrade spec via C6, reads the result back, commits it to `branch`.
/// The scratch file is unlinked on every exit path, success or failure.
pub(crate) async fn edit_remote_file(
    provider: &dyn GitOpsProvider,
    repo: &str,
    path: &str,
    branch: &str,
    spec: &UpgradeSpec,
    commit_message: &str,
) -> Result<(), GitOpsProviderError> {
    let original = provider.get_file_content(repo, path, MAIN_BRANCH).await?;

    let scratch = std::env::temp_dir().join(format!("guard-edit-{}.yaml", short_uuid()));
    let result = edit_scratch_file(&scratch, &original, spec);
    let _ = std::fs::remove_file(&scratch);
    let edited = result?;

    provider.update_file(repo, path, branch, &edited, commit_message).await
}

fn edit_scratch_file(scratch: &std::path::Path, original: &str, spec: &UpgradeSpec) -> Result<String, ConfigUpdaterError> {
    std::fs::write(scratch, original).map_err(|e| ConfigUpdaterError::Io {
        path: scratch.display().to_string(),
        message: e.to_string(),
    })?;
    config_editor::apply_upgrade_spec(scratch.to_str().expect("temp path is valid UTF-8"), spec, false)?;
    std::fs::read_to_string(scratch).map_err(|e| ConfigUpdaterError::Io {
        path: scratch.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::FakeGitOpsProvider;

    fn cluster(id: &str, batch: &str, repo: &str, path: &str) -> ClusterConfig {
        ClusterConfig::new(id, batch, repo, path, "1.19.0")
    }

    fn helm_release(version: &str) -> String {
        format!("apiVersion: helm.toolkit.fluxcd.io/v2\nkind: HelmRelease\nspec:\n  chart:\n    spec:\n      version: \"{version}\"\n")
    }

    #[tokio::test]
    async fn two_clusters_sharing_repo_path_yield_exactly_one_mr_with_both_ids_and_count() {
        let provider = Arc::new(FakeGitOpsProvider::default());
        provider.files.lock().unwrap().insert(
            ("devops/k8s-prod".into(), "clusters/prod/istio/helmrelease.yaml".into(), "main".into()),
            helm_release("1.19.0"),
        );
        let orchestrator = GitOpsOrchestrator::new(provider);

        let clusters = vec![
            cluster("cluster-1", "prod-wave-1", "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml"),
            cluster("cluster-2", "prod-wave-1", "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml"),
        ];

        let result = orchestrator.create_upgrade_mrs_for_batch(&clusters, "1.20.0", true, false).await.unwrap();
        assert_eq!(result.len(), 1);
        let mr = result.values().next().unwrap();
        assert!(mr.description.contains("cluster-1"));
        assert!(mr.description.contains("cluster-2"));
        assert!(mr.description.contains('2'));
    }

    #[tokio::test]
    async fn three_clusters_two_groups_split_by_repo() {
        let provider = Arc::new(FakeGitOpsProvider::default());
        {
            let mut files = provider.files.lock().unwrap();
            files.insert(("devops/k8s-prod".into(), "clusters/prod/istio/helmrelease.yaml".into(), "main".into()), helm_release("1.19.0"));
            files.insert(("devops/k8s-eu".into(), "clusters/prod/istio/helmrelease.yaml".into(), "main".into()), helm_release("1.19.0"));
        }
        let orchestrator = GitOpsOrchestrator::new(provider);

        let clusters = vec![
            cluster("cluster-1", "b1", "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml"),
            cluster("cluster-2", "b1", "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml"),
            cluster("cluster-3", "b1", "devops/k8s-eu", "clusters/prod/istio/helmrelease.yaml"),
        ];

        let result = orchestrator.create_upgrade_mrs_for_batch(&clusters, "1.20.0", true, false).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn dry_run_skips_host_api_calls_entirely() {
        let provider = Arc::new(FakeGitOpsProvider::default());
        let orchestrator = GitOpsOrchestrator::new(provider.clone());

        let clusters = vec![cluster("cluster-1", "b1", "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml")];
        let result = orchestrator.create_upgrade_mrs_for_batch(&clusters, "1.20.0", true, true).await.unwrap();

        let mr = result.values().next().unwrap();
        assert_eq!(mr.id, 0);
        assert_eq!(mr.web_url, "");
        assert!(provider.branches.lock().unwrap().is_empty());
        assert!(provider.merge_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn grouping_partitions_clusters_without_omission() {
        let clusters = vec![
            cluster("c1", "b1", "r1", "p1"),
            cluster("c2", "b1", "r1", "p1"),
            cluster("c3", "b1", "r2", "p2"),
        ];
        let groups = group_clusters_by_repo_path(&clusters);
        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, clusters.len());
        assert_eq!(groups.len(), 2);
    }
}
