//! End-to-end scenarios spanning more than one module: GitOps grouping,
//! config editing, lock racing, and validator thresholds working together
//! the way a real batch run exercises them.

use std::sync::Arc;

use guard_core::gitops::GitOpsOrchestrator;
use guard_core::providers::fakes::FakeGitOpsProvider;
use guard_core::validators::istio::ErrorRateValidator;
use guard_core::validators::Validator;
use guard_core::{with_lock, InMemoryDistributedLock};
use guard_types::{ClusterConfig, MetricsSnapshot, ValidationThresholds};

fn cluster(id: &str, batch: &str, repo: &str, path: &str) -> ClusterConfig {
    ClusterConfig::new(id, batch, repo, path, "1.19.0")
}

fn helm_release(version: &str) -> String {
    format!("apiVersion: helm.toolkit.fluxcd.io/v2\nkind: HelmRelease\nspec:\n  chart:\n    spec:\n      version: \"{version}\"\n")
}

fn seed_file(provider: &FakeGitOpsProvider, repo: &str, path: &str, version: &str) {
    provider
        .files
        .lock()
        .unwrap()
        .insert((repo.to_string(), path.to_string(), "main".to_string()), helm_release(version));
}

#[tokio::test]
async fn two_clusters_sharing_repo_path_produce_one_mr_naming_both() {
    let provider = Arc::new(FakeGitOpsProvider::default());
    seed_file(&provider, "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml", "1.19.0");
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
    assert!(mr.description.contains("2"));
}

#[tokio::test]
async fn three_clusters_two_groups_yield_two_distinct_mrs() {
    let provider = Arc::new(FakeGitOpsProvider::default());
    seed_file(&provider, "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml", "1.19.0");
    seed_file(&provider, "devops/k8s-eu", "clusters/prod/istio/helmrelease.yaml", "1.19.0");
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
async fn config_edit_round_trips_and_backs_up_original() {
    use guard_core::config_editor::{apply_upgrade_spec, get_current_version};
    use guard_types::{FieldUpdate, UpgradeSpec};
    use tempfile::NamedTempFile;

    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), helm_release("1.19.0")).unwrap();
    let path = file.path().to_str().unwrap();

    let spec = UpgradeSpec::new("1.20.0", vec![FieldUpdate::new("spec.chart.spec.version", "1.20.0").unwrap()]);
    apply_upgrade_spec(path, &spec, true).unwrap();

    assert_eq!(get_current_version(path).unwrap(), "1.20.0");
    let backup = std::fs::read_to_string(format!("{path}.bak")).unwrap();
    assert!(backup.contains("1.19.0"));
}

#[tokio::test]
async fn missing_intermediate_path_leaves_file_untouched_but_still_backs_up() {
    use guard_core::config_editor::apply_upgrade_spec;
    use guard_types::{FieldUpdate, UpgradeSpec};
    use tempfile::NamedTempFile;

    let file = NamedTempFile::new().unwrap();
    let original = helm_release("1.19.0");
    std::fs::write(file.path(), &original).unwrap();
    let path = file.path().to_str().unwrap();

    let spec = UpgradeSpec::new("1.20.0", vec![FieldUpdate::new("spec.nonexistent.field", "x").unwrap()]);
    assert!(apply_upgrade_spec(path, &spec, true).is_err());

    assert_eq!(std::fs::read_to_string(path).unwrap(), original);
    assert!(std::fs::read_to_string(format!("{path}.bak")).is_ok());
}

#[tokio::test]
async fn racing_acquisitions_on_same_resource_hand_out_strictly_increasing_fencing_tokens() {
    let lock: Arc<dyn guard_core::DistributedLock> = Arc::new(InMemoryDistributedLock::new());

    let first = with_lock(lock.clone(), "cluster-1", 1, 5, 3600, |_owner, token| async move { token }).await.unwrap();
    assert_eq!(first, 1);

    let second = with_lock(lock.clone(), "cluster-1", 1, 5, 3600, |_owner, token| async move { token }).await.unwrap();
    assert_eq!(second, 2);
    assert!(second > first);
}

#[tokio::test]
async fn error_rate_validator_flags_both_threshold_and_doubling_violations() {
    let mut baseline = MetricsSnapshot::new(Default::default());
    baseline.metrics.insert("istio.request.error.5xx.rate".to_string(), Some(0.0005));
    baseline.metrics.insert("istio.request.total.rate".to_string(), Some(10000.0));

    let mut current = MetricsSnapshot::new(Default::default());
    current.metrics.insert("istio.request.error.5xx.rate".to_string(), Some(0.002));
    current.metrics.insert("istio.request.total.rate".to_string(), Some(10000.0));

    let thresholds = ValidationThresholds { error_rate_max: 0.001, ..Default::default() };
    let result = ErrorRateValidator
        .validate(&cluster("c1", "b1", "repo", "path.yaml"), &baseline, &current, &thresholds)
        .await;

    assert!(!result.passed);
    assert!(result.violations.iter().any(|v| v.contains("exceeds maximum")));
    assert!(result.violations.iter().any(|v| v.contains("increased")));
}
