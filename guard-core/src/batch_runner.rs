//! Batch runner & concurrency core (C10): bounded-parallel per-cluster
//! pipeline. Composes C2 (lock) around C3 (checks) -> C5 (GitOps) -> C8
//! (sync wait + restart) -> C7 (validators) -> C9 (rollback-if-violated),
//! with status persisted through C1 at every transition.

use std::collections::HashMap;
use std::sync::Arc;

use guard_types::{BatchRunSummary, CheckResult, ClusterConfig, ClusterOutcome, ClusterStatus, ValidationThresholds};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::checks::{CheckContext, CheckOrchestrator, CheckRegistry};
use crate::error::GuardError;
use crate::gitops::GitOpsOrchestrator;
use crate::lock::{self, DistributedLock};
use crate::providers::{CloudProvider, GitOpsProvider, KubernetesProvider, MetricsProvider};
use crate::registry::StateStore;
use crate::rollback::RollbackProducer;
use crate::validation_engine::ValidationEngine;
use crate::validators::{ValidationOrchestrator, ValidatorRegistry};

#[derive(Debug, Clone)]
pub struct BatchRunnerConfig {
    pub max_concurrent: usize,
    pub lock_timeout_sec: i64,
    pub lock_wait_timeout_sec: u64,
    pub lock_renewal_interval_sec: u64,
    pub flux_sync_timeout_minutes: i64,
    pub flux_poll_interval_sec: u64,
    pub soak_period_minutes: i64,
    pub soak_progress_interval_sec: u64,
    pub baseline_window_minutes: i64,
    pub current_window_minutes: i64,
    pub draft_mrs: bool,
    pub restart_namespace: Option<String>,
    pub restart_wave_size: usize,
    pub restart_wait_for_ready: bool,
    pub restart_readiness_timeout_sec: u64,
}

impl Default for BatchRunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            lock_timeout_sec: 1800,
            lock_wait_timeout_sec: 60,
            lock_renewal_interval_sec: 300,
            flux_sync_timeout_minutes: 15,
            flux_poll_interval_sec: 10,
            soak_period_minutes: 5,
            soak_progress_interval_sec: 60,
            baseline_window_minutes: 15,
            current_window_minutes: 15,
            draft_mrs: true,
            restart_namespace: None,
            restart_wave_size: 5,
            restart_wait_for_ready: true,
            restart_readiness_timeout_sec: 300,
        }
    }
}

#[derive(Clone)]
pub struct BatchRunner {
    state_store: Arc<dyn StateStore>,
    lock: Arc<dyn DistributedLock>,
    check_orchestrator: Arc<CheckOrchestrator>,
    check_context: Arc<CheckContext>,
    gitops: Arc<GitOpsOrchestrator>,
    validation_engine: Arc<ValidationEngine>,
    validator_orchestrator: Arc<ValidationOrchestrator>,
    rollback_producer: Arc<RollbackProducer>,
    thresholds: ValidationThresholds,
    config: BatchRunnerConfig,
}

impl BatchRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_store: Arc<dyn StateStore>,
        lock: Arc<dyn DistributedLock>,
        check_orchestrator: Arc<CheckOrchestrator>,
        check_context: Arc<CheckContext>,
        gitops: Arc<GitOpsOrchestrator>,
        validation_engine: Arc<ValidationEngine>,
        validator_orchestrator: Arc<ValidationOrchestrator>,
        rollback_producer: Arc<RollbackProducer>,
        thresholds: ValidationThresholds,
        config: BatchRunnerConfig,
    ) -> Self {
        Self {
            state_store,
            lock,
            check_orchestrator,
            check_context,
            gitops,
            validation_engine,
            validator_orchestrator,
            rollback_producer,
            thresholds,
            config,
        }
    }

    /// Assembles a runner with the standard domain checks and Istio
    /// validators registered, given only the capability providers.
    #[allow(clippy::too_many_arguments)]
    pub fn standard(
        kubernetes: Arc<dyn KubernetesProvider>,
        cloud: Arc<dyn CloudProvider>,
        gitops_provider: Arc<dyn GitOpsProvider>,
        metrics_provider: Arc<dyn MetricsProvider>,
        state_store: Arc<dyn StateStore>,
        lock: Arc<dyn DistributedLock>,
        thresholds: ValidationThresholds,
        config: BatchRunnerConfig,
    ) -> Self {
        let mut checks = CheckRegistry::new();
        checks.register(Arc::new(crate::checks::domain::ControlPlaneReachableCheck));
        checks.register(Arc::new(crate::checks::domain::AllNodesReadyCheck));
        checks.register(Arc::new(crate::checks::domain::NamespacedPodHealthCheck::default()));
        checks.register(Arc::new(crate::checks::domain::MeshConfigAnalysisCheck::new("istio-system")));
        checks.register(Arc::new(crate::checks::domain::SidecarVersionCheck));
        let check_orchestrator = Arc::new(CheckOrchestrator::new(checks));

        let check_context = Arc::new(CheckContext {
            kubernetes: kubernetes.clone(),
            cloud,
            metrics: metrics_provider.clone(),
            extras: HashMap::new(),
        });

        let mut validators = ValidatorRegistry::new();
        validators.register(Arc::new(crate::validators::istio::ErrorRateValidator));
        validators.register(Arc::new(crate::validators::istio::LatencyValidator));
        let validator_orchestrator = Arc::new(ValidationOrchestrator::new(validators, metrics_provider));

        let gitops_orchestrator = Arc::new(GitOpsOrchestrator::new(gitops_provider.clone()));
        let rollback_producer = Arc::new(RollbackProducer::new(gitops_provider));
        let validation_engine = Arc::new(ValidationEngine::new(kubernetes));

        Self::new(
            state_store,
            lock,
            check_orchestrator,
            check_context,
            gitops_orchestrator,
            validation_engine,
            validator_orchestrator,
            rollback_producer,
            thresholds,
            config,
        )
    }

    pub fn state_store(&self) -> Arc<dyn StateStore> {
        self.state_store.clone()
    }

    pub async fn run_batch(&self, batch_id: &str, target_version: &str, dry_run: bool) -> Vec<ClusterOutcome> {
        self.run_batch_with_cancellation(batch_id, target_version, dry_run, CancellationToken::new()).await
    }

    pub async fn run_batch_with_cancellation(
        &self,
        batch_id: &str,
        target_version: &str,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Vec<ClusterOutcome> {
        let clusters = match self.state_store.query_by_batch(batch_id).await {
            Ok(clusters) => clusters,
            Err(e) => {
                tracing::error!(batch = batch_id, error = %e, "failed to load batch clusters");
                return Vec::new();
            }
        };
        if clusters.is_empty() {
            tracing::warn!(batch = batch_id, "batch has no registered clusters, exiting early");
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(clusters.len());

        for cluster in clusters {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let runner = self.clone();
            let target_version = target_version.to_string();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                runner.run_cluster(cluster, &target_version, dry_run, cancel).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(ClusterOutcome::errored("unknown", format!("pipeline task panicked: {e}"))),
            }
        }

        let summary = BatchRunSummary::from_outcomes(&outcomes);
        tracing::info!(
            batch = batch_id,
            total = summary.total,
            succeeded = summary.succeeded(),
            any_failed = summary.any_failed(),
            "batch run complete"
        );
        outcomes
    }

    /// One cluster's pipeline, governed end to end by the distributed
    /// lock. Any error raised inside is caught here and mapped to
    /// `ClusterOutcome::errored` — it never propagates to sibling tasks.
    async fn run_cluster(&self, cluster: ClusterConfig, target_version: &str, dry_run: bool, cancel: CancellationToken) -> ClusterOutcome {
        let cluster_id = cluster.cluster_id.clone();
        let lock = self.lock.clone();
        let runner = self.clone();
        let target_version = target_version.to_string();

        let pipeline_result = lock::with_lock(
            lock,
            &cluster_id,
            self.config.lock_timeout_sec,
            self.config.lock_wait_timeout_sec,
            self.config.lock_renewal_interval_sec,
            move |_owner, _fencing_token| async move { runner.run_cluster_pipeline(cluster, &target_version, dry_run, cancel).await },
        )
        .await;

        match pipeline_result {
            Ok(Ok(status)) => ClusterOutcome::ok(cluster_id, status),
            Ok(Err(e)) => ClusterOutcome::errored(cluster_id, e.to_string()),
            Err(lock_err) => ClusterOutcome::errored(cluster_id, lock_err.to_string()),
        }
    }

    async fn run_cluster_pipeline(
        &self,
        cluster: ClusterConfig,
        target_version: &str,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Result<ClusterStatus, GuardError> {
        if cancel.is_cancelled() {
            return Err(GuardError::Other("batch run cancelled before cluster start".to_string()));
        }

        let won = self
            .state_store
            .update_status_atomic(&cluster.cluster_id, cluster.status, ClusterStatus::PreCheckRunning, HashMap::new())
            .await?;
        if !won {
            tracing::warn!(cluster = %cluster.cluster_id, "status CAS to pre_check_running was rejected, proceeding under lock anyway");
        }

        let check_results = self.check_orchestrator.run_all_checks(&cluster, &self.check_context).await;
        if self.critical_check_failed(&check_results) {
            self.state_store.update_status(&cluster.cluster_id, ClusterStatus::PreCheckFailed, HashMap::new()).await?;
            return Ok(ClusterStatus::PreCheckFailed);
        }

        if dry_run {
            self.gitops.create_upgrade_mr(&cluster, target_version, self.config.draft_mrs, true).await?;
            self.state_store.update_status(&cluster.cluster_id, ClusterStatus::DryRunSuccess, HashMap::new()).await?;
            return Ok(ClusterStatus::DryRunSuccess);
        }

        if cancel.is_cancelled() {
            return Err(GuardError::Other("batch run cancelled before GitOps step".to_string()));
        }

        let baseline = self.validator_orchestrator.capture_baseline(&cluster, self.config.baseline_window_minutes).await;

        self.gitops.create_upgrade_mr(&cluster, target_version, self.config.draft_mrs, false).await?;
        self.state_store.update_status(&cluster.cluster_id, ClusterStatus::MrCreated, HashMap::new()).await?;
        self.state_store.update_status(&cluster.cluster_id, ClusterStatus::Upgrading, HashMap::new()).await?;

        if cancel.is_cancelled() {
            return Err(GuardError::Other("batch run cancelled before reconciliation wait".to_string()));
        }

        let synced = self
            .validation_engine
            .wait_for_flux_sync(self.config.flux_sync_timeout_minutes, self.config.flux_poll_interval_sec)
            .await;
        if !synced {
            return self
                .rollback(&cluster, target_version, "flux reconciliation did not complete within timeout", None)
                .await;
        }

        let restart_result = self
            .validation_engine
            .restart_pods_with_istio_sidecars(
                self.config.restart_namespace.as_deref(),
                self.config.restart_wave_size,
                self.config.restart_wait_for_ready,
                self.config.restart_readiness_timeout_sec,
            )
            .await;
        if !restart_result.passed {
            tracing::warn!(cluster = %cluster.cluster_id, message = %restart_result.message, "sidecar restart reported failures, continuing to validation");
        }

        self.state_store.update_status(&cluster.cluster_id, ClusterStatus::Validating, HashMap::new()).await?;
        self.validation_engine
            .run_soak_period(self.config.soak_period_minutes, self.config.soak_progress_interval_sec)
            .await;

        let current = self.validator_orchestrator.capture_current(&cluster, &baseline, self.config.current_window_minutes).await;
        let validation_results = self.validator_orchestrator.validate_upgrade(&cluster, &baseline, &current, &self.thresholds).await;

        if let Some(violation) = validation_results.iter().find(|r| !r.passed) {
            let mut failure_metrics = HashMap::new();
            for result in &validation_results {
                for (key, value) in &result.metrics {
                    if let Some(v) = value.as_f64() {
                        failure_metrics.insert(key.clone(), v);
                    }
                }
            }
            return self.rollback(&cluster, target_version, &violation.message, Some(failure_metrics)).await;
        }

        self.state_store.update_status(&cluster.cluster_id, ClusterStatus::Healthy, HashMap::new()).await?;
        Ok(ClusterStatus::Healthy)
    }

    fn critical_check_failed(&self, results: &[CheckResult]) -> bool {
        let critical_names: std::collections::HashSet<String> = self
            .check_orchestrator
            .registry()
            .critical_only()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        results.iter().any(|r| !r.passed && critical_names.contains(&r.name))
    }

    async fn rollback(
        &self,
        cluster: &ClusterConfig,
        attempted_version: &str,
        reason: &str,
        failure_metrics: Option<HashMap<String, f64>>,
    ) -> Result<ClusterStatus, GuardError> {
        self.state_store.update_status(&cluster.cluster_id, ClusterStatus::ValidationFailed, HashMap::new()).await?;
        self.state_store.update_status(&cluster.cluster_id, ClusterStatus::RollingBack, HashMap::new()).await?;

        self.rollback_producer
            .create_rollback_mr(cluster, attempted_version, &cluster.current_istio_version, reason, failure_metrics)
            .await?;

        self.state_store.update_status(&cluster.cluster_id, ClusterStatus::RolledBack, HashMap::new()).await?;
        Ok(ClusterStatus::RolledBack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::InMemoryDistributedLock;
    use crate::providers::fakes::{FakeCloudProvider, FakeGitOpsProvider, FakeKubernetesProvider, FakeMetricsProvider};
    use crate::providers::{Condition, NodeInfo};
    use crate::registry::InMemoryStateStore;
    use guard_types::DatadogTags;

    fn cluster(id: &str, batch: &str) -> ClusterConfig {
        let mut c = ClusterConfig::new(id, batch, "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml", "1.19.0");
        c.datadog_tags = DatadogTags {
            cluster: id.to_string(),
            service: "istio".to_string(),
            env: "prod".to_string(),
        };
        c
    }

    fn helm_release(version: &str) -> String {
        format!("apiVersion: helm.toolkit.fluxcd.io/v2\nkind: HelmRelease\nspec:\n  chart:\n    spec:\n      version: \"{version}\"\n")
    }

    fn test_runner(k8s: Arc<FakeKubernetesProvider>, gitops: Arc<FakeGitOpsProvider>, metrics: Arc<FakeMetricsProvider>) -> BatchRunner {
        let mut checks = CheckRegistry::new();
        checks.register(Arc::new(crate::checks::domain::ControlPlaneReachableCheck));
        checks.register(Arc::new(crate::checks::domain::AllNodesReadyCheck));
        let check_orchestrator = Arc::new(CheckOrchestrator::new(checks));
        let check_context = Arc::new(CheckContext {
            kubernetes: k8s.clone(),
            cloud: Arc::new(FakeCloudProvider::default()),
            metrics: metrics.clone(),
            extras: HashMap::new(),
        });

        let gitops_orchestrator = Arc::new(GitOpsOrchestrator::new(gitops.clone()));

        let mut validators = ValidatorRegistry::new();
        validators.register(Arc::new(crate::validators::istio::ErrorRateValidator));
        validators.register(Arc::new(crate::validators::istio::LatencyValidator));
        let validator_orchestrator = Arc::new(ValidationOrchestrator::new(validators, metrics.clone()));

        let validation_engine = Arc::new(ValidationEngine::with_fakes(
            k8s.clone(),
            Box::new(|_| Ok(String::new())),
            Box::new(|_| Ok(String::new())),
            Box::new(|| Ok(String::new())),
            Box::new(|| Ok(String::new())),
        ));

        let rollback_producer = Arc::new(RollbackProducer::new(gitops.clone()));

        let state_store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryDistributedLock::new());

        let config = BatchRunnerConfig {
            soak_period_minutes: 0,
            soak_progress_interval_sec: 1,
            flux_poll_interval_sec: 1,
            lock_renewal_interval_sec: 3600,
            restart_wait_for_ready: false,
            ..BatchRunnerConfig::default()
        };

        BatchRunner::new(
            state_store,
            lock,
            check_orchestrator,
            check_context,
            gitops_orchestrator,
            validation_engine,
            validator_orchestrator,
            rollback_producer,
            ValidationThresholds::default(),
            config,
        )
    }

    #[tokio::test]
    async fn empty_batch_returns_no_outcomes() {
        let runner = test_runner(
            Arc::new(FakeKubernetesProvider::default()),
            Arc::new(FakeGitOpsProvider::default()),
            Arc::new(FakeMetricsProvider::default()),
        );
        let outcomes = runner.run_batch("nonexistent", "1.20.0", false).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn successful_batch_reaches_healthy() {
        let k8s = Arc::new(FakeKubernetesProvider::default());
        k8s.nodes.lock().unwrap().push(NodeInfo {
            name: "node-1".into(),
            conditions: vec![Condition::ready_true()],
        });
        let gitops = Arc::new(FakeGitOpsProvider::default());
        gitops.files.lock().unwrap().insert(
            ("devops/k8s-prod".into(), "clusters/prod/istio/helmrelease.yaml".into(), "main".into()),
            helm_release("1.19.0"),
        );
        let runner = test_runner(k8s, gitops, Arc::new(FakeMetricsProvider::default()));
        runner.state_store().put(cluster("cluster-1", "wave-1")).await.unwrap();

        let outcomes = runner.run_batch("wave-1", "1.20.0", false).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ClusterStatus::Healthy);
        assert!(outcomes[0].error.is_none());
    }

    #[tokio::test]
    async fn critical_check_failure_short_circuits_to_pre_check_failed() {
        let runner = test_runner(
            Arc::new(FakeKubernetesProvider::default()),
            Arc::new(FakeGitOpsProvider::default()),
            Arc::new(FakeMetricsProvider::default()),
        );
        runner.state_store().put(cluster("cluster-1", "wave-1")).await.unwrap();

        let outcomes = runner.run_batch("wave-1", "1.20.0", false).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ClusterStatus::PreCheckFailed);
    }

    #[tokio::test]
    async fn dry_run_short_circuits_without_touching_gitops_host() {
        let k8s = Arc::new(FakeKubernetesProvider::default());
        k8s.nodes.lock().unwrap().push(NodeInfo {
            name: "node-1".into(),
            conditions: vec![Condition::ready_true()],
        });
        let gitops = Arc::new(FakeGitOpsProvider::default());
        let runner = test_runner(k8s, gitops.clone(), Arc::new(FakeMetricsProvider::default()));
        runner.state_store().put(cluster("cluster-1", "wave-1")).await.unwrap();

        let outcomes = runner.run_batch("wave-1", "1.20.0", true).await;
        assert_eq!(outcomes[0].status, ClusterStatus::DryRunSuccess);
        assert!(gitops.branches.lock().unwrap().is_empty());
        assert!(gitops.merge_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn multiple_clusters_fail_independently() {
        let runner = test_runner(
            Arc::new(FakeKubernetesProvider::default()),
            Arc::new(FakeGitOpsProvider::default()),
            Arc::new(FakeMetricsProvider::default()),
        );
        runner.state_store().put(cluster("cluster-1", "wave-1")).await.unwrap();
        runner.state_store().put(cluster("cluster-2", "wave-1")).await.unwrap();

        let outcomes = runner.run_batch("wave-1", "1.20.0", false).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == ClusterStatus::PreCheckFailed));
    }
}
