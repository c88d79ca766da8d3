//! Check framework (C3): registry + orchestrator for pre-flight checks.

pub mod domain;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use guard_types::{CheckResult, ClusterConfig};

use crate::providers::{CloudProvider, KubernetesProvider, MetricsProvider};

/// Capability handles + a free-form bag, replacing the Python source's
/// single `extra_context` dict (§9 redesign flag: typed capability
/// struct plus a narrow escape hatch for ad-hoc values).
pub struct CheckContext {
    pub kubernetes: Arc<dyn KubernetesProvider>,
    pub cloud: Arc<dyn CloudProvider>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub extras: HashMap<String, String>,
}

#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn is_critical(&self) -> bool;
    fn timeout_seconds(&self) -> u64;
    async fn execute(&self, cluster: &ClusterConfig, context: &CheckContext) -> CheckResult;
}

#[derive(Default)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<dyn Check>>,
    order: Vec<String>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate registration is rejected (warning logged, existing check
    /// kept), never overwriting what's already there.
    pub fn register(&mut self, check: Arc<dyn Check>) {
        let name = check.name().to_string();
        if self.checks.contains_key(&name) {
            tracing::warn!(check = %name, "duplicate check registration ignored");
            return;
        }
        self.order.push(name.clone());
        self.checks.insert(name, check);
    }

    pub fn all(&self) -> Vec<Arc<dyn Check>> {
        self.order.iter().filter_map(|n| self.checks.get(n)).cloned().collect()
    }

    pub fn critical_only(&self) -> Vec<Arc<dyn Check>> {
        self.all().into_iter().filter(|c| c.is_critical()).collect()
    }

    pub fn by_names(&self, names: &[String]) -> Vec<Arc<dyn Check>> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        for name in &wanted {
            if !self.checks.contains_key(*name) {
                tracing::warn!(check = %name, "unknown check name requested, skipping");
            }
        }
        self.all().into_iter().filter(|c| wanted.contains(c.name())).collect()
    }
}

pub struct CheckOrchestrator {
    registry: CheckRegistry,
    pub fail_fast: bool,
    #[allow(dead_code)]
    pub max_concurrent: usize,
}

impl CheckOrchestrator {
    pub fn new(registry: CheckRegistry) -> Self {
        Self {
            registry,
            fail_fast: true,
            max_concurrent: 1,
        }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub async fn run_all_checks(&self, cluster: &ClusterConfig, context: &CheckContext) -> Vec<CheckResult> {
        self.run(self.registry.all(), cluster, context).await
    }

    pub async fn run_critical_checks_only(&self, cluster: &ClusterConfig, context: &CheckContext) -> Vec<CheckResult> {
        self.run(self.registry.critical_only(), cluster, context).await
    }

    pub async fn run_specific_checks(
        &self,
        names: &[String],
        cluster: &ClusterConfig,
        context: &CheckContext,
    ) -> Vec<CheckResult> {
        self.run(self.registry.by_names(names), cluster, context).await
    }

    async fn run(&self, checks: Vec<Arc<dyn Check>>, cluster: &ClusterConfig, context: &CheckContext) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            let result = run_one(check.as_ref(), cluster, context).await;
            let should_stop = self.fail_fast && check.is_critical() && !result.passed;
            results.push(result);
            if should_stop {
                break;
            }
        }
        results
    }
}

async fn run_one(check: &dyn Check, cluster: &ClusterConfig, context: &CheckContext) -> CheckResult {
    let timeout = Duration::from_secs(check.timeout_seconds());
    match tokio::time::timeout(timeout, check.execute(cluster, context)).await {
        Ok(result) => result,
        Err(_) => CheckResult::fail(check.name(), format!("check '{}' timed out after {}s", check.name(), check.timeout_seconds())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCheck {
        name: String,
        critical: bool,
        passed: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Check for FixedCheck {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "fixed test check"
        }
        fn is_critical(&self) -> bool {
            self.critical
        }
        fn timeout_seconds(&self) -> u64 {
            5
        }
        async fn execute(&self, _cluster: &ClusterConfig, _context: &CheckContext) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.passed {
                CheckResult::pass(&self.name, "ok")
            } else {
                CheckResult::fail(&self.name, "failed")
            }
        }
    }

    fn context() -> CheckContext {
        use crate::providers::fakes::{FakeCloudProvider, FakeKubernetesProvider, FakeMetricsProvider};
        CheckContext {
            kubernetes: Arc::new(FakeKubernetesProvider::default()),
            cloud: Arc::new(FakeCloudProvider::default()),
            metrics: Arc::new(FakeMetricsProvider::default()),
            extras: HashMap::new(),
        }
    }

    fn cluster() -> ClusterConfig {
        ClusterConfig::new("c1", "b1", "repo", "path.yaml", "1.19.0")
    }

    #[tokio::test]
    async fn non_critical_failure_never_stops_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(FixedCheck { name: "a".into(), critical: false, passed: false, calls: calls.clone() }));
        registry.register(Arc::new(FixedCheck { name: "b".into(), critical: false, passed: true, calls: calls.clone() }));

        let orchestrator = CheckOrchestrator::new(registry);
        let results = orchestrator.run_all_checks(&cluster(), &context()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn critical_failure_stops_when_fail_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(FixedCheck { name: "a".into(), critical: true, passed: false, calls: calls.clone() }));
        registry.register(Arc::new(FixedCheck { name: "b".into(), critical: false, passed: true, calls: calls.clone() }));

        let orchestrator = CheckOrchestrator::new(registry);
        let results = orchestrator.run_all_checks(&cluster(), &context()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn critical_failure_does_not_stop_when_fail_fast_disabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(FixedCheck { name: "a".into(), critical: true, passed: false, calls: calls.clone() }));
        registry.register(Arc::new(FixedCheck { name: "b".into(), critical: false, passed: true, calls: calls.clone() }));

        let mut orchestrator = CheckOrchestrator::new(registry);
        orchestrator.fail_fast = false;
        let results = orchestrator.run_all_checks(&cluster(), &context()).await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_registration_is_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(FixedCheck { name: "a".into(), critical: false, passed: true, calls: calls.clone() }));
        registry.register(Arc::new(FixedCheck { name: "a".into(), critical: false, passed: false, calls: calls.clone() }));
        assert_eq!(registry.all().len(), 1);
    }
}
