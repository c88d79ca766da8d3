//! Validator framework (C7): capture metric snapshots, compare baseline
//! vs. current, emit violations.

pub mod istio;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use guard_types::{ClusterConfig, MetricsSnapshot, ValidationResult, ValidationThresholds};

use crate::providers::MetricsProvider;

#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn is_critical(&self) -> bool;
    fn timeout_seconds(&self) -> u64;
    fn required_metrics(&self) -> Vec<String>;
    async fn validate(
        &self,
        cluster: &ClusterConfig,
        baseline: &MetricsSnapshot,
        current: &MetricsSnapshot,
        thresholds: &ValidationThresholds,
    ) -> ValidationResult;
}

#[derive(Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn Validator>>,
    order: Vec<String>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        let name = validator.name().to_string();
        if self.validators.contains_key(&name) {
            tracing::warn!(validator = %name, "duplicate validator registration ignored");
            return;
        }
        self.order.push(name.clone());
        self.validators.insert(name, validator);
    }

    pub fn remove(&mut self, name: &str) {
        self.validators.remove(name);
        self.order.retain(|n| n != name);
    }

    pub fn all(&self) -> Vec<Arc<dyn Validator>> {
        self.order.iter().filter_map(|n| self.validators.get(n)).cloned().collect()
    }

    pub fn critical_only(&self) -> Vec<Arc<dyn Validator>> {
        self.all().into_iter().filter(|v| v.is_critical()).collect()
    }

    pub fn by_names(&self, names: &[String]) -> Vec<Arc<dyn Validator>> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        for name in &wanted {
            if !self.validators.contains_key(*name) {
                tracing::warn!(validator = %name, "unknown validator name requested, skipping");
            }
        }
        self.all().into_iter().filter(|v| wanted.contains(v.name())).collect()
    }
}

pub struct ValidationOrchestrator {
    registry: ValidatorRegistry,
    metrics: Arc<dyn MetricsProvider>,
    pub fail_fast: bool,
}

impl ValidationOrchestrator {
    pub fn new(registry: ValidatorRegistry, metrics: Arc<dyn MetricsProvider>) -> Self {
        Self {
            registry,
            metrics,
            fail_fast: true,
        }
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    fn required_metric_union(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for validator in self.registry.all() {
            for metric in validator.required_metrics() {
                if seen.insert(metric.clone()) {
                    out.push(metric);
                }
            }
        }
        out
    }

    pub async fn capture_baseline(&self, cluster: &ClusterConfig, duration_minutes: i64) -> MetricsSnapshot {
        let to = Utc::now();
        let from = to - chrono::Duration::minutes(duration_minutes);
        self.capture(cluster, from, to).await
    }

    pub async fn capture_current(&self, cluster: &ClusterConfig, _baseline: &MetricsSnapshot, duration_minutes: i64) -> MetricsSnapshot {
        let to = Utc::now();
        let from = to - chrono::Duration::minutes(duration_minutes);
        self.capture(cluster, from, to).await
    }

    async fn capture(&self, cluster: &ClusterConfig, from: chrono::DateTime<Utc>, to: chrono::DateTime<Utc>) -> MetricsSnapshot {
        let tags = HashMap::from([
            ("cluster".to_string(), cluster.datadog_tags.cluster.clone()),
            ("service".to_string(), cluster.datadog_tags.service.clone()),
            ("env".to_string(), cluster.datadog_tags.env.clone()),
        ]);
        let mut snapshot = MetricsSnapshot::new(tags);
        for metric in self.required_metric_union() {
            let value = self
                .metrics
                .query_scalar(&metric, &cluster.datadog_tags, from, to)
                .await
                .unwrap_or(None); // per-metric failures tolerated: stored as None
            snapshot.metrics.insert(metric, value);
        }
        snapshot
    }

    pub async fn validate_upgrade(
        &self,
        cluster: &ClusterConfig,
        baseline: &MetricsSnapshot,
        current: &MetricsSnapshot,
        thresholds: &ValidationThresholds,
    ) -> Vec<ValidationResult> {
        self.run(self.registry.all(), cluster, baseline, current, thresholds).await
    }

    pub async fn run_specific_validators(
        &self,
        names: &[String],
        cluster: &ClusterConfig,
        baseline: &MetricsSnapshot,
        current: &MetricsSnapshot,
        thresholds: &ValidationThresholds,
    ) -> Vec<ValidationResult> {
        self.run(self.registry.by_names(names), cluster, baseline, current, thresholds).await
    }

    async fn run(
        &self,
        validators: Vec<Arc<dyn Validator>>,
        cluster: &ClusterConfig,
        baseline: &MetricsSnapshot,
        current: &MetricsSnapshot,
        thresholds: &ValidationThresholds,
    ) -> Vec<ValidationResult> {
        let mut results = Vec::with_capacity(validators.len());
        for validator in validators {
            let timeout = Duration::from_secs(validator.timeout_seconds());
            let result = match tokio::time::timeout(timeout, validator.validate(cluster, baseline, current, thresholds)).await {
                Ok(result) => result,
                Err(_) => ValidationResult::fail(
                    validator.name(),
                    &cluster.cluster_id,
                    format!("validator '{}' timed out after {}s", validator.name(), validator.timeout_seconds()),
                ),
            };
            let should_stop = self.fail_fast && validator.is_critical() && !result.passed;
            results.push(result);
            if should_stop {
                break;
            }
        }
        results
    }
}
