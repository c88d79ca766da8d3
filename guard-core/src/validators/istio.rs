//! Concrete Istio validators: error-rate and latency regression checks
//! against the captured baseline/current metric snapshots.

use async_trait::async_trait;
use guard_types::{ClusterConfig, MetricsSnapshot, ValidationResult, ValidationThresholds};

use super::Validator;

pub struct ErrorRateValidator;

const ERROR_RATE_5XX: &str = "istio.request.error.5xx.rate";
const REQUEST_TOTAL_RATE: &str = "istio.request.total.rate";

#[async_trait]
impl Validator for ErrorRateValidator {
    fn name(&self) -> &str {
        "istio_error_rate"
    }
    fn description(&self) -> &str {
        "compares current 5xx error rate and request volume against baseline"
    }
    fn is_critical(&self) -> bool {
        true
    }
    fn timeout_seconds(&self) -> u64 {
        30
    }
    fn required_metrics(&self) -> Vec<String> {
        vec![ERROR_RATE_5XX.to_string(), REQUEST_TOTAL_RATE.to_string()]
    }

    async fn validate(
        &self,
        cluster: &ClusterConfig,
        baseline: &MetricsSnapshot,
        current: &MetricsSnapshot,
        thresholds: &ValidationThresholds,
    ) -> ValidationResult {
        let mut result = ValidationResult::new(self.name(), &cluster.cluster_id);

        let current_error_rate = current.get(ERROR_RATE_5XX);
        let baseline_error_rate = baseline.get(ERROR_RATE_5XX);
        let current_request_rate = current.get(REQUEST_TOTAL_RATE);
        let baseline_request_rate = baseline.get(REQUEST_TOTAL_RATE);

        if let Some(current_error_rate) = current_error_rate {
            if current_error_rate > thresholds.error_rate_max {
                result.push_violation(format!(
                    "error rate {current_error_rate} exceeds maximum {}",
                    thresholds.error_rate_max
                ));
            }
            if let Some(baseline_error_rate) = baseline_error_rate {
                if baseline_error_rate > 0.0 && current_error_rate > 2.0 * baseline_error_rate {
                    result.push_violation(format!(
                        "error rate increased from {baseline_error_rate} to {current_error_rate} (more than 2x baseline)"
                    ));
                }
            }
        }

        if let (Some(current_request_rate), Some(baseline_request_rate)) = (current_request_rate, baseline_request_rate) {
            if baseline_request_rate > 0.0 && current_request_rate < 0.8 * baseline_request_rate {
                result.push_violation(format!(
                    "request rate dropped from {baseline_request_rate} to {current_request_rate} (more than 20%)"
                ));
            }
        }

        if result.violations.is_empty() {
            result.message = "error rate and request volume within bounds".to_string();
        } else {
            result.message = format!("{} violation(s) detected", result.violations.len());
        }
        result
    }
}

pub struct LatencyValidator;

const LATENCY_P95: &str = "istio.request.latency.p95";
const LATENCY_P99: &str = "istio.request.latency.p99";

#[async_trait]
impl Validator for LatencyValidator {
    fn name(&self) -> &str {
        "istio_latency"
    }
    fn description(&self) -> &str {
        "compares current p95/p99 latency against baseline"
    }
    fn is_critical(&self) -> bool {
        true
    }
    fn timeout_seconds(&self) -> u64 {
        30
    }
    fn required_metrics(&self) -> Vec<String> {
        vec![LATENCY_P95.to_string(), LATENCY_P99.to_string()]
    }

    async fn validate(
        &self,
        cluster: &ClusterConfig,
        baseline: &MetricsSnapshot,
        current: &MetricsSnapshot,
        thresholds: &ValidationThresholds,
    ) -> ValidationResult {
        let mut result = ValidationResult::new(self.name(), &cluster.cluster_id);

        check_percentile(&mut result, "p95", baseline.get(LATENCY_P95), current.get(LATENCY_P95), thresholds.latency_p95_increase_percent);
        check_percentile(&mut result, "p99", baseline.get(LATENCY_P99), current.get(LATENCY_P99), thresholds.latency_p99_increase_percent);

        if result.violations.is_empty() {
            result.message = "latency within bounds".to_string();
        } else {
            result.message = format!("{} violation(s) detected", result.violations.len());
        }
        result
    }
}

fn check_percentile(result: &mut ValidationResult, label: &str, baseline: Option<f64>, current: Option<f64>, threshold_percent: f64) {
    let (Some(baseline), Some(current)) = (baseline, current) else {
        return;
    };
    if baseline <= 0.0 {
        return; // percentile skipped when baseline is zero, per spec
    }
    let percent_increase = (current - baseline) / baseline * 100.0;
    if percent_increase > threshold_percent {
        result.push_violation(format!(
            "{label} latency increased {percent_increase:.1}% ({baseline} -> {current} ms), exceeds threshold {threshold_percent}%"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(metrics: &[(&str, f64)]) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::new(HashMap::new());
        for (k, v) in metrics {
            snapshot.metrics.insert(k.to_string(), Some(*v));
        }
        snapshot
    }

    fn cluster() -> ClusterConfig {
        ClusterConfig::new("c1", "b1", "repo", "path.yaml", "1.20.0")
    }

    #[tokio::test]
    async fn error_rate_exceeding_max_and_doubling_baseline_both_reported() {
        let baseline = snapshot(&[(ERROR_RATE_5XX, 0.0005), (REQUEST_TOTAL_RATE, 10000.0)]);
        let current = snapshot(&[(ERROR_RATE_5XX, 0.002), (REQUEST_TOTAL_RATE, 10000.0)]);
        let thresholds = ValidationThresholds { error_rate_max: 0.001, ..Default::default() };

        let result = ErrorRateValidator.validate(&cluster(), &baseline, &current, &thresholds).await;
        assert!(!result.passed);
        assert!(result.violations.iter().any(|v| v.contains("exceeds maximum")));
        assert!(result.violations.iter().any(|v| v.contains("increased")));
    }

    #[tokio::test]
    async fn error_rate_exactly_at_threshold_passes() {
        let baseline = snapshot(&[(ERROR_RATE_5XX, 0.001), (REQUEST_TOTAL_RATE, 10000.0)]);
        let current = snapshot(&[(ERROR_RATE_5XX, 0.001), (REQUEST_TOTAL_RATE, 10000.0)]);
        let thresholds = ValidationThresholds { error_rate_max: 0.001, ..Default::default() };

        let result = ErrorRateValidator.validate(&cluster(), &baseline, &current, &thresholds).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn request_rate_dropped_exactly_20_percent_passes() {
        let baseline = snapshot(&[(ERROR_RATE_5XX, 0.0001), (REQUEST_TOTAL_RATE, 10000.0)]);
        let current = snapshot(&[(ERROR_RATE_5XX, 0.0001), (REQUEST_TOTAL_RATE, 8000.0)]);
        let thresholds = ValidationThresholds::default();

        let result = ErrorRateValidator.validate(&cluster(), &baseline, &current, &thresholds).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn zero_baseline_request_rate_skips_drop_check() {
        let baseline = snapshot(&[(ERROR_RATE_5XX, 0.0001), (REQUEST_TOTAL_RATE, 0.0)]);
        let current = snapshot(&[(ERROR_RATE_5XX, 0.0001), (REQUEST_TOTAL_RATE, 1.0)]);
        let thresholds = ValidationThresholds::default();

        let result = ErrorRateValidator.validate(&cluster(), &baseline, &current, &thresholds).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn latency_percent_increase_exactly_at_threshold_passes() {
        let baseline = snapshot(&[(LATENCY_P95, 100.0), (LATENCY_P99, 150.0)]);
        let current = snapshot(&[(LATENCY_P95, 120.0), (LATENCY_P99, 150.0)]);
        let thresholds = ValidationThresholds { latency_p95_increase_percent: 20.0, ..Default::default() };

        let result = LatencyValidator.validate(&cluster(), &baseline, &current, &thresholds).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn latency_zero_baseline_percentile_is_skipped() {
        let baseline = snapshot(&[(LATENCY_P95, 0.0), (LATENCY_P99, 150.0)]);
        let current = snapshot(&[(LATENCY_P95, 500.0), (LATENCY_P99, 150.0)]);
        let thresholds = ValidationThresholds::default();

        let result = LatencyValidator.validate(&cluster(), &baseline, &current, &thresholds).await;
        assert!(result.passed);
    }
}
