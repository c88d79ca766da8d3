//! Domain checks (C4): concrete pre-flight predicates over a cluster.

use std::sync::LazyLock;

use async_trait::async_trait;
use guard_types::{CheckResult, ClusterConfig};
use regex::Regex;

use super::{Check, CheckContext};
use crate::providers::Condition;

static SIDECAR_IMAGE_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+\.\d+\.\d+)(?:[-@]|$)").unwrap());

pub struct ControlPlaneReachableCheck;

#[async_trait]
impl Check for ControlPlaneReachableCheck {
    fn name(&self) -> &str {
        "control_plane_reachable"
    }
    fn description(&self) -> &str {
        "verifies the Kubernetes API server responds and reports at least one node"
    }
    fn is_critical(&self) -> bool {
        true
    }
    fn timeout_seconds(&self) -> u64 {
        30
    }

    async fn execute(&self, _cluster: &ClusterConfig, context: &CheckContext) -> CheckResult {
        match context.kubernetes.get_nodes().await {
            Ok(nodes) if nodes.is_empty() => {
                CheckResult::fail(self.name(), "control plane reachable but reported zero nodes").with_metric("node_count", 0)
            }
            Ok(nodes) => CheckResult::pass(self.name(), "control plane reachable").with_metric("node_count", nodes.len() as i64),
            Err(e) => CheckResult::fail(self.name(), e.to_string()),
        }
    }
}

pub struct AllNodesReadyCheck;

#[async_trait]
impl Check for AllNodesReadyCheck {
    fn name(&self) -> &str {
        "all_nodes_ready"
    }
    fn description(&self) -> &str {
        "verifies every cluster node reports condition Ready=True"
    }
    fn is_critical(&self) -> bool {
        true
    }
    fn timeout_seconds(&self) -> u64 {
        30
    }

    async fn execute(&self, _cluster: &ClusterConfig, context: &CheckContext) -> CheckResult {
        let nodes = match context.kubernetes.get_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => return CheckResult::fail(self.name(), e.to_string()),
        };
        let unready: Vec<&str> = nodes
            .iter()
            .filter(|n| !Condition::is_ready(&n.conditions))
            .map(|n| n.name.as_str())
            .collect();

        if unready.is_empty() {
            CheckResult::pass(self.name(), "all nodes ready")
        } else {
            CheckResult::fail(self.name(), format!("unready nodes: {}", unready.join(", ")))
                .with_metric("unready_count", unready.len() as i64)
                .with_metric("unready_nodes", unready.join(","))
        }
    }
}

pub struct NamespacedPodHealthCheck {
    pub namespaces: Vec<String>,
}

impl Default for NamespacedPodHealthCheck {
    fn default() -> Self {
        Self {
            namespaces: vec!["kube-system".to_string()],
        }
    }
}

#[async_trait]
impl Check for NamespacedPodHealthCheck {
    fn name(&self) -> &str {
        "namespaced_pod_health"
    }
    fn description(&self) -> &str {
        "verifies pods in configured namespaces report condition Ready=True"
    }
    fn is_critical(&self) -> bool {
        false
    }
    fn timeout_seconds(&self) -> u64 {
        30
    }

    async fn execute(&self, _cluster: &ClusterConfig, context: &CheckContext) -> CheckResult {
        let mut unready = Vec::new();
        for namespace in &self.namespaces {
            let pods = match context.kubernetes.get_pods(namespace).await {
                Ok(pods) => pods,
                Err(e) => return CheckResult::fail(self.name(), e.to_string()),
            };
            for pod in pods.iter().filter(|p| !p.is_ready()) {
                unready.push(format!("{namespace}/{}", pod.name));
            }
        }

        if unready.is_empty() {
            return CheckResult::pass(self.name(), "all namespaced pods ready");
        }

        let mut shown: Vec<&str> = unready.iter().take(5).map(String::as_str).collect();
        let message = if unready.len() > 5 {
            shown.push("…");
            format!("unready pods: {}", shown.join(", "))
        } else {
            format!("unready pods: {}", shown.join(", "))
        };
        CheckResult::fail(self.name(), message).with_metric("unready_count", unready.len() as i64)
    }
}

/// Shells out to the mesh-config-analysis CLI (`istioctl analyze`
/// equivalent). `run_analysis` is a seam so tests can substitute a fixed
/// transcript instead of spawning a real subprocess.
pub struct MeshConfigAnalysisCheck {
    pub namespace: String,
    pub run_analysis: Box<dyn Fn(&str) -> std::io::Result<String> + Send + Sync>,
}

impl MeshConfigAnalysisCheck {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            run_analysis: Box::new(run_istioctl_analyze),
        }
    }
}

fn run_istioctl_analyze(namespace: &str) -> std::io::Result<String> {
    let output = std::process::Command::new("istioctl")
        .args(["analyze", "--namespace", namespace])
        .output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl Check for MeshConfigAnalysisCheck {
    fn name(&self) -> &str {
        "mesh_config_analysis"
    }
    fn description(&self) -> &str {
        "runs mesh configuration static analysis and fails on any reported error"
    }
    fn is_critical(&self) -> bool {
        true
    }
    fn timeout_seconds(&self) -> u64 {
        60
    }

    async fn execute(&self, _cluster: &ClusterConfig, _context: &CheckContext) -> CheckResult {
        let transcript = match (self.run_analysis)(&self.namespace) {
            Ok(out) => out,
            Err(e) => return CheckResult::fail(self.name(), format!("mesh analysis tool unavailable: {e}")),
        };

        let mut errors = 0i64;
        let mut warnings = 0i64;
        for line in transcript.lines() {
            if line.contains("Error") {
                errors += 1;
            } else if line.contains("Warning") {
                warnings += 1;
            }
        }
        let issues_found = errors + warnings;

        let result = if errors == 0 {
            CheckResult::pass(self.name(), format!("mesh config analysis found {warnings} warning(s), 0 errors"))
        } else {
            CheckResult::fail(self.name(), format!("mesh config analysis found {errors} error(s)"))
        };
        result
            .with_metric("issues_found", issues_found)
            .with_metric("errors", errors)
            .with_metric("warnings", warnings)
    }
}

pub struct SidecarVersionCheck;

#[async_trait]
impl Check for SidecarVersionCheck {
    fn name(&self) -> &str {
        "sidecar_version"
    }
    fn description(&self) -> &str {
        "verifies every injected istio-proxy sidecar matches the cluster's recorded Istio version"
    }
    fn is_critical(&self) -> bool {
        false
    }
    fn timeout_seconds(&self) -> u64 {
        30
    }

    async fn execute(&self, cluster: &ClusterConfig, context: &CheckContext) -> CheckResult {
        let namespaces = match context
            .kubernetes
            .get_namespaces_by_label("istio-injection", Some("enabled"))
            .await
        {
            Ok(ns) => ns,
            Err(e) => return CheckResult::fail(self.name(), e.to_string()),
        };

        let mut total_pods = 0i64;
        let mut mismatches = 0i64;

        for namespace in namespaces {
            let pods = match context.kubernetes.get_pods(&namespace).await {
                Ok(pods) => pods,
                Err(e) => return CheckResult::fail(self.name(), e.to_string()),
            };
            for pod in pods {
                let Some(image) = pod.containers.get("istio-proxy") else {
                    continue;
                };
                total_pods += 1;
                let Some(captures) = SIDECAR_IMAGE_VERSION_RE.captures(image) else {
                    // Invalid/unparseable tag is silently skipped but the pod is still counted.
                    continue;
                };
                let found_version = &captures[1];
                if found_version != cluster.current_istio_version.trim_start_matches('v') {
                    mismatches += 1;
                }
            }
        }

        let result = if mismatches == 0 {
            CheckResult::pass(self.name(), format!("{total_pods} sidecars checked, all match {}", cluster.current_istio_version))
        } else {
            CheckResult::fail(self.name(), format!("{mismatches} of {total_pods} sidecars do not match {}", cluster.current_istio_version))
        };
        result.with_metric("total_pods", total_pods).with_metric("mismatches", mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::{FakeCloudProvider, FakeKubernetesProvider, FakeMetricsProvider};
    use crate::providers::{NodeInfo, PodInfo};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn cluster() -> ClusterConfig {
        ClusterConfig::new("c1", "b1", "repo", "path.yaml", "1.20.0")
    }

    fn context(k8s: FakeKubernetesProvider) -> CheckContext {
        CheckContext {
            kubernetes: Arc::new(k8s),
            cloud: Arc::new(FakeCloudProvider::default()),
            metrics: Arc::new(FakeMetricsProvider::default()),
            extras: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn control_plane_reachable_fails_with_zero_nodes() {
        let k8s = FakeKubernetesProvider::default();
        let result = ControlPlaneReachableCheck.execute(&cluster(), &context(k8s)).await;
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn all_nodes_ready_reports_unready_names() {
        let k8s = FakeKubernetesProvider::default();
        k8s.nodes.lock().unwrap().push(NodeInfo {
            name: "node-1".into(),
            conditions: vec![Condition { type_: "Ready".into(), status: "False".into() }],
        });
        let result = AllNodesReadyCheck.execute(&cluster(), &context(k8s)).await;
        assert!(!result.passed);
        assert!(result.message.contains("node-1"));
    }

    #[tokio::test]
    async fn sidecar_version_check_flags_mismatched_tag() {
        let k8s = FakeKubernetesProvider::default();
        k8s.namespaces.lock().unwrap().push("default".to_string());
        let mut containers = HashMap::new();
        containers.insert("istio-proxy".to_string(), "docker.io/istio/proxyv2:1.19.0".to_string());
        k8s.pods.lock().unwrap().insert(
            "default".to_string(),
            vec![PodInfo {
                name: "app-1".into(),
                namespace: "default".into(),
                conditions: vec![Condition::ready_true()],
                containers,
                labels: HashMap::new(),
            }],
        );
        let result = SidecarVersionCheck.execute(&cluster(), &context(k8s)).await;
        assert!(!result.passed);
        assert_eq!(result.metrics.get("mismatches").unwrap(), &serde_json::json!(1));
    }

    #[tokio::test]
    async fn sidecar_version_check_silently_skips_unparseable_tags_but_counts_pod() {
        let k8s = FakeKubernetesProvider::default();
        k8s.namespaces.lock().unwrap().push("default".to_string());
        let mut containers = HashMap::new();
        containers.insert("istio-proxy".to_string(), "docker.io/istio/proxyv2:latest".to_string());
        k8s.pods.lock().unwrap().insert(
            "default".to_string(),
            vec![PodInfo {
                name: "app-1".into(),
                namespace: "default".into(),
                conditions: vec![Condition::ready_true()],
                containers,
                labels: HashMap::new(),
            }],
        );
        let result = SidecarVersionCheck.execute(&cluster(), &context(k8s)).await;
        assert!(result.passed);
        assert_eq!(result.metrics.get("total_pods").unwrap(), &serde_json::json!(1));
        assert_eq!(result.metrics.get("mismatches").unwrap(), &serde_json::json!(0));
    }
}
