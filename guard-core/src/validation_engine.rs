//! Validation engine (C8): reconciliation wait, soak period, mesh
//! deployment validation, and sidecar-aware wave-based workload restart.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use guard_types::{CheckResult, ClusterConfig};

use crate::providers::{KubernetesProvider, WorkloadKind, WorkloadInfo};

/// Shells out to the reconciler CLI. Boxed as a trait object so tests can
/// substitute a fixed transcript instead of spawning `flux`.
pub type ReconcilerLister = Box<dyn Fn(&str) -> std::io::Result<String> + Send + Sync>;

pub struct ValidationEngine {
    kubernetes: Arc<dyn KubernetesProvider>,
    list_kustomizations: ReconcilerLister,
    list_helmreleases: ReconcilerLister,
    run_mesh_analyze: Box<dyn Fn() -> std::io::Result<String> + Send + Sync>,
    run_proxy_status: Box<dyn Fn() -> std::io::Result<String> + Send + Sync>,
}

impl ValidationEngine {
    pub fn new(kubernetes: Arc<dyn KubernetesProvider>) -> Self {
        Self {
            kubernetes,
            list_kustomizations: Box::new(|_| run_flux(&["get", "kustomizations", "-A", "--no-header"])),
            list_helmreleases: Box::new(|_| run_flux(&["get", "helmreleases", "-A", "--no-header"])),
            run_mesh_analyze: Box::new(|| run_istioctl(&["analyze", "--namespace", "istio-system"])),
            run_proxy_status: Box::new(|| run_istioctl(&["proxy-status"])),
        }
    }

    #[cfg(test)]
    pub fn with_fakes(
        kubernetes: Arc<dyn KubernetesProvider>,
        list_kustomizations: ReconcilerLister,
        list_helmreleases: ReconcilerLister,
        run_mesh_analyze: Box<dyn Fn() -> std::io::Result<String> + Send + Sync>,
        run_proxy_status: Box<dyn Fn() -> std::io::Result<String> + Send + Sync>,
    ) -> Self {
        Self {
            kubernetes,
            list_kustomizations,
            list_helmreleases,
            run_mesh_analyze,
            run_proxy_status,
        }
    }

    /// Polls until every kustomization/helmrelease row reports Ready=True
    /// (empty set counts as ready), logging progress every 30s, up to
    /// `timeout_minutes`. Returns `false` on overall timeout rather than
    /// erroring — tool absence or parse failure is just another retry.
    pub async fn wait_for_flux_sync(&self, timeout_minutes: i64, poll_interval_sec: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs((timeout_minutes * 60) as u64);
        let mut last_log = tokio::time::Instant::now();

        loop {
            let kustomizations_ready = (self.list_kustomizations)("istio-system")
                .map(|out| all_rows_ready(&out))
                .unwrap_or(false);
            let helmreleases_ready = (self.list_helmreleases)("istio-system")
                .map(|out| all_rows_ready(&out))
                .unwrap_or(false);

            if kustomizations_ready && helmreleases_ready {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            if last_log.elapsed() >= Duration::from_secs(30) {
                tracing::info!("waiting for flux sync to complete");
                last_log = tokio::time::Instant::now();
            }
            tokio::time::sleep(Duration::from_secs(poll_interval_sec)).await;
        }
    }

    /// Blocks for `soak_period_minutes * 60` seconds, logging progress at
    /// each `progress_interval_sec`.
    pub async fn run_soak_period(&self, soak_period_minutes: i64, progress_interval_sec: u64) {
        let total = Duration::from_secs((soak_period_minutes * 60) as u64);
        let start = tokio::time::Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                return;
            }
            let remaining = total - elapsed;
            let step = remaining.min(Duration::from_secs(progress_interval_sec));
            tokio::time::sleep(step).await;
            tracing::info!(elapsed_sec = start.elapsed().as_secs(), total_sec = total.as_secs(), "soaking");
        }
    }

    pub async fn validate_istio_deployment(&self, cluster: &ClusterConfig) -> CheckResult {
        let name = "validate_istio_deployment";

        let control_plane_pods = match self.kubernetes.get_pods("istio-system").await {
            Ok(pods) => pods,
            Err(e) => return CheckResult::fail(name, e.to_string()),
        };

        let istiod_pods: Vec<_> = control_plane_pods
            .iter()
            .filter(|p| p.labels.get("app").map(String::as_str) == Some("istiod"))
            .collect();
        if !istiod_pods.is_empty() && !istiod_pods.iter().all(|p| p.is_ready()) {
            return CheckResult::fail(name, "one or more istiod pods are not ready");
        }

        let gateway_pods: Vec<_> = control_plane_pods
            .iter()
            .filter(|p| {
                p.labels.get("istio").map(String::as_str) == Some("ingressgateway")
                    || p.labels.get("app").map(String::as_str) == Some("istio-ingressgateway")
            })
            .collect();
        // Gateway absence is tolerated; unreadiness of an existing gateway is not.
        if !gateway_pods.is_empty() && !gateway_pods.iter().all(|p| p.is_ready()) {
            return CheckResult::fail(name, "one or more ingress gateway pods are not ready");
        }

        let analysis = match (self.run_mesh_analyze)() {
            Ok(out) => out,
            Err(e) => return CheckResult::fail(name, format!("mesh analyze unavailable: {e}")),
        };
        let error_lines: Vec<&str> = analysis.lines().filter(|l| l.contains("Error")).collect();
        if !error_lines.is_empty() {
            return CheckResult::fail(name, format!("mesh analysis reported {} error(s)", error_lines.len()));
        }

        let proxy_status = match (self.run_proxy_status)() {
            Ok(out) => out,
            Err(e) => return CheckResult::fail(name, format!("proxy-status unavailable: {e}")),
        };
        let unsynced: Vec<&str> = proxy_status
            .lines()
            .filter(|line| !line.split_whitespace().next().unwrap_or("").contains("SYNCED"))
            .take(3)
            .collect();
        if !unsynced.is_empty() {
            return CheckResult::fail(name, format!("unsynced proxies: {}", unsynced.join(", ")));
        }

        let _ = cluster;
        CheckResult::pass(name, "istio control plane and data plane healthy")
    }

    /// Enumerate target namespaces, select sidecar-bearing workloads,
    /// restart in waves of `wave_size`, optionally waiting for readiness
    /// between waves (including the last) with a per-wave timeout that
    /// only warns — it never fails the whole operation.
    pub async fn restart_pods_with_istio_sidecars(
        &self,
        namespace: Option<&str>,
        wave_size: usize,
        wait_for_ready: bool,
        readiness_timeout_sec: u64,
    ) -> CheckResult {
        let name = "restart_pods_with_istio_sidecars";

        let namespaces = match self.target_namespaces(namespace).await {
            Ok(ns) => ns,
            Err(e) => return CheckResult::fail(name, e.to_string()),
        };

        let mut workloads = Vec::new();
        for ns in &namespaces {
            for kind in [WorkloadKind::Deployment, WorkloadKind::StatefulSet, WorkloadKind::DaemonSet] {
                let fetched = match kind {
                    WorkloadKind::Deployment => self.kubernetes.get_deployments(ns).await,
                    WorkloadKind::StatefulSet => self.kubernetes.get_statefulsets(ns).await,
                    WorkloadKind::DaemonSet => self.kubernetes.get_daemonsets(ns).await,
                };
                match fetched {
                    Ok(found) => workloads.extend(found.into_iter().filter(WorkloadInfo::has_istio_sidecar)),
                    Err(e) => return CheckResult::fail(name, e.to_string()),
                }
            }
        }

        let mut restarted = 0i64;
        let mut failed = 0i64;

        for wave in workloads.chunks(wave_size.max(1)) {
            let restarted_at = Utc::now();
            let mut wave_ok = Vec::new();
            for workload in wave {
                let result = match workload.kind {
                    WorkloadKind::Deployment => self.kubernetes.restart_deployment(&workload.namespace, &workload.name, restarted_at).await,
                    WorkloadKind::StatefulSet => self.kubernetes.restart_statefulset(&workload.namespace, &workload.name, restarted_at).await,
                    WorkloadKind::DaemonSet => self.kubernetes.restart_daemonset(&workload.namespace, &workload.name, restarted_at).await,
                };
                match result {
                    Ok(()) => {
                        restarted += 1;
                        wave_ok.push(workload);
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(workload = %workload.name, error = %e, "failed to restart workload");
                    }
                }
            }

            if wait_for_ready {
                self.wait_for_wave_ready(&wave_ok, readiness_timeout_sec).await;
            }
        }

        let result = if failed == 0 {
            CheckResult::pass(name, format!("restarted {restarted} workload(s), 0 failures"))
        } else {
            CheckResult::fail(name, format!("restarted {restarted} workload(s), {failed} failure(s)"))
        };
        result.with_metric("restarted_resources", restarted).with_metric("failed_resources", failed)
    }

    async fn wait_for_wave_ready(&self, wave: &[&WorkloadInfo], readiness_timeout_sec: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(readiness_timeout_sec);
        loop {
            let mut all_ready = true;
            for workload in wave {
                match self
                    .kubernetes
                    .check_deployment_ready_by_kind(workload.kind, &workload.namespace, &workload.name)
                    .await
                {
                    Ok(true) => {}
                    _ => {
                        all_ready = false;
                        break;
                    }
                }
            }
            if all_ready {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("wave readiness wait timed out, proceeding to next wave");
                return;
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }

    async fn target_namespaces(&self, namespace: Option<&str>) -> Result<Vec<String>, crate::error::KubernetesProviderError> {
        if let Some(ns) = namespace {
            return Ok(vec![ns.to_string()]);
        }
        let mut set: HashSet<String> = HashSet::new();
        set.extend(self.kubernetes.get_namespaces_by_label("istio-injection", Some("enabled")).await?);
        set.extend(self.kubernetes.get_namespaces_by_label("istio.io/rev", None).await?);
        let mut out: Vec<String> = set.into_iter().collect();
        out.sort();
        Ok(out)
    }
}

fn all_rows_ready(transcript: &str) -> bool {
    transcript
        .lines()
        .filter(|l| !l.trim().is_empty())
        .all(|line| line.split('\t').nth(1).map(|ready| ready.trim() == "True").unwrap_or(false))
}

fn run_flux(args: &[&str]) -> std::io::Result<String> {
    let output = std::process::Command::new("flux").args(args).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn run_istioctl(args: &[&str]) -> std::io::Result<String> {
    let output = std::process::Command::new("istioctl").args(args).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::FakeKubernetesProvider;
    use crate::providers::{Condition, PodInfo};
    use std::collections::HashMap;

    fn engine_with(
        kubernetes: Arc<dyn KubernetesProvider>,
        kustomizations: &'static str,
        helmreleases: &'static str,
    ) -> ValidationEngine {
        ValidationEngine::with_fakes(
            kubernetes,
            Box::new(move |_| Ok(kustomizations.to_string())),
            Box::new(move |_| Ok(helmreleases.to_string())),
            Box::new(|| Ok(String::new())),
            Box::new(|| Ok(String::new())),
        )
    }

    #[tokio::test]
    async fn wait_for_flux_sync_succeeds_when_all_rows_ready() {
        let engine = engine_with(
            Arc::new(FakeKubernetesProvider::default()),
            "istio-system\tistiod\tTrue\n",
            "istio-system\tistiod\tTrue\n",
        );
        assert!(engine.wait_for_flux_sync(1, 1).await);
    }

    #[tokio::test]
    async fn wait_for_flux_sync_empty_output_counts_as_ready() {
        let engine = engine_with(Arc::new(FakeKubernetesProvider::default()), "", "");
        assert!(engine.wait_for_flux_sync(1, 1).await);
    }

    #[tokio::test]
    async fn wait_for_flux_sync_times_out_when_rows_not_ready() {
        let engine = engine_with(
            Arc::new(FakeKubernetesProvider::default()),
            "istio-system\tistiod\tFalse\n",
            "",
        );
        // timeout_minutes=0 forces immediate deadline check after the first poll
        assert!(!engine.wait_for_flux_sync(0, 1).await);
    }

    #[tokio::test]
    async fn sidecar_selection_matches_only_the_three_documented_conditions() {
        let w_container = WorkloadInfo {
            kind: WorkloadKind::Deployment,
            name: "a".into(),
            namespace: "ns".into(),
            template_containers: vec!["istio-proxy".to_string()],
            template_annotations: HashMap::new(),
            ready: true,
        };
        let w_annotation_status = WorkloadInfo {
            template_containers: vec![],
            template_annotations: HashMap::from([("sidecar.istio.io/status".to_string(), "{}".to_string())]),
            ..w_container.clone()
        };
        let w_annotation_inject = WorkloadInfo {
            template_containers: vec![],
            template_annotations: HashMap::from([("sidecar.istio.io/inject".to_string(), "true".to_string())]),
            ..w_container.clone()
        };
        let w_none = WorkloadInfo {
            template_containers: vec!["app".to_string()],
            template_annotations: HashMap::new(),
            ..w_container.clone()
        };

        assert!(w_container.has_istio_sidecar());
        assert!(w_annotation_status.has_istio_sidecar());
        assert!(w_annotation_inject.has_istio_sidecar());
        assert!(!w_none.has_istio_sidecar());
    }

    #[tokio::test]
    async fn restart_waves_respect_wave_size_and_report_counts() {
        let k8s = FakeKubernetesProvider::default();
        k8s.namespaces.lock().unwrap().push("default".to_string());
        {
            let mut deployments = k8s.deployments.lock().unwrap();
            let workloads: Vec<WorkloadInfo> = (0..7)
                .map(|i| WorkloadInfo {
                    kind: WorkloadKind::Deployment,
                    name: format!("app-{i}"),
                    namespace: "default".to_string(),
                    template_containers: vec!["istio-proxy".to_string()],
                    template_annotations: HashMap::new(),
                    ready: true,
                })
                .collect();
            deployments.insert("default".to_string(), workloads);
        }
        let engine = engine_with(Arc::new(k8s), "", "");
        let result = engine.restart_pods_with_istio_sidecars(Some("default"), 5, false, 1).await;
        assert!(result.passed);
        assert_eq!(result.metrics.get("restarted_resources").unwrap(), &serde_json::json!(7));
    }

    #[tokio::test]
    async fn validate_istio_deployment_tolerates_absent_gateway() {
        let k8s = FakeKubernetesProvider::default();
        k8s.pods.lock().unwrap().insert(
            "istio-system".to_string(),
            vec![PodInfo {
                name: "istiod-1".into(),
                namespace: "istio-system".into(),
                conditions: vec![Condition::ready_true()],
                containers: HashMap::new(),
                labels: HashMap::from([("app".to_string(), "istiod".to_string())]),
            }],
        );
        let engine = engine_with(Arc::new(k8s), "", "");
        let result = engine.validate_istio_deployment(&ClusterConfig::new("c1", "b1", "r", "p", "1.20.0")).await;
        assert!(result.passed);
    }
}
