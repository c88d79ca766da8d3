//! Capability interfaces consumed by the core (§6) — the third-party SDK
//! wrappers themselves are out of scope; only the trait boundary and a
//! set of in-memory reference implementations (used by tests and the
//! CLI's local-exercise mode) live here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{CloudProviderError, GitOpsProviderError, KubernetesProviderError, MetricsProviderError};

#[derive(Debug, Clone)]
pub struct Condition {
    pub type_: String,
    pub status: String,
}

impl Condition {
    pub fn ready_true() -> Self {
        Self {
            type_: "Ready".to_string(),
            status: "True".to_string(),
        }
    }

    pub fn is_ready(conditions: &[Condition]) -> bool {
        conditions
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True")
    }
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub conditions: Vec<Condition>,
    /// Container name -> image reference, e.g. `istio-proxy -> docker.io/istio/proxyv2:1.20.1`.
    pub containers: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

impl PodInfo {
    pub fn is_ready(&self) -> bool {
        Condition::is_ready(&self.conditions)
    }

    pub fn has_sidecar(&self) -> bool {
        self.containers.contains_key("istio-proxy")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadInfo {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    /// Container names present in the pod template.
    pub template_containers: Vec<String>,
    pub template_annotations: HashMap<String, String>,
    pub ready: bool,
}

impl WorkloadInfo {
    /// Sidecar-selection predicate, §4.8 point 2 / §8 "Sidecar detection".
    pub fn has_istio_sidecar(&self) -> bool {
        self.template_containers.iter().any(|c| c == "istio-proxy")
            || self.template_annotations.contains_key("sidecar.istio.io/status")
            || self
                .template_annotations
                .get("sidecar.istio.io/inject")
                .map(|v| v == "true")
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct SecretValue(pub String);

#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub endpoint: String,
    pub ca_data: String,
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn assume_role(&self, role_arn: &str) -> Result<String, CloudProviderError>;
    async fn get_secret(&self, name: &str) -> Result<SecretValue, CloudProviderError>;
    async fn get_cluster_info(&self, cluster_id: &str) -> Result<ClusterInfo, CloudProviderError>;
    async fn generate_cluster_token(&self, cluster_id: &str) -> Result<String, CloudProviderError>;
    async fn list_clusters(&self) -> Result<Vec<String>, CloudProviderError>;
}

#[async_trait]
pub trait KubernetesProvider: Send + Sync {
    async fn get_nodes(&self) -> Result<Vec<NodeInfo>, KubernetesProviderError>;
    async fn check_nodes_ready(&self) -> Result<bool, KubernetesProviderError> {
        Ok(self.get_nodes().await?.iter().all(|n| Condition::is_ready(&n.conditions)))
    }

    async fn get_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, KubernetesProviderError>;
    async fn check_pods_ready(&self, namespace: &str) -> Result<bool, KubernetesProviderError> {
        Ok(self.get_pods(namespace).await?.iter().all(PodInfo::is_ready))
    }

    async fn get_namespaces(&self) -> Result<Vec<String>, KubernetesProviderError>;
    async fn get_namespaces_by_label(
        &self,
        label_key: &str,
        label_value: Option<&str>,
    ) -> Result<Vec<String>, KubernetesProviderError>;

    async fn get_deployments(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, KubernetesProviderError>;
    async fn get_statefulsets(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, KubernetesProviderError>;
    async fn get_daemonsets(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, KubernetesProviderError>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<WorkloadInfo, KubernetesProviderError>;
    async fn check_deployment_ready(&self, namespace: &str, name: &str) -> Result<bool, KubernetesProviderError> {
        Ok(self.get_deployment(namespace, name).await?.ready)
    }

    async fn restart_deployment(&self, namespace: &str, name: &str, restarted_at: DateTime<Utc>) -> Result<(), KubernetesProviderError>;
    async fn restart_statefulset(&self, namespace: &str, name: &str, restarted_at: DateTime<Utc>) -> Result<(), KubernetesProviderError>;
    async fn restart_daemonset(&self, namespace: &str, name: &str, restarted_at: DateTime<Utc>) -> Result<(), KubernetesProviderError>;

    async fn check_deployment_ready_by_kind(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<bool, KubernetesProviderError>;

    async fn exec_in_pod(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String, KubernetesProviderError>;
}

#[async_trait]
pub trait GitOpsProvider: Send + Sync {
    async fn create_branch(&self, repo: &str, branch: &str, from: &str) -> Result<(), GitOpsProviderError>;
    async fn check_branch_exists(&self, repo: &str, branch: &str) -> Result<bool, GitOpsProviderError>;
    async fn get_file_content(&self, repo: &str, path: &str, branch: &str) -> Result<String, GitOpsProviderError>;
    async fn update_file(&self, repo: &str, path: &str, branch: &str, content: &str, commit_message: &str) -> Result<(), GitOpsProviderError>;
    /// Idempotent: if an open MR from `source_branch` already exists, returns it instead of opening a duplicate.
    async fn create_merge_request(
        &self,
        repo: &str,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
        draft: bool,
    ) -> Result<guard_types::MergeRequestInfo, GitOpsProviderError>;
    async fn get_merge_request(&self, repo: &str, iid: u64) -> Result<guard_types::MergeRequestInfo, GitOpsProviderError>;
    async fn add_merge_request_comment(&self, repo: &str, iid: u64, comment: &str) -> Result<(), GitOpsProviderError>;
}

#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn query_scalar(
        &self,
        metric: &str,
        tags: &guard_types::DatadogTags,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, MetricsProviderError>;
    async fn query_timeseries(
        &self,
        metric: &str,
        tags: &guard_types::DatadogTags,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, MetricsProviderError>;
    async fn query_statistics(
        &self,
        metric: &str,
        tags: &guard_types::DatadogTags,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashMap<String, f64>, MetricsProviderError>;
    async fn check_active_alerts(&self, tags: &guard_types::DatadogTags) -> Result<Vec<String>, MetricsProviderError>;
    async fn get_monitor_status(&self, monitor_id: &str) -> Result<String, MetricsProviderError>;
    async fn query_raw(&self, query: &str) -> Result<serde_json::Value, MetricsProviderError>;
}

/// In-memory reference implementations standing in for the real SDK
/// wrappers. These exist so `guard-core`'s tests and `guard-cli`'s local
/// mode have something to run against; they are not meant to model a
/// real Kubernetes/GitLab/Datadog deployment faithfully.
pub mod fakes {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeKubernetesProvider {
        pub nodes: Mutex<Vec<NodeInfo>>,
        pub pods: Mutex<HashMap<String, Vec<PodInfo>>>,
        pub namespaces: Mutex<Vec<String>>,
        pub deployments: Mutex<HashMap<String, Vec<WorkloadInfo>>>,
        pub statefulsets: Mutex<HashMap<String, Vec<WorkloadInfo>>>,
        pub daemonsets: Mutex<HashMap<String, Vec<WorkloadInfo>>>,
    }

    #[async_trait]
    impl KubernetesProvider for FakeKubernetesProvider {
        async fn get_nodes(&self) -> Result<Vec<NodeInfo>, KubernetesProviderError> {
            Ok(self.nodes.lock().unwrap().clone())
        }

        async fn get_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, KubernetesProviderError> {
            Ok(self.pods.lock().unwrap().get(namespace).cloned().unwrap_or_default())
        }

        async fn get_namespaces(&self) -> Result<Vec<String>, KubernetesProviderError> {
            Ok(self.namespaces.lock().unwrap().clone())
        }

        async fn get_namespaces_by_label(
            &self,
            _label_key: &str,
            _label_value: Option<&str>,
        ) -> Result<Vec<String>, KubernetesProviderError> {
            Ok(self.namespaces.lock().unwrap().clone())
        }

        async fn get_deployments(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, KubernetesProviderError> {
            Ok(self.deployments.lock().unwrap().get(namespace).cloned().unwrap_or_default())
        }

        async fn get_statefulsets(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, KubernetesProviderError> {
            Ok(self.statefulsets.lock().unwrap().get(namespace).cloned().unwrap_or_default())
        }

        async fn get_daemonsets(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, KubernetesProviderError> {
            Ok(self.daemonsets.lock().unwrap().get(namespace).cloned().unwrap_or_default())
        }

        async fn get_deployment(&self, namespace: &str, name: &str) -> Result<WorkloadInfo, KubernetesProviderError> {
            self.deployments
                .lock()
                .unwrap()
                .get(namespace)
                .and_then(|ds| ds.iter().find(|d| d.name == name).cloned())
                .ok_or_else(|| KubernetesProviderError::Api(format!("deployment {namespace}/{name} not found")))
        }

        async fn restart_deployment(&self, namespace: &str, name: &str, _restarted_at: DateTime<Utc>) -> Result<(), KubernetesProviderError> {
            mark_ready(&self.deployments, namespace, name);
            Ok(())
        }

        async fn restart_statefulset(&self, namespace: &str, name: &str, _restarted_at: DateTime<Utc>) -> Result<(), KubernetesProviderError> {
            mark_ready(&self.statefulsets, namespace, name);
            Ok(())
        }

        async fn restart_daemonset(&self, namespace: &str, name: &str, _restarted_at: DateTime<Utc>) -> Result<(), KubernetesProviderError> {
            mark_ready(&self.daemonsets, namespace, name);
            Ok(())
        }

        async fn check_deployment_ready_by_kind(
            &self,
            kind: WorkloadKind,
            namespace: &str,
            name: &str,
        ) -> Result<bool, KubernetesProviderError> {
            let store = match kind {
                WorkloadKind::Deployment => &self.deployments,
                WorkloadKind::StatefulSet => &self.statefulsets,
                WorkloadKind::DaemonSet => &self.daemonsets,
            };
            Ok(store
                .lock()
                .unwrap()
                .get(namespace)
                .and_then(|ds| ds.iter().find(|d| d.name == name).map(|d| d.ready))
                .unwrap_or(false))
        }

        async fn exec_in_pod(&self, _namespace: &str, _pod: &str, _command: &[String]) -> Result<String, KubernetesProviderError> {
            Ok(String::new())
        }
    }

    fn mark_ready(store: &Mutex<HashMap<String, Vec<WorkloadInfo>>>, namespace: &str, name: &str) {
        if let Some(workloads) = store.lock().unwrap().get_mut(namespace) {
            if let Some(w) = workloads.iter_mut().find(|w| w.name == name) {
                w.ready = true;
            }
        }
    }

    #[derive(Default)]
    pub struct FakeGitOpsProvider {
        pub files: Mutex<HashMap<(String, String, String), String>>,
        pub branches: Mutex<HashMap<String, Vec<String>>>,
        pub merge_requests: Mutex<Vec<guard_types::MergeRequestInfo>>,
        next_id: Mutex<u64>,
    }

    #[async_trait]
    impl GitOpsProvider for FakeGitOpsProvider {
        async fn create_branch(&self, repo: &str, branch: &str, _from: &str) -> Result<(), GitOpsProviderError> {
            let mut branches = self.branches.lock().unwrap();
            let entry = branches.entry(repo.to_string()).or_default();
            if entry.contains(&branch.to_string()) {
                return Err(GitOpsProviderError::BranchExists(branch.to_string()));
            }
            entry.push(branch.to_string());
            Ok(())
        }

        async fn check_branch_exists(&self, repo: &str, branch: &str) -> Result<bool, GitOpsProviderError> {
            Ok(self
                .branches
                .lock()
                .unwrap()
                .get(repo)
                .map(|b| b.contains(&branch.to_string()))
                .unwrap_or(false))
        }

        async fn get_file_content(&self, repo: &str, path: &str, branch: &str) -> Result<String, GitOpsProviderError> {
            self.files
                .lock()
                .unwrap()
                .get(&(repo.to_string(), path.to_string(), branch.to_string()))
                .cloned()
                .or_else(|| {
                    self.files
                        .lock()
                        .unwrap()
                        .get(&(repo.to_string(), path.to_string(), "main".to_string()))
                        .cloned()
                })
                .ok_or_else(|| GitOpsProviderError::Remote {
                    repo: repo.to_string(),
                    path: path.to_string(),
                    message: "file not found".to_string(),
                })
        }

        async fn update_file(&self, repo: &str, path: &str, branch: &str, content: &str, _commit_message: &str) -> Result<(), GitOpsProviderError> {
            self.files
                .lock()
                .unwrap()
                .insert((repo.to_string(), path.to_string(), branch.to_string()), content.to_string());
            Ok(())
        }

        async fn create_merge_request(
            &self,
            repo: &str,
            source_branch: &str,
            target_branch: &str,
            title: &str,
            description: &str,
            draft: bool,
        ) -> Result<guard_types::MergeRequestInfo, GitOpsProviderError> {
            let mut mrs = self.merge_requests.lock().unwrap();
            if let Some(existing) = mrs
                .iter()
                .find(|mr| mr.source_branch == source_branch && mr.state == "opened")
            {
                return Ok(existing.clone());
            }
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let now = Utc::now();
            let mr = guard_types::MergeRequestInfo {
                id: *next_id,
                iid: *next_id,
                title: title.to_string(),
                description: description.to_string(),
                source_branch: source_branch.to_string(),
                target_branch: target_branch.to_string(),
                state: if draft { "draft".to_string() } else { "opened".to_string() },
                web_url: format!("https://gitlab.example.com/{repo}/-/merge_requests/{next_id}"),
                created_at: now,
                updated_at: now,
            };
            mrs.push(mr.clone());
            Ok(mr)
        }

        async fn get_merge_request(&self, _repo: &str, iid: u64) -> Result<guard_types::MergeRequestInfo, GitOpsProviderError> {
            self.merge_requests
                .lock()
                .unwrap()
                .iter()
                .find(|mr| mr.iid == iid)
                .cloned()
                .ok_or_else(|| GitOpsProviderError::Remote {
                    repo: String::new(),
                    path: String::new(),
                    message: format!("merge request {iid} not found"),
                })
        }

        async fn add_merge_request_comment(&self, _repo: &str, _iid: u64, _comment: &str) -> Result<(), GitOpsProviderError> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeMetricsProvider {
        pub scalars: Mutex<HashMap<String, f64>>,
    }

    #[async_trait]
    impl MetricsProvider for FakeMetricsProvider {
        async fn query_scalar(
            &self,
            metric: &str,
            _tags: &guard_types::DatadogTags,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Option<f64>, MetricsProviderError> {
            Ok(self.scalars.lock().unwrap().get(metric).copied())
        }

        async fn query_timeseries(
            &self,
            metric: &str,
            _tags: &guard_types::DatadogTags,
            to: DateTime<Utc>,
            _from: DateTime<Utc>,
        ) -> Result<Vec<(DateTime<Utc>, f64)>, MetricsProviderError> {
            Ok(self
                .scalars
                .lock()
                .unwrap()
                .get(metric)
                .map(|v| vec![(to, *v)])
                .unwrap_or_default())
        }

        async fn query_statistics(
            &self,
            metric: &str,
            _tags: &guard_types::DatadogTags,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<HashMap<String, f64>, MetricsProviderError> {
            let mut out = HashMap::new();
            if let Some(v) = self.scalars.lock().unwrap().get(metric) {
                out.insert("avg".to_string(), *v);
            }
            Ok(out)
        }

        async fn check_active_alerts(&self, _tags: &guard_types::DatadogTags) -> Result<Vec<String>, MetricsProviderError> {
            Ok(Vec::new())
        }

        async fn get_monitor_status(&self, _monitor_id: &str) -> Result<String, MetricsProviderError> {
            Ok("OK".to_string())
        }

        async fn query_raw(&self, _query: &str) -> Result<serde_json::Value, MetricsProviderError> {
            Ok(serde_json::json!({}))
        }
    }

    #[derive(Default)]
    pub struct FakeCloudProvider {
        pub clusters: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudProvider for FakeCloudProvider {
        async fn assume_role(&self, role_arn: &str) -> Result<String, CloudProviderError> {
            Ok(format!("fake-session-token-for-{role_arn}"))
        }

        async fn get_secret(&self, name: &str) -> Result<SecretValue, CloudProviderError> {
            Ok(SecretValue(format!("fake-secret-{name}")))
        }

        async fn get_cluster_info(&self, cluster_id: &str) -> Result<ClusterInfo, CloudProviderError> {
            Ok(ClusterInfo {
                endpoint: format!("https://{cluster_id}.example.internal"),
                ca_data: String::new(),
            })
        }

        async fn generate_cluster_token(&self, cluster_id: &str) -> Result<String, CloudProviderError> {
            Ok(format!("fake-token-{cluster_id}"))
        }

        async fn list_clusters(&self) -> Result<Vec<String>, CloudProviderError> {
            Ok(self.clusters.lock().unwrap().clone())
        }
    }
}
