//! Cluster registry & state store (C1). `update_status_atomic` is the
//! only path by which a cluster's status may change (§3 invariant).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use guard_types::{ClusterConfig, ClusterStatus};

use crate::error::StateStoreError;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, cluster_id: &str) -> Result<Option<ClusterConfig>, StateStoreError>;
    async fn query_by_batch(&self, batch_id: &str) -> Result<Vec<ClusterConfig>, StateStoreError>;
    async fn put(&self, cluster: ClusterConfig) -> Result<(), StateStoreError>;
    async fn delete(&self, cluster_id: &str) -> Result<(), StateStoreError>;
    async fn list_all(&self) -> Result<Vec<ClusterConfig>, StateStoreError>;

    /// Unconditional write of status + arbitrary extra metadata fields.
    async fn update_status(
        &self,
        cluster_id: &str,
        status: ClusterStatus,
        extra_fields: HashMap<String, String>,
    ) -> Result<(), StateStoreError>;

    /// `Ok(true)` on a winning CAS, `Ok(false)` on a precondition rejection
    /// (stored status != `expected_status`) — never an error for the
    /// ordinary race case, per §4.1.
    async fn update_status_atomic(
        &self,
        cluster_id: &str,
        expected_status: ClusterStatus,
        new_status: ClusterStatus,
        extra_fields: HashMap<String, String>,
    ) -> Result<bool, StateStoreError>;

    /// A prerequisite batch is "met" iff every cluster in it has terminal
    /// status `healthy` (or the legacy string `"completed"`, §9 open
    /// question). Absent prerequisites ⇒ trivially ok.
    async fn validate_batch_prerequisites(
        &self,
        batch_id: &str,
        prerequisites: &HashMap<String, Vec<String>>,
    ) -> Result<(bool, String), StateStoreError> {
        let Some(required_batches) = prerequisites.get(batch_id) else {
            return Ok((true, "no prerequisites configured".to_string()));
        };
        for prereq_batch in required_batches {
            let clusters = self.query_by_batch(prereq_batch).await?;
            if clusters.is_empty() {
                return Ok((
                    false,
                    format!("prerequisite batch '{prereq_batch}' has no clusters registered"),
                ));
            }
            for cluster in &clusters {
                if !ClusterStatus::satisfies_prerequisite(cluster.status.as_str()) {
                    return Ok((
                        false,
                        format!(
                            "prerequisite batch '{prereq_batch}' not satisfied: cluster '{}' is '{}'",
                            cluster.cluster_id,
                            cluster.status
                        ),
                    ));
                }
            }
        }
        Ok((true, "all prerequisites satisfied".to_string()))
    }
}

/// In-memory reference `StateStore`, replicating the DynamoDB original's
/// conditional-write semantics with a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryStateStore {
    clusters: Mutex<HashMap<String, ClusterConfig>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, cluster_id: &str) -> Result<Option<ClusterConfig>, StateStoreError> {
        Ok(self.clusters.lock().unwrap().get(cluster_id).cloned())
    }

    async fn query_by_batch(&self, batch_id: &str) -> Result<Vec<ClusterConfig>, StateStoreError> {
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn put(&self, cluster: ClusterConfig) -> Result<(), StateStoreError> {
        self.clusters
            .lock()
            .unwrap()
            .insert(cluster.cluster_id.clone(), cluster);
        Ok(())
    }

    async fn delete(&self, cluster_id: &str) -> Result<(), StateStoreError> {
        self.clusters.lock().unwrap().remove(cluster_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ClusterConfig>, StateStoreError> {
        Ok(self.clusters.lock().unwrap().values().cloned().collect())
    }

    async fn update_status(
        &self,
        cluster_id: &str,
        status: ClusterStatus,
        extra_fields: HashMap<String, String>,
    ) -> Result<(), StateStoreError> {
        let mut clusters = self.clusters.lock().unwrap();
        let cluster = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| StateStoreError::NotFound(cluster_id.to_string()))?;
        cluster.status = status;
        cluster.last_updated = Utc::now();
        cluster.version += 1;
        cluster.metadata.extend(extra_fields);
        Ok(())
    }

    async fn update_status_atomic(
        &self,
        cluster_id: &str,
        expected_status: ClusterStatus,
        new_status: ClusterStatus,
        extra_fields: HashMap<String, String>,
    ) -> Result<bool, StateStoreError> {
        let mut clusters = self.clusters.lock().unwrap();
        let cluster = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| StateStoreError::NotFound(cluster_id.to_string()))?;
        if cluster.status != expected_status {
            return Ok(false);
        }
        cluster.status = new_status;
        cluster.last_updated = Utc::now();
        cluster.version += 1;
        cluster.metadata.extend(extra_fields);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: &str, batch: &str, status: ClusterStatus) -> ClusterConfig {
        let mut c = ClusterConfig::new(id, batch, "devops/k8s-prod", "clusters/prod/istio/helmrelease.yaml", "1.19.0");
        c.status = status;
        c
    }

    #[tokio::test]
    async fn cas_rejects_stale_expected_status() {
        let store = InMemoryStateStore::new();
        store.put(cluster("c1", "b1", ClusterStatus::Pending)).await.unwrap();

        let won = store
            .update_status_atomic("c1", ClusterStatus::PreCheckRunning, ClusterStatus::MrCreated, HashMap::new())
            .await
            .unwrap();
        assert!(!won);

        let got = store.get("c1").await.unwrap().unwrap();
        assert_eq!(got.status, ClusterStatus::Pending);
        assert_eq!(got.version, 0);
    }

    #[tokio::test]
    async fn cas_accepts_matching_expected_status_and_bumps_version() {
        let store = InMemoryStateStore::new();
        store.put(cluster("c1", "b1", ClusterStatus::Pending)).await.unwrap();

        let won = store
            .update_status_atomic("c1", ClusterStatus::Pending, ClusterStatus::PreCheckRunning, HashMap::new())
            .await
            .unwrap();
        assert!(won);

        let got = store.get("c1").await.unwrap().unwrap();
        assert_eq!(got.status, ClusterStatus::PreCheckRunning);
        assert_eq!(got.version, 1);
    }

    #[tokio::test]
    async fn concurrent_cas_on_same_cluster_has_exactly_one_winner() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStateStore::new());
        store.put(cluster("c1", "b1", ClusterStatus::Pending)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_status_atomic("c1", ClusterStatus::Pending, ClusterStatus::PreCheckRunning, HashMap::new())
                    .await
                    .unwrap()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn prerequisites_treat_completed_string_as_satisfying() {
        let store = InMemoryStateStore::new();
        store.put(cluster("c1", "wave-0", ClusterStatus::Healthy)).await.unwrap();

        let mut prereqs = HashMap::new();
        prereqs.insert("wave-1".to_string(), vec!["wave-0".to_string()]);

        let (ok, _msg) = store.validate_batch_prerequisites("wave-1", &prereqs).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn absent_prerequisites_are_trivially_ok() {
        let store = InMemoryStateStore::new();
        let (ok, _msg) = store
            .validate_batch_prerequisites("wave-1", &HashMap::new())
            .await
            .unwrap();
        assert!(ok);
    }
}
