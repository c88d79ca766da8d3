//! Loads cluster fixtures for local exercising: the in-memory state store
//! has no external persistence, so every command reseeds itself from the
//! same JSON file on invocation. Absence of the file is not an error —
//! it just means an empty registry, same as a freshly provisioned table.

use std::sync::Arc;

use anyhow::Context;
use guard_core::{InMemoryStateStore, StateStore};
use guard_types::ClusterConfig;

pub async fn load_state_store(path: &str) -> anyhow::Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let clusters: Vec<ClusterConfig> =
                serde_json::from_str(&contents).with_context(|| format!("'{path}' is not valid cluster JSON"))?;
            for cluster in clusters {
                store.put(cluster).await?;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "no fixtures file found, starting with an empty cluster registry");
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read fixtures file '{path}'")),
    }
    Ok(store)
}
