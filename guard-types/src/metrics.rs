use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time read of a fixed set of metrics. `None` values mean the
/// metric provider failed or had no data for that window — callers must
/// tolerate the gap rather than re-query, per spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: HashMap<String, Option<f64>>,
    pub tags: HashMap<String, String>,
}

impl MetricsSnapshot {
    pub fn new(tags: HashMap<String, String>) -> Self {
        Self {
            timestamp: Utc::now(),
            metrics: HashMap::new(),
            tags,
        }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied().flatten()
    }
}
