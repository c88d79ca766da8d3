use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Pass/fail thresholds evaluated by the Istio validators (C7). The named
/// fields are the ones spec.md enumerates explicitly; `extra` carries any
/// forward-compat thresholds future validators may need without requiring
/// a schema change here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub latency_p95_increase_percent: f64,
    pub latency_p99_increase_percent: f64,
    pub error_rate_max: f64,
    #[serde(default, flatten)]
    pub extra: HashMap<String, f64>,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            latency_p95_increase_percent: 20.0,
            latency_p99_increase_percent: 25.0,
            error_rate_max: 0.01,
            extra: HashMap::new(),
        }
    }
}
