use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row shape persisted by the distributed lock's store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource_id: String,
    pub owner: String,
    pub expiry_time: DateTime<Utc>,
    pub acquired_at: DateTime<Utc>,
    /// Strictly monotonic per `resource_id` across its entire lifetime —
    /// never reset when a lock expires and is re-acquired.
    pub fencing_token: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time < now
    }
}
