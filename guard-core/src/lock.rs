//! Distributed lock with fencing (C2). `auto_renew` is scoped: its
//! lifetime is bounded by the holder's `async` block and joined on scope
//! exit (§9 "sidecar auto-renewal of locks" redesign flag) rather than
//! detached as a process-lifetime background task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guard_types::LockRecord;
use tokio_util::sync::CancellationToken;

use crate::error::LockAcquisitionError;

#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn acquire(
        &self,
        resource_id: &str,
        owner: Option<String>,
        timeout_sec: i64,
        wait: bool,
        wait_timeout_sec: u64,
    ) -> Result<(String, u64), LockAcquisitionError>;

    async fn release(&self, resource_id: &str, owner: &str) -> Result<(), LockAcquisitionError>;

    async fn check(&self, resource_id: &str) -> Option<LockRecord>;

    async fn extend(
        &self,
        resource_id: &str,
        owner: &str,
        fencing_token: u64,
        additional_sec: i64,
    ) -> Result<(), LockAcquisitionError>;
}

/// In-memory reference lock store. A single process exercising this
/// still gets correct fencing-token semantics; it just can't defend
/// against a second *process* — the contract is about the algorithm,
/// not the backing store.
#[derive(Default)]
pub struct InMemoryDistributedLock {
    records: Mutex<HashMap<String, LockRecord>>,
}

impl InMemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire_once(&self, resource_id: &str, owner: &str, timeout_sec: i64) -> Option<u64> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        let previous_token = match records.get(resource_id) {
            Some(existing) if !existing.is_expired(now) => return None,
            Some(existing) => existing.fencing_token,
            None => 0,
        };
        let fencing_token = previous_token + 1;
        records.insert(
            resource_id.to_string(),
            LockRecord {
                resource_id: resource_id.to_string(),
                owner: owner.to_string(),
                expiry_time: now + chrono::Duration::seconds(timeout_sec),
                acquired_at: now,
                fencing_token,
            },
        );
        Some(fencing_token)
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
    async fn acquire(
        &self,
        resource_id: &str,
        owner: Option<String>,
        timeout_sec: i64,
        wait: bool,
        wait_timeout_sec: u64,
    ) -> Result<(String, u64), LockAcquisitionError> {
        let owner = owner.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(token) = self.try_acquire_once(resource_id, &owner, timeout_sec) {
            return Ok((owner, token));
        }
        if !wait {
            return Err(LockAcquisitionError::Held {
                resource_id: resource_id.to_string(),
            });
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_timeout_sec);
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if let Some(token) = self.try_acquire_once(resource_id, &owner, timeout_sec) {
                return Ok((owner, token));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LockAcquisitionError::WaitTimeout {
                    resource_id: resource_id.to_string(),
                    wait_timeout_sec,
                });
            }
        }
    }

    async fn release(&self, resource_id: &str, owner: &str) -> Result<(), LockAcquisitionError> {
        let mut records = self.records.lock().unwrap();
        match records.get(resource_id) {
            Some(record) if record.owner == owner => {
                records.remove(resource_id);
                Ok(())
            }
            _ => Err(LockAcquisitionError::OwnerMismatch {
                resource_id: resource_id.to_string(),
            }),
        }
    }

    async fn check(&self, resource_id: &str) -> Option<LockRecord> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        match records.get(resource_id) {
            Some(record) if record.is_expired(now) => {
                records.remove(resource_id);
                None
            }
            other => other.cloned(),
        }
    }

    async fn extend(
        &self,
        resource_id: &str,
        owner: &str,
        fencing_token: u64,
        additional_sec: i64,
    ) -> Result<(), LockAcquisitionError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(resource_id) {
            Some(record) if record.owner == owner && record.fencing_token == fencing_token => {
                record.expiry_time = Utc::now() + chrono::Duration::seconds(additional_sec);
                Ok(())
            }
            _ => Err(LockAcquisitionError::OwnerMismatch {
                resource_id: resource_id.to_string(),
            }),
        }
    }
}

/// Runs `extend` every `renewal_interval_sec` until `stop` fires or an
/// extension fails. The stop signal is checked both right after waking
/// and right before extending (§9 open question: must not extend once
/// more after shutdown was requested).
pub async fn auto_renew(
    lock: &(dyn DistributedLock),
    resource_id: &str,
    owner: &str,
    fencing_token: u64,
    renewal_interval_sec: u64,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(renewal_interval_sec)) => {}
        }
        if stop.is_cancelled() {
            return;
        }
        let additional_sec = (renewal_interval_sec * 2) as i64;
        if let Err(err) = lock.extend(resource_id, owner, fencing_token, additional_sec).await {
            tracing::warn!(resource_id, owner, error = %err, "lock auto-renewal failed, holder has lost the lock");
            return;
        }
    }
}

/// Acquires the lock, runs `body`, and unconditionally releases + stops
/// the auto-renew task on the way out — including on cancellation — so
/// the renewer never outlives this scope (§9 redesign flag). Takes an
/// `Arc` so the spawned renewal task can hold its own reference rather
/// than borrowing across an await point.
pub async fn with_lock<F, Fut, T>(
    lock: std::sync::Arc<dyn DistributedLock>,
    resource_id: &str,
    timeout_sec: i64,
    wait_timeout_sec: u64,
    renewal_interval_sec: u64,
    body: F,
) -> Result<T, LockAcquisitionError>
where
    F: FnOnce(String, u64) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let (owner, fencing_token) = lock
        .acquire(resource_id, None, timeout_sec, true, wait_timeout_sec)
        .await?;

    let stop = CancellationToken::new();
    let renew_handle = tokio::spawn({
        let stop = stop.clone();
        let resource_id = resource_id.to_string();
        let owner = owner.clone();
        let lock = lock.clone();
        async move {
            auto_renew(lock.as_ref(), &resource_id, &owner, fencing_token, renewal_interval_sec, stop).await;
        }
    });

    let result = body(owner.clone(), fencing_token).await;

    stop.cancel();
    let _ = renew_handle.await;
    let _ = lock.release(resource_id, &owner).await;

    Ok(result)
}
