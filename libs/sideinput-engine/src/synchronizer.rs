use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sideinput_api::{SideInputError, SideInputKey, SideInputRecord, SideInputStore, now_ms};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;

// ════════════════════════════════════════════════════════════════
//  Synchronizer
// ════════════════════════════════════════════════════════════════

/// Единственный писатель в store. Назначает версии и публикует значения.
///
/// Публикации одного ключа сериализуются key-scoped async mutex'ом,
/// разные ключи не ждут друг друга.
pub struct Synchronizer {
    store: Arc<dyn SideInputStore>,
    retry: RetryPolicy,
    locks: Mutex<HashMap<SideInputKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer").field("retry", &self.retry).finish()
    }
}

impl Synchronizer {
    pub fn new(store: Arc<dyn SideInputStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SideInputStore> {
        &self.store
    }

    fn key_lock(&self, key: &SideInputKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    fn next_record(&self, key: &SideInputKey, value: &[u8]) -> Result<SideInputRecord, SideInputError> {
        let version = match self.store.current_version(key)? {
            Some(v) => v
                .checked_add(1)
                .ok_or_else(|| SideInputError::new(format!("key {key}: version space exhausted")))?,
            None => 1,
        };
        Ok(SideInputRecord {
            key: key.clone(),
            value: value.to_vec(),
            version,
            updated_at_ms: now_ms(),
        })
    }

    /// Publish `value` as the next version of `key`. Single attempt.
    ///
    /// On error the previously committed record stays visible.
    pub async fn publish(&self, key: &SideInputKey, value: Vec<u8>) -> Result<SideInputRecord, SideInputError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let record = self.next_record(key, &value)?;
        self.store.write(&record)?;
        tracing::info!(key = %key, version = record.version, bytes = record.value.len(), "published");
        Ok(record)
    }

    /// Publish with the configured retry policy for transient store errors.
    ///
    /// The version is assigned once: retries re-send the same record, so an
    /// attempt that committed but failed on the notification step is
    /// completed rather than duplicated.
    pub async fn publish_with_retry(
        &self,
        key: &SideInputKey,
        value: Vec<u8>,
        token: &CancellationToken,
    ) -> Result<SideInputRecord, SideInputError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut pending: Option<SideInputRecord> = None;
        let record = self
            .retry
            .run(token, key.as_str(), || {
                let record = match pending.take() {
                    Some(r) => r,
                    None => self.next_record(key, &value)?,
                };
                match self.store.write(&record) {
                    Ok(()) => Ok(record),
                    Err(e) => {
                        pending = Some(record);
                        Err(e)
                    }
                }
            })
            .await?;

        tracing::info!(key = %key, version = record.version, bytes = record.value.len(), "published");
        Ok(record)
    }
}
