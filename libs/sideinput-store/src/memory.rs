use std::collections::HashMap;
use std::sync::RwLock;

use sideinput_api::{SideInputError, SideInputKey, SideInputRecord, SideInputStore};

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-process store. Для synchronizer и consumers в одном процессе
/// (тесты, локальный запуск без общего mount'а). Хранит только последнюю
/// версию каждого ключа.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<SideInputKey, SideInputRecord>,
    seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl SideInputStore for MemoryStore {
    fn write(&self, record: &SideInputRecord) -> Result<(), SideInputError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| {
            tracing::warn!("memory store lock was poisoned, recovering");
            e.into_inner()
        });
        if let Some(current) = inner.records.get(&record.key) {
            let same = current.version == record.version && current.value == record.value;
            if record.version < current.version || (record.version == current.version && !same) {
                return Err(SideInputError::conflict(format!(
                    "key {}: version {} conflicts with committed {}",
                    record.key, record.version, current.version
                )));
            }
        }
        inner.records.insert(record.key.clone(), record.clone());
        inner.seq += 1;
        Ok(())
    }

    fn read_latest(&self, key: &SideInputKey) -> Result<Option<SideInputRecord>, SideInputError> {
        Ok(self.read().records.get(key).cloned())
    }

    fn current_version(&self, key: &SideInputKey) -> Result<Option<u64>, SideInputError> {
        Ok(self.read().records.get(key).map(|r| r.version))
    }

    fn change_seq(&self) -> Result<u64, SideInputError> {
        Ok(self.read().seq)
    }

    fn keys(&self) -> Result<Vec<SideInputKey>, SideInputError> {
        let mut keys: Vec<_> = self.read().records.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
