use std::sync::Arc;
use std::time::Duration;

use sideinput_api::{SideInputError, SideInputKey, SideInputStore};
use tokio::time::{Interval, MissedTickBehavior};

/// Новая версия ключа, замеченная `VersionWatch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChange {
    pub key: SideInputKey,
    pub previous: Option<u64>,
    pub version: u64,
}

/// Опрос LATEST одного ключа. Тело записи не читается.
///
/// Ошибка store возвращается из `next_change`, но watch остаётся
/// рабочим: следующий вызов продолжит опрос с той же позиции.
pub struct VersionWatch {
    store: Arc<dyn SideInputStore>,
    key: SideInputKey,
    last_seen: Option<u64>,
    interval: Interval,
}

impl VersionWatch {
    pub fn new(store: Arc<dyn SideInputStore>, key: SideInputKey, poll_interval: Duration) -> Self {
        Self::resume_from(store, key, poll_interval, None)
    }

    /// Продолжить с известной версии: изменения `<= version` не сообщаются.
    pub fn resume_from(
        store: Arc<dyn SideInputStore>,
        key: SideInputKey,
        poll_interval: Duration,
        version: Option<u64>,
    ) -> Self {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            store,
            key,
            last_seen: version,
            interval,
        }
    }

    pub fn key(&self) -> &SideInputKey {
        &self.key
    }

    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    /// Дождаться версии новее последней увиденной.
    pub async fn next_change(&mut self) -> Result<VersionChange, SideInputError> {
        loop {
            self.interval.tick().await;
            match self.store.current_version(&self.key)? {
                Some(v) if self.last_seen.is_none_or(|seen| v > seen) => {
                    let previous = self.last_seen.replace(v);
                    return Ok(VersionChange {
                        key: self.key.clone(),
                        previous,
                        version: v,
                    });
                }
                _ => continue,
            }
        }
    }
}
