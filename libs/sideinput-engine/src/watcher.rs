use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sideinput_api::{SideInputError, SideInputKey, SideInputStore, UpdateHandler};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

const TRANSITIONS_CAPACITY: usize = 256;

// ════════════════════════════════════════════════════════════════
//  Consumer state machine
// ════════════════════════════════════════════════════════════════

/// `Waiting → Loading → Applied → Waiting`; при ошибке `Loading → Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Waiting,
    Loading,
    Applied,
}

/// Переход состояния по ключу.
///
/// `version`: для `Loading` — загружаемая версия, для `Applied` —
/// применённая, для `Waiting` — курсор после перехода.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub key: SideInputKey,
    pub state: ConsumerState,
    pub version: Option<u64>,
}

// ════════════════════════════════════════════════════════════════
//  SideInputWatcher
// ════════════════════════════════════════════════════════════════

/// Reload loop одного consumer'а по набору ключей.
///
/// Каждый цикл сверяет курсор с маркером версии ключа (`current_version`),
/// тело записи читается только когда маркер ушёл вперёд. Уведомление об
/// изменении store не используется: оно может отстать от маркера после
/// падения писателя.
///
/// Курсоры живут только в памяти и начинаются с `None`: после рестарта
/// consumer заново применяет текущие значения. Применяется только
/// значение самой новой версии, промежуточные могут быть пропущены,
/// но порядок версий никогда не нарушается.
pub struct SideInputWatcher {
    store: Arc<dyn SideInputStore>,
    handler: Arc<dyn UpdateHandler>,
    keys: Vec<SideInputKey>,
    cursors: HashMap<SideInputKey, u64>,
    poll_interval: Duration,
    transitions: broadcast::Sender<Transition>,
}

impl SideInputWatcher {
    pub fn new(
        store: Arc<dyn SideInputStore>,
        handler: Arc<dyn UpdateHandler>,
        keys: Vec<SideInputKey>,
        poll_interval: Duration,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITIONS_CAPACITY);
        Self {
            store,
            handler,
            keys,
            cursors: HashMap::new(),
            poll_interval,
            transitions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    pub fn keys(&self) -> &[SideInputKey] {
        &self.keys
    }

    /// Last applied version of `key`.
    pub fn cursor(&self, key: &SideInputKey) -> Option<u64> {
        self.cursors.get(key).copied()
    }

    fn emit(&self, key: &SideInputKey, state: ConsumerState, version: Option<u64>) {
        tracing::trace!(key = %key, ?state, ?version, "consumer transition");
        let _ = self.transitions.send(Transition {
            key: key.clone(),
            state,
            version,
        });
    }

    /// One poll cycle over all keys. Returns how many values were applied.
    ///
    /// Errors are logged and leave the affected cursor unchanged; they are
    /// retried on the next cycle.
    pub async fn poll_once(&mut self) -> usize {
        let mut applied = 0;
        for i in 0..self.keys.len() {
            let key = self.keys[i].clone();
            match self.sync_key(&key).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(key = %key, kind = %e.kind(), error = %e, cursor = ?self.cursor(&key), "reload failed, keeping current value");
                }
            }
        }
        applied
    }

    async fn sync_key(&mut self, key: &SideInputKey) -> Result<bool, SideInputError> {
        let cursor = self.cursor(key);
        let Some(version) = self.store.current_version(key)? else {
            return Ok(false);
        };
        if cursor.is_some_and(|c| version <= c) {
            return Ok(false);
        }

        self.emit(key, ConsumerState::Loading, Some(version));
        let record = match self.store.read_latest(key) {
            Ok(Some(r)) if cursor.is_none_or(|c| r.version > c) => r,
            Ok(_) => {
                self.emit(key, ConsumerState::Waiting, cursor);
                return Ok(false);
            }
            Err(e) => {
                self.emit(key, ConsumerState::Waiting, cursor);
                return Err(e);
            }
        };

        if let Err(e) = self.handler.on_side_input_update(key, &record.value).await {
            self.emit(key, ConsumerState::Waiting, cursor);
            return Err(e.with_context(format!("apply version {}", record.version)));
        }

        self.cursors.insert(key.clone(), record.version);
        self.emit(key, ConsumerState::Applied, Some(record.version));
        self.emit(key, ConsumerState::Waiting, Some(record.version));
        tracing::info!(key = %key, version = record.version, previous = ?cursor, bytes = record.value.len(), "side input applied");
        Ok(true)
    }

    /// Poll until cancelled. The first poll happens immediately.
    pub async fn run(mut self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(keys = ?self.keys, poll_ms = self.poll_interval.as_millis() as u64, "watcher started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
        tracing::info!("watcher stopped");
    }
}

/// Run `watcher` on its own task.
pub fn spawn_watcher(watcher: SideInputWatcher, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(watcher.run(token))
}

// ════════════════════════════════════════════════════════════════
//  Initial readiness
// ════════════════════════════════════════════════════════════════

/// Wait until every key in `keys` has a committed record.
///
/// Errors reading the store count as "not ready yet". Fails with
/// `EngineError::Timeout` naming the missing keys.
pub async fn wait_for_side_inputs(
    store: &dyn SideInputStore,
    keys: &[SideInputKey],
    poll_interval: Duration,
    timeout: Duration,
) -> Result<(), EngineError> {
    let deadline = Instant::now() + timeout;
    loop {
        let missing: Vec<&SideInputKey> = keys
            .iter()
            .filter(|key| match store.current_version(key) {
                Ok(v) => v.is_none(),
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "readiness check failed");
                    true
                }
            })
            .collect();
        if missing.is_empty() {
            tracing::info!(count = keys.len(), "all side inputs available");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
            return Err(EngineError::Timeout(format!(
                "side inputs not available after {} ms: {}",
                timeout.as_millis(),
                names.join(", ")
            )));
        }
        tracing::debug!(missing = missing.len(), "waiting for side inputs");
        tokio::time::sleep_until((now + poll_interval).min(deadline)).await;
    }
}
