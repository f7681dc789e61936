use crate::{SideInputError, SideInputKey, SideInputRecord};

// ════════════════════════════════════════════════════════════════
//  Shared Store
// ════════════════════════════════════════════════════════════════

/// Версионированное key-value хранилище, общее для всех контейнеров pod'а.
///
/// Единственный писатель — synchronizer; consumers только читают.
/// Реализации: `FileStore` (общий mount), `MemoryStore` (in-process).
///
/// Методы синхронные: операции короткие (один rename / один маленький файл),
/// вызывающая сторона решает, на каком потоке их выполнять.
pub trait SideInputStore: Send + Sync {
    /// Atomically publish `record` and advance the key's latest marker.
    ///
    /// Fails with `Conflict` if `record.version` is older than the current
    /// marker, or equal to it with a different value. Rewriting the committed
    /// version with identical bytes succeeds without a new version and only
    /// bumps `change_seq` again (a retry after a half-finished write).
    ///
    /// Once the marker has moved the write has succeeded; failing to bump
    /// `change_seq` afterwards is not an error. On any error the previously
    /// visible record stays visible.
    fn write(&self, record: &SideInputRecord) -> Result<(), SideInputError>;

    /// The most recently committed record. `None` — no record for `key` yet.
    fn read_latest(&self, key: &SideInputKey) -> Result<Option<SideInputRecord>, SideInputError>;

    /// Version from the latest marker only, without reading the record body.
    fn current_version(&self, key: &SideInputKey) -> Result<Option<u64>, SideInputError>;

    /// Global change sequence, bumped after every successful `write`.
    ///
    /// A hint for tooling: it may lag the markers after a crash or a failed
    /// notification, so consumers decide by `current_version` instead.
    fn change_seq(&self) -> Result<u64, SideInputError>;

    /// Keys that have at least one committed record.
    fn keys(&self) -> Result<Vec<SideInputKey>, SideInputError>;
}
