use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sideinput_api::{SideInputError, SideInputKey, SideInputRecord, SideInputStore, now_ms};

use crate::atomic::{TMP_PREFIX, write_atomic};
use crate::config::{FileStoreConfig, default_read_retries};
use crate::watch::VersionWatch;

const LATEST_FILE: &str = "LATEST";
const NOTIFY_FILE: &str = "NOTIFY";
const RECORD_EXT: &str = ".json";

/// Минимум версий на диске: текущая + предыдущая, чтобы читатель,
/// успевший прочитать старый LATEST, ещё нашёл свой файл.
const MIN_RETAIN_VERSIONS: usize = 2;

// ════════════════════════════════════════════════════════════════
//  Change notification
// ════════════════════════════════════════════════════════════════

/// Содержимое `<root>/NOTIFY`. Перезаписывается после каждой публикации.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub seq: u64,
    pub key: SideInputKey,
    pub version: u64,
    pub ts_ms: i64,
}

// ════════════════════════════════════════════════════════════════
//  FileStore
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    ReadWrite,
    ReadOnly,
}

/// Store на общем каталоге.
///
/// ```text
/// <root>/NOTIFY                      {"seq":..,"key":..,"version":..,"ts_ms":..}
/// <root>/<key>/LATEST                "<version>\n"
/// <root>/<key>/<version:020>.json    SideInputRecord
/// <root>/<key>/.tmp-*                незавершённые записи
/// ```
///
/// Все файлы публикуются через temp + rename, поэтому читатель видит
/// либо старое, либо новое содержимое. Порядок публикации: файл версии,
/// затем LATEST, затем NOTIFY. LATEST никогда не указывает на
/// недописанный файл.
pub struct FileStore {
    root: PathBuf,
    mode: Mode,
    retain_versions: usize,
    fsync: bool,
    read_retries: usize,
    /// Сериализует запись внутри процесса; значение — последний seq в NOTIFY.
    writer: Mutex<u64>,
}

impl FileStore {
    /// Открыть store для записи. Создаёт корень и прибирает следы
    /// прерванных публикаций.
    pub fn open(config: &FileStoreConfig) -> Result<Self, SideInputError> {
        if config.retain_versions < MIN_RETAIN_VERSIONS {
            return Err(SideInputError::config(format!(
                "retain_versions must be >= {MIN_RETAIN_VERSIONS}, got {}",
                config.retain_versions
            )));
        }
        std::fs::create_dir_all(&config.root).map_err(|e| {
            SideInputError::storage_write(format!("create root {}: {e}", config.root.display()))
        })?;

        let mut store = Self {
            root: config.root.clone(),
            mode: Mode::ReadWrite,
            retain_versions: config.retain_versions,
            fsync: config.fsync,
            read_retries: config.read_retries,
            writer: Mutex::new(0),
        };
        store.recover()?;
        let seq = store.change_seq()?;
        *store.writer.get_mut().unwrap_or_else(|e| e.into_inner()) = seq;

        tracing::info!(root = %store.root.display(), seq, "file store opened");
        Ok(store)
    }

    /// Открыть store только для чтения (consumer). Корень может ещё
    /// не существовать: до первой публикации все ключи отсутствуют.
    pub fn open_read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: Mode::ReadOnly,
            retain_versions: MIN_RETAIN_VERSIONS,
            fsync: false,
            read_retries: default_read_retries(),
            writer: Mutex::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Поток изменений версии `key`, начиная с текущего состояния.
    pub fn watch(self: &Arc<Self>, key: SideInputKey, poll_interval: Duration) -> VersionWatch {
        VersionWatch::new(self.clone(), key, poll_interval)
    }

    /// Последнее уведомление об изменении, если оно было.
    pub fn last_notification(&self) -> Result<Option<Notification>, SideInputError> {
        let path = self.root.join(NOTIFY_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SideInputError::storage_read(format!("read {}: {e}", path.display())));
            }
        };
        let n: Notification = serde_json::from_slice(&bytes)
            .map_err(|e| SideInputError::deserialization(format!("{}: {e}", path.display())))?;
        Ok(Some(n))
    }

    // ── paths ───────────────────────────────────────────────────

    fn key_dir(&self, key: &SideInputKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn record_path(&self, key: &SideInputKey, version: u64) -> PathBuf {
        self.key_dir(key).join(record_file_name(version))
    }

    // ── marker ──────────────────────────────────────────────────

    fn read_marker(&self, key: &SideInputKey) -> Result<Option<u64>, SideInputError> {
        read_marker_at(&self.key_dir(key).join(LATEST_FILE))
    }

    // ── recovery ────────────────────────────────────────────────

    /// Удалить temp-файлы и версии, на которые LATEST так и не переключился.
    fn recover(&self) -> Result<(), SideInputError> {
        remove_tmp_files(&self.root)?;

        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| SideInputError::storage_read(format!("list {}: {e}", self.root.display())))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(key) = SideInputKey::new(name.clone()) else {
                tracing::debug!(dir = %name, "skipping foreign directory");
                continue;
            };
            let dir = entry.path();
            remove_tmp_files(&dir)?;

            let latest = self.read_marker(&key)?;
            for version in list_versions(&dir)? {
                if latest.is_none_or(|l| version > l) {
                    let path = dir.join(record_file_name(version));
                    tracing::warn!(key = %key, version, "removing uncommitted version");
                    std::fs::remove_file(&path).map_err(|e| {
                        SideInputError::storage_write(format!("remove {}: {e}", path.display()))
                    })?;
                }
            }
        }
        Ok(())
    }

    // ── retention ───────────────────────────────────────────────

    fn prune(&self, key: &SideInputKey, latest: u64) {
        let dir = self.key_dir(key);
        let mut versions = match list_versions(&dir) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "prune: list failed");
                return;
            }
        };
        versions.retain(|v| *v <= latest);
        versions.sort_unstable_by(|a, b| b.cmp(a));
        for version in versions.into_iter().skip(self.retain_versions) {
            if let Err(e) = std::fs::remove_file(dir.join(record_file_name(version))) {
                tracing::warn!(key = %key, version, error = %e, "prune: remove failed");
            }
        }
    }

    /// Consumers сверяются с LATEST, NOTIFY для них только подсказка.
    fn notify_best_effort(&self, seq: u64, record: &SideInputRecord) {
        if let Err(e) = self.notify(seq, record) {
            tracing::warn!(key = %record.key, version = record.version, seq, error = %e, "change notification not written");
        }
    }

    fn notify(&self, seq: u64, record: &SideInputRecord) -> Result<(), SideInputError> {
        let n = Notification {
            seq,
            key: record.key.clone(),
            version: record.version,
            ts_ms: now_ms(),
        };
        let bytes = serde_json::to_vec(&n)
            .map_err(|e| SideInputError::storage_write(format!("encode notification: {e}")))?;
        write_atomic(&self.root.join(NOTIFY_FILE), &bytes, self.fsync)
            .map_err(|e| SideInputError::storage_write(format!("write NOTIFY: {e}")))
    }
}

impl SideInputStore for FileStore {
    fn write(&self, record: &SideInputRecord) -> Result<(), SideInputError> {
        if self.mode == Mode::ReadOnly {
            return Err(SideInputError::config(format!(
                "store {} is opened read-only",
                self.root.display()
            )));
        }

        let mut seq = self.writer.lock().unwrap_or_else(|e| {
            tracing::warn!("file store writer lock was poisoned, recovering");
            e.into_inner()
        });
        let key = &record.key;

        match self.read_marker(key)? {
            Some(current) if record.version < current => {
                return Err(SideInputError::conflict(format!(
                    "key {key}: version {} is older than committed {current}",
                    record.version
                )));
            }
            Some(current) if record.version == current => {
                // Повтор после сбоя на шаге NOTIFY: тот же version с теми же
                // байтами уже закоммичен, досылаем только уведомление.
                let committed = self.read_latest(key)?;
                if committed.as_ref().is_some_and(|c| c.value == record.value) {
                    *seq += 1;
                    self.notify_best_effort(*seq, record);
                    return Ok(());
                }
                return Err(SideInputError::conflict(format!(
                    "key {key}: version {current} already committed with different value"
                )));
            }
            _ => {}
        }

        let dir = self.key_dir(key);
        std::fs::create_dir_all(&dir)
            .map_err(|e| SideInputError::storage_write(format!("create {}: {e}", dir.display())))?;

        let bytes = record.encode()?;
        let path = self.record_path(key, record.version);
        write_atomic(&path, &bytes, self.fsync)
            .map_err(|e| SideInputError::storage_write(format!("write {}: {e}", path.display())))?;

        let marker = format!("{}\n", record.version);
        if let Err(e) = write_atomic(&dir.join(LATEST_FILE), marker.as_bytes(), self.fsync) {
            // Версия не стала видимой: убираем её файл, чтобы не осталось сироты.
            let _ = std::fs::remove_file(&path);
            return Err(SideInputError::storage_write(format!("key {key}: write LATEST: {e}")));
        }

        // LATEST уже переключён: версия видна читателям, публикация состоялась.
        *seq += 1;
        self.notify_best_effort(*seq, record);
        self.prune(key, record.version);

        tracing::debug!(key = %key, version = record.version, seq = *seq, bytes = bytes.len(), "record committed");
        Ok(())
    }

    fn read_latest(&self, key: &SideInputKey) -> Result<Option<SideInputRecord>, SideInputError> {
        for attempt in 0..=self.read_retries {
            let Some(version) = self.read_marker(key)? else {
                return Ok(None);
            };
            let path = self.record_path(key, version);
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // LATEST ушёл вперёд и старый файл уже удалён retention'ом.
                    tracing::debug!(key = %key, version, attempt, "record pruned under reader, retrying");
                    continue;
                }
                Err(e) => {
                    return Err(SideInputError::storage_read(format!("read {}: {e}", path.display())));
                }
            };
            let record = SideInputRecord::decode(&bytes).map_err(|e| e.with_context(path.display()))?;
            if record.version != version || record.key != *key {
                return Err(SideInputError::deserialization(format!(
                    "{}: envelope says {}@{}, expected {key}@{version}",
                    path.display(),
                    record.key,
                    record.version
                )));
            }
            return Ok(Some(record));
        }
        Err(SideInputError::storage_read(format!(
            "key {key}: latest record kept disappearing after {} retries",
            self.read_retries
        )))
    }

    fn current_version(&self, key: &SideInputKey) -> Result<Option<u64>, SideInputError> {
        self.read_marker(key)
    }

    fn change_seq(&self) -> Result<u64, SideInputError> {
        Ok(self.last_notification()?.map_or(0, |n| n.seq))
    }

    fn keys(&self) -> Result<Vec<SideInputKey>, SideInputError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SideInputError::storage_read(format!("list {}: {e}", self.root.display())));
            }
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(key) = SideInputKey::new(entry.file_name().to_string_lossy().into_owned()) else {
                continue;
            };
            if entry.path().join(LATEST_FILE).is_file() {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ════════════════════════════════════════════════════════════════
//  Helpers
// ════════════════════════════════════════════════════════════════

fn record_file_name(version: u64) -> String {
    format!("{version:020}{RECORD_EXT}")
}

fn read_marker_at(path: &Path) -> Result<Option<u64>, SideInputError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SideInputError::storage_read(format!("read {}: {e}", path.display())));
        }
    };
    text.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|e| SideInputError::deserialization(format!("{}: bad version marker: {e}", path.display())))
}

/// Версии, для которых в каталоге ключа есть файл.
fn list_versions(dir: &Path) -> Result<Vec<u64>, SideInputError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SideInputError::storage_read(format!("list {}: {e}", dir.display()))),
    };
    let mut versions = Vec::new();
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some(v) = name.strip_suffix(RECORD_EXT).and_then(|s| s.parse::<u64>().ok()) {
            versions.push(v);
        }
    }
    Ok(versions)
}

fn remove_tmp_files(dir: &Path) -> Result<(), SideInputError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| SideInputError::storage_read(format!("list {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
            tracing::warn!(path = %entry.path().display(), "removing leftover temp file");
            std::fs::remove_file(entry.path()).map_err(|e| {
                SideInputError::storage_write(format!("remove {}: {e}", entry.path().display()))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sideinput_api::ErrorKind;

    fn key(name: &str) -> SideInputKey {
        SideInputKey::new(name).unwrap()
    }

    fn record(name: &str, version: u64, value: &str) -> SideInputRecord {
        SideInputRecord {
            key: key(name),
            value: value.as_bytes().to_vec(),
            version,
            updated_at_ms: 1_700_000_000_000 + version as i64,
        }
    }

    fn open(dir: &Path) -> FileStore {
        FileStore::open(&FileStoreConfig::new(dir).fsync(false)).unwrap()
    }

    #[test]
    fn empty_store_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        assert_eq!(store.read_latest(&key("rates")).unwrap(), None);
        assert_eq!(store.current_version(&key("rates")).unwrap(), None);
        assert_eq!(store.change_seq().unwrap(), 0);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn write_then_read_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.write(&record("rates", 1, "a")).unwrap();
        store.write(&record("rates", 2, "b")).unwrap();

        let got = store.read_latest(&key("rates")).unwrap().unwrap();
        assert_eq!(got, record("rates", 2, "b"));
        assert_eq!(store.current_version(&key("rates")).unwrap(), Some(2));
        assert_eq!(store.change_seq().unwrap(), 2);
        assert_eq!(store.keys().unwrap(), vec![key("rates")]);
    }

    #[test]
    fn stale_version_is_conflict_and_keeps_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.write(&record("rates", 5, "five")).unwrap();

        let err = store.write(&record("rates", 4, "four")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = store.write(&record("rates", 5, "other")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_eq!(store.read_latest(&key("rates")).unwrap().unwrap().value, b"five");
    }

    #[test]
    fn identical_rewrite_is_accepted_and_renotifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.write(&record("rates", 1, "a")).unwrap();
        store.write(&record("rates", 1, "a")).unwrap();
        assert_eq!(store.change_seq().unwrap(), 2);
        assert_eq!(store.current_version(&key("rates")).unwrap(), Some(1));
    }

    #[test]
    fn retention_keeps_newest_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(&FileStoreConfig::new(dir.path()).fsync(false).retain_versions(2)).unwrap();
        for v in 1..=5 {
            store.write(&record("rates", v, &format!("v{v}"))).unwrap();
        }
        let mut versions = list_versions(&dir.path().join("rates")).unwrap();
        versions.sort_unstable();
        assert_eq!(versions, vec![4, 5]);
    }

    #[test]
    fn retain_below_two_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileStore::open(&FileStoreConfig::new(dir.path()).retain_versions(1))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn keys_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.write(&record("rates", 3, "r")).unwrap();
        store.write(&record("limits", 1, "l")).unwrap();

        assert_eq!(store.current_version(&key("rates")).unwrap(), Some(3));
        assert_eq!(store.current_version(&key("limits")).unwrap(), Some(1));
        assert_eq!(store.keys().unwrap(), vec![key("limits"), key("rates")]);
        let n = store.last_notification().unwrap().unwrap();
        assert_eq!((n.seq, n.key, n.version), (2, key("limits"), 1));
    }

    #[test]
    fn read_only_store_sees_writes_and_refuses_to_write() {
        let dir = tempfile::tempdir().unwrap();
        let writer = open(dir.path());
        let reader = FileStore::open_read_only(dir.path());
        assert_eq!(reader.read_latest(&key("rates")).unwrap(), None);

        writer.write(&record("rates", 1, "a")).unwrap();
        assert_eq!(reader.read_latest(&key("rates")).unwrap().unwrap().value, b"a");

        let err = reader.write(&record("rates", 2, "b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn read_only_store_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileStore::open_read_only(dir.path().join("not-yet"));
        assert_eq!(reader.current_version(&key("rates")).unwrap(), None);
        assert_eq!(reader.change_seq().unwrap(), 0);
        assert!(reader.keys().unwrap().is_empty());
    }

    #[test]
    fn corrupt_marker_is_deserialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        std::fs::create_dir_all(dir.path().join("rates")).unwrap();
        std::fs::write(dir.path().join("rates").join(LATEST_FILE), "garbage").unwrap();
        let err = store.read_latest(&key("rates")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
    }

    #[test]
    fn marker_pointing_at_missing_file_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(&FileStoreConfig::new(dir.path()).fsync(false).read_retries(2)).unwrap();
        std::fs::create_dir_all(dir.path().join("rates")).unwrap();
        std::fs::write(dir.path().join("rates").join(LATEST_FILE), "7\n").unwrap();
        let err = store.read_latest(&key("rates")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageRead);
    }

    #[test]
    fn failed_notification_does_not_fail_committed_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.write(&record("rates", 1, "a")).unwrap();
        // A directory in place of NOTIFY makes its rename fail.
        std::fs::remove_file(dir.path().join(NOTIFY_FILE)).unwrap();
        std::fs::create_dir(dir.path().join(NOTIFY_FILE)).unwrap();

        store.write(&record("rates", 2, "b")).unwrap();
        assert_eq!(store.current_version(&key("rates")).unwrap(), Some(2));
        assert_eq!(store.read_latest(&key("rates")).unwrap().unwrap().value, b"b");
        assert!(dir.path().join(NOTIFY_FILE).is_dir());
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(TMP_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn seq_continues_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(dir.path());
            store.write(&record("rates", 1, "a")).unwrap();
            store.write(&record("rates", 2, "b")).unwrap();
        }
        let store = open(dir.path());
        store.write(&record("rates", 3, "c")).unwrap();
        assert_eq!(store.change_seq().unwrap(), 3);
    }
}
