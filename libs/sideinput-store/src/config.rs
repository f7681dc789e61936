use std::path::PathBuf;

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_retain_versions() -> usize {
    3
}

fn default_fsync() -> bool {
    true
}

pub(crate) fn default_read_retries() -> usize {
    3
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStoreConfig {
    /// Каталог общего mount'а (одинаковый путь во всех контейнерах vertex'а).
    pub root: PathBuf,
    /// Сколько последних версий хранить на диске на ключ (минимум 2).
    #[serde(default = "default_retain_versions")]
    pub retain_versions: usize,
    /// fsync файлов и каталога после каждой публикации.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
    /// Сколько раз перечитать LATEST, если файл версии удалён между чтениями.
    #[serde(default = "default_read_retries")]
    pub read_retries: usize,
}

impl FileStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retain_versions: default_retain_versions(),
            fsync: default_fsync(),
            read_retries: default_read_retries(),
        }
    }

    pub fn retain_versions(mut self, n: usize) -> Self {
        self.retain_versions = n;
        self
    }

    pub fn fsync(mut self, enabled: bool) -> Self {
        self.fsync = enabled;
        self
    }

    pub fn read_retries(mut self, n: usize) -> Self {
        self.read_retries = n;
        self
    }
}
