use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sideinput_store::write_atomic;

use crate::error::EngineError;

/// Минимальная версия платформы, понимающая этот формат info-файла.
pub const MINIMUM_PLATFORM_VERSION: &str = "1.3.0-z";

/// Префикс переменных окружения, попадающих в `metadata`.
pub const METADATA_ENV_PREFIX: &str = "NUMAFLOW_";

/// Описание запущенного контейнера для платформы.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub protocol: String,
    pub language: String,
    pub version: String,
    pub minimum_platform_version: String,
    pub container: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ServerInfo {
    /// Info for this build, metadata taken from the process environment.
    pub fn for_container(container: impl Into<String>) -> Self {
        Self {
            protocol: "file".into(),
            language: "rust".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            minimum_platform_version: MINIMUM_PLATFORM_VERSION.into(),
            container: container.into(),
            metadata: metadata_from_env(std::env::vars()),
        }
    }

    /// Atomically write the info as JSON to `path`.
    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        if path.as_os_str().is_empty() {
            return Err(EngineError::Config("info file path is empty".into()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(self)
            .map_err(|e| EngineError::Config(format!("encode server info: {e}")))?;
        write_atomic(path, &bytes, true)?;
        tracing::info!(path = %path.display(), container = %self.container, "server info written");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, EngineError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }
}

/// `NUMAFLOW_CPU_LIMIT=3` → `CPU_LIMIT: "3"`.
pub fn metadata_from_env(vars: impl IntoIterator<Item = (String, String)>) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(METADATA_ENV_PREFIX)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_strips_prefix_and_ignores_others() {
        let vars = vec![
            ("NUMAFLOW_CPU_LIMIT".to_string(), "3".to_string()),
            ("NUMAFLOW_".to_string(), "x".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let metadata = metadata_from_env(vars);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["CPU_LIMIT"], "3");
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("sideinput-info");
        let mut info = ServerInfo::for_container("side-inputs-synchronizer");
        info.metadata = metadata_from_env(vec![("NUMAFLOW_CPU_LIMIT".into(), "3".into())]);
        info.write(&path).unwrap();

        let back = ServerInfo::read(&path).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.protocol, "file");
        assert_eq!(back.language, "rust");
        assert_eq!(back.minimum_platform_version, MINIMUM_PLATFORM_VERSION);
        assert_eq!(back.metadata["CPU_LIMIT"], "3");
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = ServerInfo::for_container("c").write(Path::new("")).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
