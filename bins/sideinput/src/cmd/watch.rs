use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use sideinput_api::{SideInputError, SideInputKey, UpdateHandler};
use sideinput_engine::info::ServerInfo;
use sideinput_engine::{SideInputWatcher, spawn_watcher};
use sideinput_store::{FileStore, write_atomic};
use tokio_util::sync::CancellationToken;

use crate::config::WatchArgs;
use crate::error::CliError;

use super::{drain, shutdown_signal};

const CONTAINER: &str = "side-inputs-watcher";

/// Зеркалирует применённое значение в `<out_dir>/<key>` (atomic publish).
/// Без `out_dir` только логирует.
struct MirrorHandler {
    out_dir: Option<PathBuf>,
}

fn mirror_to(dir: &Path, key: &SideInputKey, value: &[u8]) -> Result<(), SideInputError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SideInputError::storage_write(format!("create {}: {e}", dir.display())))?;
    let path = dir.join(key.as_str());
    write_atomic(&path, value, true)
        .map_err(|e| SideInputError::storage_write(format!("write {}: {e}", path.display())))
}

impl MirrorHandler {
    /// fsync и rename блокируют: выполняются вне worker'ов runtime.
    async fn mirror(&self, key: &SideInputKey, value: &[u8]) -> Result<(), SideInputError> {
        let Some(dir) = self.out_dir.clone() else {
            return Ok(());
        };
        let key = key.clone();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || mirror_to(&dir, &key, &value))
            .await
            .map_err(|e| SideInputError::storage_write(format!("mirror task failed: {e}")))?
    }
}

impl UpdateHandler for MirrorHandler {
    fn on_side_input_update<'a>(
        &'a self,
        key: &'a SideInputKey,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), SideInputError>> + Send + 'a>> {
        Box::pin(async move {
            self.mirror(key, value).await?;
            tracing::info!(key = %key, bytes = value.len(), "side input updated");
            Ok(())
        })
    }
}

pub async fn run(args: WatchArgs) -> Result<(), CliError> {
    let mut config = args.config.load()?;
    if let Some(out_dir) = args.out_dir {
        config.watch.out_dir = Some(out_dir);
    }
    if config.watch.keys.is_empty() {
        return Err(CliError::NothingConfigured("watch keys"));
    }
    if let Some(path) = &config.info_file {
        ServerInfo::for_container(CONTAINER).write(path)?;
    }

    let store = Arc::new(FileStore::open_read_only(&config.store.root));
    let handler = Arc::new(MirrorHandler {
        out_dir: config.watch.out_dir.clone(),
    });
    let watcher = SideInputWatcher::new(store, handler, config.watch.keys.clone(), config.watch.poll_interval());

    let token = CancellationToken::new();
    let handle = spawn_watcher(watcher, token.clone());
    tracing::info!(root = %config.store.root.display(), out_dir = ?config.watch.out_dir, "watcher ready");

    shutdown_signal().await?;
    token.cancel();
    drain("watcher", handle).await;
    Ok(())
}
