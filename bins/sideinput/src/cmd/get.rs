use std::sync::Arc;
use std::time::Duration;

use sideinput_api::{SideInputRecord, SideInputStore};
use sideinput_store::FileStore;

use crate::config::GetArgs;
use crate::error::CliError;

use super::shutdown_signal;

/// Одна строка JSON на запись; value — как текст (lossy UTF-8).
fn render(record: &SideInputRecord) -> String {
    serde_json::json!({
        "key": record.key.as_str(),
        "version": record.version,
        "updated_at_ms": record.updated_at_ms,
        "value": record.value_lossy(),
    })
    .to_string()
}

pub async fn run(args: GetArgs) -> Result<(), CliError> {
    let store = Arc::new(FileStore::open_read_only(&args.root));

    let Some(key) = args.key else {
        for key in store.keys()? {
            if let Some(record) = store.read_latest(&key)? {
                println!("{}", render(&record));
            }
        }
        return Ok(());
    };

    if !args.follow {
        let record = store
            .read_latest(&key)?
            .ok_or_else(|| CliError::NotFound(key.to_string()))?;
        println!("{}", render(&record));
        return Ok(());
    }

    let mut watch = store.watch(key, Duration::from_millis(args.poll_interval_ms));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            r = &mut shutdown => return r,
            change = watch.next_change() => match change {
                Ok(change) => match store.read_latest(&change.key) {
                    // A newer version may already be committed; print what is latest now.
                    Ok(Some(record)) => println!("{}", render(&record)),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(key = %change.key, error = %e, "read failed"),
                },
                Err(e) => tracing::warn!(key = %watch.key(), error = %e, "watch failed, retrying"),
            },
        }
    }
}
