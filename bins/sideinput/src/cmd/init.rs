use std::time::Duration;

use sideinput_engine::wait_for_side_inputs;
use sideinput_store::FileStore;

use crate::config::InitArgs;
use crate::error::CliError;

use super::shutdown_signal;

pub async fn run(args: InitArgs) -> Result<(), CliError> {
    let config = args.config.load()?;
    if config.watch.keys.is_empty() {
        return Err(CliError::NothingConfigured("watch keys"));
    }

    let store = FileStore::open_read_only(&config.store.root);
    tracing::info!(keys = ?config.watch.keys, timeout_ms = args.timeout_ms, "waiting for side inputs");

    tokio::select! {
        r = wait_for_side_inputs(
            &store,
            &config.watch.keys,
            config.watch.poll_interval(),
            Duration::from_millis(args.timeout_ms),
        ) => r?,
        r = shutdown_signal() => {
            r?;
            return Err(CliError::Interrupted);
        }
    }
    Ok(())
}
