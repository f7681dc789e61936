use std::sync::Arc;

use sideinput_engine::SynchronizerService;
use sideinput_engine::info::ServerInfo;
use sideinput_store::FileStore;
use tokio_util::sync::CancellationToken;

use crate::config::SynchronizeArgs;
use crate::error::CliError;

use super::{SHUTDOWN_GRACE, shutdown_signal};

const CONTAINER: &str = "side-inputs-synchronizer";

pub async fn run(args: SynchronizeArgs) -> Result<(), CliError> {
    let config = args.config.load()?;
    if config.generators.is_empty() {
        return Err(CliError::NothingConfigured("generators"));
    }

    let store = Arc::new(FileStore::open(&config.store)?);
    if let Some(path) = &config.info_file {
        ServerInfo::for_container(CONTAINER).write(path)?;
    }

    let token = CancellationToken::new();
    let service = SynchronizerService::bootstrap(&config, store, token.clone())?;
    tracing::info!(
        root = %config.store.root.display(),
        generators = config.generators.len(),
        "synchronizer ready"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut usr1 = signal(SignalKind::user_defined1())?;
        loop {
            tokio::select! {
                r = &mut shutdown => {
                    r?;
                    break;
                }
                _ = usr1.recv() => {
                    let fired = service.trigger_all();
                    if fired == 0 {
                        tracing::warn!("SIGUSR1 received but no generator has trigger = true");
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    shutdown.await?;

    service.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}
