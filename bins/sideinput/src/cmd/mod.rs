pub mod get;
pub mod init;
pub mod synchronize;
pub mod watch;

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::CliError;

/// Сколько ждать задачи после cancel, прежде чем abort.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Дождаться SIGINT (Ctrl+C) или SIGTERM.
pub async fn shutdown_signal() -> Result<(), CliError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down...");
    Ok(())
}

/// Drain: подождать задачу до `SHUTDOWN_GRACE`, затем abort.
pub async fn drain(name: &str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "task failed"),
        Err(_) => {
            tracing::warn!(task = name, "task did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }
    }
}
