use std::sync::Arc;

use sideinput_api::{SideInputError, SideInputGenerator, SideInputKey, SideInputRecord};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::schedule::{Schedule, TickSource};
use crate::synchronizer::Synchronizer;

/// Spawn the tick loop of one generator.
///
/// Every tick calls `produce` and publishes the result through `sync`.
/// A failing or panicking generator only skips its tick: the previous value
/// stays in the store and the loop waits for the next tick. On cancellation
/// a tick already in progress is finished before the task exits.
pub fn spawn_generator_task(
    key: SideInputKey,
    generator: Arc<dyn SideInputGenerator>,
    schedule: Schedule,
    sync: Arc<Synchronizer>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = schedule.start();
        tracing::info!(key = %key, "generator started");
        loop {
            let source = tokio::select! {
                _ = token.cancelled() => break,
                source = ticks.next() => source,
            };
            match run_tick(&key, &generator, &sync, &token).await {
                Ok(record) => {
                    tracing::debug!(key = %key, ?source, version = record.version, "tick published");
                }
                Err(e) => log_tick_error(&key, source, &e),
            }
        }
        tracing::info!(key = %key, "generator stopped");
    })
}

/// One tick: produce, then publish with retries.
pub async fn run_tick(
    key: &SideInputKey,
    generator: &Arc<dyn SideInputGenerator>,
    sync: &Synchronizer,
    token: &CancellationToken,
) -> Result<SideInputRecord, SideInputError> {
    let value = produce_guarded(generator).await?;
    sync.publish_with_retry(key, value, token).await
}

/// Run `produce` on its own task so a panic surfaces as a `Generation` error.
///
/// The inner task is aborted together with the caller: an aborted tick
/// does not leave a generator (or its child process) running.
async fn produce_guarded(generator: &Arc<dyn SideInputGenerator>) -> Result<Vec<u8>, SideInputError> {
    let generator = generator.clone();
    let task = AbortOnDropHandle::new(tokio::spawn(async move { generator.produce().await }));
    match task.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SideInputError::generation(e.message()).with_context("produce")),
        Err(join) if join.is_panic() => Err(SideInputError::generation(format!(
            "produce panicked: {}",
            panic_message(join.into_panic())
        ))),
        Err(join) => Err(SideInputError::generation(format!("produce task aborted: {join}"))),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn log_tick_error(key: &SideInputKey, source: TickSource, e: &SideInputError) {
    match e.kind() {
        sideinput_api::ErrorKind::Generation => {
            tracing::warn!(key = %key, ?source, error = %e, "generator failed, tick skipped");
        }
        kind => {
            tracing::error!(key = %key, ?source, %kind, error = %e, "publish failed, tick skipped");
        }
    }
}
