use std::sync::Arc;
use std::time::Duration;

use plugin_host::PluginGenerator;
use sideinput_api::{SideInputGenerator, SideInputKey, SideInputStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{GeneratorConfig, GeneratorSource, SideInputConfig};
use crate::error::EngineError;
use crate::generators::{CommandGenerator, FileGenerator};
use crate::harness::spawn_generator_task;
use crate::retry::RetryPolicy;
use crate::schedule::{Schedule, Trigger};
use crate::synchronizer::Synchronizer;

/// Создать генератор по описанию из конфига.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn SideInputGenerator>, EngineError> {
    let generator: Arc<dyn SideInputGenerator> = match &config.source {
        GeneratorSource::Command {
            program,
            args,
            timeout_ms,
        } => Arc::new(CommandGenerator::new(
            program.clone(),
            args.clone(),
            Duration::from_millis(*timeout_ms),
        )),
        GeneratorSource::File { path } => Arc::new(FileGenerator::new(path.clone())),
        GeneratorSource::Plugin { plugin, config } => {
            let json = match config {
                Some(value) => serde_json::to_string(value)
                    .map_err(|e| EngineError::Config(format!("plugin config: {e}")))?,
                None => String::new(),
            };
            Arc::new(PluginGenerator::load(plugin, &json)?)
        }
    };
    Ok(generator)
}

/// Per-generator join handle.
struct GeneratorSlot {
    key: SideInputKey,
    handle: JoinHandle<()>,
}

/// Запущенный synchronizer: одна задача на генератор, общий `Synchronizer`.
pub struct SynchronizerService {
    sync: Arc<Synchronizer>,
    slots: Vec<GeneratorSlot>,
    triggers: Vec<(SideInputKey, Trigger)>,
    token: CancellationToken,
}

impl SynchronizerService {
    /// Build every generator first, then spawn their tick loops.
    ///
    /// A broken generator config fails the whole bootstrap before anything runs.
    pub fn bootstrap(
        config: &SideInputConfig,
        store: Arc<dyn SideInputStore>,
        token: CancellationToken,
    ) -> Result<Self, EngineError> {
        let mut built = Vec::with_capacity(config.generators.len());
        for generator_cfg in &config.generators {
            let ctx = format!("generator '{}'", generator_cfg.key);
            let generator = build_generator(generator_cfg).map_err(|e| e.with_context(&ctx))?;
            built.push((generator_cfg, generator));
        }

        let sync = Arc::new(Synchronizer::new(store, RetryPolicy::from_config(&config.retry)));
        let mut slots = Vec::new();
        let mut triggers = Vec::new();
        for (generator_cfg, generator) in built {
            let (schedule, trigger) = Schedule::from_config(&generator_cfg.schedule);
            if let Some(trigger) = trigger {
                triggers.push((generator_cfg.key.clone(), trigger));
            }
            let handle = spawn_generator_task(
                generator_cfg.key.clone(),
                generator,
                schedule,
                sync.clone(),
                token.child_token(),
            );
            tracing::info!(key = %generator_cfg.key, schedule = ?generator_cfg.schedule, "spawned generator");
            slots.push(GeneratorSlot {
                key: generator_cfg.key.clone(),
                handle,
            });
        }

        Ok(Self {
            sync,
            slots,
            triggers,
            token,
        })
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    pub fn keys(&self) -> impl Iterator<Item = &SideInputKey> {
        self.slots.iter().map(|s| &s.key)
    }

    /// Fire every trigger-scheduled generator. Returns how many were fired.
    pub fn trigger_all(&self) -> usize {
        for (key, trigger) in &self.triggers {
            tracing::info!(key = %key, "trigger fired");
            trigger.fire();
        }
        self.triggers.len()
    }

    /// Fire the trigger of one generator; `false` if it has none.
    pub fn trigger(&self, key: &SideInputKey) -> bool {
        match self.triggers.iter().find(|(k, _)| k == key) {
            Some((_, trigger)) => {
                trigger.fire();
                true
            }
            None => false,
        }
    }

    /// Cancel all generators, wait up to `grace` for in-flight ticks, abort the rest.
    pub async fn shutdown(self, grace: Duration) {
        self.token.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        for slot in self.slots {
            let mut handle = slot.handle;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(key = %slot.key, error = %e, "generator task failed"),
                Err(_) => {
                    tracing::warn!(key = %slot.key, "generator did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
        tracing::info!("synchronizer stopped");
    }
}
