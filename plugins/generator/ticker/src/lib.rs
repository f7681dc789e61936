use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use sideinput_api::{
    PluginCreateResult, SideInputError, SideInputGenerator, now_ms, parse_plugin_config_opt,
    plugin_err, plugin_ok,
};

// ═══════════════════════════════════════════════════════════════
//  TickerConfig
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, serde::Deserialize)]
pub struct TickerConfig {
    /// Номер первого тика.
    #[serde(default)]
    pub start: u64,
    /// Произвольная метка, копируется в каждое значение.
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(serde::Serialize)]
struct Tick<'a> {
    tick: u64,
    ts_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
}

// ═══════════════════════════════════════════════════════════════
//  TickerGenerator
// ═══════════════════════════════════════════════════════════════

/// Каждый вызов возвращает `{"tick": n, "ts_ms": ..}` со следующим n.
pub struct TickerGenerator {
    next: AtomicU64,
    label: Option<String>,
}

impl TickerGenerator {
    pub fn new(config: TickerConfig) -> Self {
        Self {
            next: AtomicU64::new(config.start),
            label: config.label,
        }
    }
}

impl SideInputGenerator for TickerGenerator {
    fn produce(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, SideInputError>> + Send + '_>> {
        Box::pin(async move {
            let tick = Tick {
                tick: self.next.fetch_add(1, Ordering::Relaxed),
                ts_ms: now_ms(),
                label: self.label.as_deref(),
            };
            serde_json::to_vec(&tick).map_err(|e| SideInputError::generation(format!("encode tick: {e}")))
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Plugin FFI entry points
// ════════════════════════════════════════════════════════════════

/// # Safety
/// `config_json_ptr` must point to `config_json_len` valid UTF-8 bytes (or be null).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn si_create_generator(
    config_json_ptr: *const u8,
    config_json_len: usize,
) -> PluginCreateResult {
    let cfg: TickerConfig = match unsafe { parse_plugin_config_opt(config_json_ptr, config_json_len) } {
        Ok(c) => c,
        Err(e) => return plugin_err(e.to_string()),
    };
    plugin_ok(Box::new(TickerGenerator::new(cfg)) as Box<dyn SideInputGenerator>)
}

sideinput_api::si_destroy_fn!(si_destroy_generator, SideInputGenerator);
sideinput_api::si_abi_version_fn!();
