use std::future::Future;
use std::pin::Pin;

use libloading::{Library, Symbol};

use sideinput_api::{
    AbiVersionFn, CreatePluginFn, PluginCreateResult, SI_ABI_VERSION, SideInputError,
    SideInputGenerator,
};

const ABI_VERSION_SYMBOL: &[u8] = b"si_abi_version";
const CREATE_GENERATOR_SYMBOL: &[u8] = b"si_create_generator";

// ════════════════════════════════════════════════════════════════
//  Generic plugin loading
// ════════════════════════════════════════════════════════════════

/// Загрузить .so плагин: найти символ `create_symbol`, вызвать его,
/// десериализовать результат как `Box<dyn T>`.
///
/// Возвращает (inner, library). Порядок drop важен: inner первым.
///
/// # Safety
/// `create_symbol` должен соответствовать ожидаемому типу трейта.
unsafe fn load_plugin<T: ?Sized>(
    plugin_path: &str,
    create_symbol: &[u8],
    config_json: &str,
) -> Result<(Box<T>, Library), SideInputError> {
    let lib = unsafe { Library::new(plugin_path) }
        .map_err(|e| SideInputError::config(format!("failed to load plugin '{plugin_path}': {e}")))?;

    let version_fn: Symbol<AbiVersionFn> = unsafe { lib.get(ABI_VERSION_SYMBOL) }.map_err(|_| {
        SideInputError::config(format!(
            "plugin '{plugin_path}' does not export 'si_abi_version'. \
             Rebuild it against the current sideinput-api."
        ))
    })?;
    let plugin_version = unsafe { version_fn() };
    if plugin_version != SI_ABI_VERSION {
        return Err(SideInputError::config(format!(
            "ABI version mismatch for plugin '{plugin_path}': \
             plugin has version {plugin_version}, host expects {SI_ABI_VERSION}"
        )));
    }

    let create_fn: Symbol<CreatePluginFn> = unsafe { lib.get(create_symbol) }.map_err(|e| {
        let sym = String::from_utf8_lossy(create_symbol);
        SideInputError::config(format!("symbol '{sym}' not found in '{plugin_path}': {e}"))
    })?;

    let result: PluginCreateResult = unsafe { create_fn(config_json.as_ptr(), config_json.len()) };

    if !result.error_ptr.is_null() {
        let error = unsafe { *Box::from_raw(result.error_ptr as *mut String) };
        return Err(SideInputError::config(format!("plugin '{plugin_path}' error: {error}")));
    }
    if result.plugin_ptr.is_null() {
        return Err(SideInputError::config(format!("plugin '{plugin_path}' returned null")));
    }

    let inner: Box<T> = unsafe { *Box::from_raw(result.plugin_ptr as *mut Box<T>) };
    Ok((inner, lib))
}

// ════════════════════════════════════════════════════════════════
//  PluginGenerator
// ════════════════════════════════════════════════════════════════

/// Генератор из cdylib-плагина (`si_create_generator`).
pub struct PluginGenerator {
    inner: Option<Box<dyn SideInputGenerator>>,
    path: String,
    _lib: Library,
}

// Safety: inner — Send + Sync по контракту трейта, Library только держит handle.
unsafe impl Send for PluginGenerator {}
unsafe impl Sync for PluginGenerator {}

impl PluginGenerator {
    pub fn load(plugin_path: &str, config_json: &str) -> Result<Self, SideInputError> {
        let (inner, lib) = unsafe {
            load_plugin::<dyn SideInputGenerator>(plugin_path, CREATE_GENERATOR_SYMBOL, config_json)?
        };
        tracing::info!(path = plugin_path, "generator plugin loaded");
        Ok(Self {
            inner: Some(inner),
            path: plugin_path.to_string(),
            _lib: lib,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    fn get(&self) -> Result<&(dyn SideInputGenerator + '_), SideInputError> {
        self.inner
            .as_ref()
            .map(|b| &**b)
            .ok_or_else(|| SideInputError::new("PluginGenerator already dropped"))
    }
}

impl SideInputGenerator for PluginGenerator {
    fn produce(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, SideInputError>> + Send + '_>> {
        match self.get() {
            Ok(inner) => inner.produce(),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

impl Drop for PluginGenerator {
    fn drop(&mut self) {
        // Дропаем inner первым, пока _lib (и vtable) ещё живы.
        self.inner.take();
    }
}
