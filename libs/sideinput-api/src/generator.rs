use std::future::Future;
use std::pin::Pin;

use crate::SideInputError;

/// Пользовательская логика генерации side input'а.
///
/// Harness вызывает `produce()` по расписанию. Каждый результат — новый
/// кандидат, даже если байты совпадают с предыдущим. Генератор ничего не
/// знает о consumers и storage.
///
/// Реализации: built-in (`command`, `file`), FFI-плагины (`si_create_generator`).
pub trait SideInputGenerator: Send + Sync {
    /// Produce the next value. An error means "no value this tick".
    fn produce(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, SideInputError>> + Send + '_>>;
}
