use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use sideinput_api::{SideInputError, SideInputKey, UpdateHandler};

/// Текущее значение side input'а для data path.
///
/// Reload-then-swap: новое значение сначала полностью десериализуется,
/// и только потом подменяет старое. Читатель держит `Arc` на снимок и
/// никогда не видит наполовину применённое значение. Если JSON не
/// разобрался, остаётся прежнее значение.
pub struct LiveValue<T> {
    key: SideInputKey,
    current: RwLock<Option<Arc<T>>>,
}

impl<T> LiveValue<T> {
    pub fn new(key: SideInputKey) -> Self {
        Self {
            key,
            current: RwLock::new(None),
        }
    }

    pub fn key(&self) -> &SideInputKey {
        &self.key
    }

    /// Snapshot of the applied value; `None` until the first update.
    pub fn get(&self) -> Option<Arc<T>> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<T> UpdateHandler for LiveValue<T>
where
    T: DeserializeOwned + Send + Sync,
{
    fn on_side_input_update<'a>(
        &'a self,
        key: &'a SideInputKey,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), SideInputError>> + Send + 'a>> {
        Box::pin(async move {
            if *key != self.key {
                return Ok(());
            }
            let parsed: T = serde_json::from_slice(value)
                .map_err(|e| SideInputError::deserialization(format!("key {key}: {e}")))?;
            *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(parsed));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sideinput_api::ErrorKind;

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Limits {
        rate: u32,
    }

    #[tokio::test]
    async fn swaps_only_after_successful_parse() {
        let key = SideInputKey::new("rate-limit").unwrap();
        let live: LiveValue<Limits> = LiveValue::new(key.clone());
        assert!(live.get().is_none());

        live.on_side_input_update(&key, br#"{"rate": 10}"#).await.unwrap();
        let before = live.get().unwrap();
        assert_eq!(*before, Limits { rate: 10 });

        let err = live.on_side_input_update(&key, b"{not json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
        assert_eq!(*live.get().unwrap(), Limits { rate: 10 });

        live.on_side_input_update(&key, br#"{"rate": 20}"#).await.unwrap();
        assert_eq!(live.get().unwrap().rate, 20);
        // Old snapshot held by a reader is unaffected.
        assert_eq!(before.rate, 10);
    }

    #[tokio::test]
    async fn other_keys_are_ignored() {
        let live: LiveValue<Limits> = LiveValue::new(SideInputKey::new("rate-limit").unwrap());
        let other = SideInputKey::new("other").unwrap();
        live.on_side_input_update(&other, b"garbage").await.unwrap();
        assert!(live.get().is_none());
    }
}
