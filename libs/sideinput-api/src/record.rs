use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{SideInputError, SideInputKey};

// ════════════════════════════════════════════════════════════════
//  SideInputRecord
// ════════════════════════════════════════════════════════════════

/// Одна зафиксированная версия side input'а.
///
/// `value` — непрозрачные байты: формат определяет генератор,
/// synchronizer и store их не интерпретируют. `version` строго растёт
/// в пределах ключа.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideInputRecord {
    pub key: SideInputKey,
    pub value: Vec<u8>,
    pub version: u64,
    /// Время публикации (Unix ms).
    pub updated_at_ms: i64,
}

impl SideInputRecord {
    /// Serialize to the on-disk envelope (JSON, value as base64).
    pub fn encode(&self) -> Result<Vec<u8>, SideInputError> {
        serde_json::to_vec(self)
            .map_err(|e| SideInputError::storage_write(format!("encode record: {e}")))
    }

    /// Parse an on-disk envelope. Any malformed input is a `Deserialization` error.
    pub fn decode(bytes: &[u8]) -> Result<Self, SideInputError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SideInputError::deserialization(format!("decode record: {e}")))
    }

    /// Value as UTF-8 text, lossy. For logs and the CLI.
    pub fn value_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

impl Serialize for SideInputRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("SideInputRecord", 4)?;
        s.serialize_field("key", &self.key)?;
        s.serialize_field("version", &self.version)?;
        s.serialize_field("updated_at_ms", &self.updated_at_ms)?;
        s.serialize_field(
            "value",
            &base64::engine::general_purpose::STANDARD.encode(&self.value),
        )?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for SideInputRecord {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            key: SideInputKey,
            version: u64,
            updated_at_ms: i64,
            value: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        let value = base64::engine::general_purpose::STANDARD
            .decode(raw.value.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(SideInputRecord {
            key: raw.key,
            value,
            version: raw.version,
            updated_at_ms: raw.updated_at_ms,
        })
    }
}
