use serde::{Deserialize, Serialize};

use crate::SideInputError;

/// Максимальная длина ключа (DNS-1123 subdomain, как имена side input'ов в манифесте pipeline).
pub const MAX_KEY_LEN: usize = 253;

// ════════════════════════════════════════════════════════════════
//  SideInputKey
// ════════════════════════════════════════════════════════════════

/// Имя одного логического side input'а внутри vertex'а.
///
/// Ключ становится именем каталога в общем mount'е, поэтому допускаются
/// только `[A-Za-z0-9._-]` и ключ не может начинаться с `.`
/// (служебные файлы store начинаются с точки).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SideInputKey(String);

impl SideInputKey {
    pub fn new(name: impl Into<String>) -> Result<Self, SideInputError> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(name: &str) -> Result<(), SideInputError> {
    if name.is_empty() {
        return Err(SideInputError::config("side input key is empty"));
    }
    if name.len() > MAX_KEY_LEN {
        return Err(SideInputError::config(format!(
            "side input key is {} bytes, max {MAX_KEY_LEN}",
            name.len()
        )));
    }
    if name.starts_with('.') {
        return Err(SideInputError::config(format!("side input key '{name}' starts with '.'")));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(SideInputError::config(format!(
            "side input key '{name}' contains invalid character {c:?}"
        )));
    }
    Ok(())
}

impl std::fmt::Display for SideInputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SideInputKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for SideInputKey {
    type Err = SideInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SideInputKey {
    type Error = SideInputError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for SideInputKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SideInputKey::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_pipeline_style_names() {
        for name in ["rate-limit", "myticker", "geo.lookup_v2", "A1"] {
            assert_eq!(SideInputKey::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_path_like_names() {
        for name in ["", ".hidden", "a/b", "../etc", "white space", "tmp\0"] {
            assert!(SideInputKey::new(name).is_err(), "{name:?} must be rejected");
        }
        assert!(SideInputKey::new("x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: SideInputKey = serde_json::from_str("\"rate-limit\"").unwrap();
        assert_eq!(ok.to_string(), "rate-limit");
        assert!(serde_json::from_str::<SideInputKey>("\"a/b\"").is_err());
    }
}
