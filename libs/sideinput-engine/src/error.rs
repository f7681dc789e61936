use sideinput_api::SideInputError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("side input error: {0}")]
    SideInput(#[from] SideInputError),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `SideInput` variant, context is added to the inner `SideInputError`.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::SideInput(e) => EngineError::SideInput(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::Timeout(msg) => EngineError::Timeout(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_reaches_inner_error() {
        let err = EngineError::from(SideInputError::storage_write("disk full")).with_context("key 'rates'");
        assert_eq!(err.to_string(), "side input error: key 'rates': disk full");
    }

    #[test]
    fn context_prefixes_config_message() {
        let err = EngineError::Config("missing key".into()).with_context("generator #2");
        assert_eq!(err.to_string(), "config error: generator #2: missing key");
    }
}
