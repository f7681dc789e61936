use sideinput_api::SideInputError;
use sideinput_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("store: {0}")]
    Store(#[from] SideInputError),

    #[error("no {0} configured")]
    NothingConfigured(&'static str),

    #[error("side input '{0}' not found")]
    NotFound(String),

    #[error("interrupted")]
    Interrupted,

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
