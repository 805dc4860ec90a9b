use saver_api::SaverError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("saver error: {0}")]
    Saver(#[from] SaverError),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Saver` variant, context is added to the inner `SaverError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Saver(e) => EngineError::Saver(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
        }
    }
}
