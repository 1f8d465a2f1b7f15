use thiserror::Error;

/// Error taxonomy for one agent step. Everything except [`DriverFatal`]
/// is recoverable inside the step's retry budget.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Locating or interacting with an element failed on every strategy.
    #[error("element unavailable: {0}")]
    ElementUnavailable(String),

    /// The action ran without raising but the page did not change.
    #[error("no observable effect: {0}")]
    NoObservableEffect(String),

    /// The generation fallback was unreachable or returned garbage.
    #[error("generation service failed: {0}")]
    ExternalServiceFailure(String),

    /// The browser session itself is unusable. Aborts the loop.
    #[error("browser session unusable: {0}")]
    DriverFatal(String),
}

impl AgentError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::DriverFatal(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
