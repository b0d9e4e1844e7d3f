use super::engine::EngineState;

/// Errors raised or reported by the engine coordinator.
///
/// Registration errors are returned to the caller. Everything else is
/// recovered where it happens and delivered through the coordinator's error
/// channel.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("engine `{0}` is already registered")]
    DuplicateEngine(String),

    #[error("unknown engine `{0}`")]
    UnknownEngine(String),

    #[error("engine `{name}` is not available (state {state:?})")]
    EngineUnavailable { name: String, state: EngineState },

    #[error("no engine is active")]
    NoActiveEngine,

    #[error("failed to acquire resources for `{engine}`: {error:#}")]
    ResourceAcquisition { engine: String, error: anyhow::Error },

    #[error("engine `{engine}` failed in `{hook}`: {error:#}")]
    EngineHook {
        engine: String,
        hook: String,
        error: anyhow::Error,
    },

    #[error("canvas switch to `{engine}` failed: {error:#}")]
    CanvasSwitch { engine: String, error: anyhow::Error },
}

impl CoordinatorError {
    pub(crate) fn hook(engine: &str, hook: &str, error: anyhow::Error) -> Self {
        Self::EngineHook {
            engine: engine.to_string(),
            hook: hook.to_string(),
            error,
        }
    }
}
