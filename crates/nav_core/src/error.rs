use thiserror::Error;

/// Instancing failures. None of these surface to the caller of a navigation
/// method; they are logged at the orchestration boundary and the in-flight
/// navigation is abandoned.
#[derive(Debug, Error)]
pub enum NavError {
    #[error("controller module {0} could not be resolved")]
    ControllerNotFound(String),

    #[error("wrapper module {0} could not be resolved")]
    WrapperNotFound(String),

    #[error("module loader failed for {path}")]
    LoadFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}
