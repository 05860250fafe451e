use thiserror::Error;

/// Error taxonomy for the emulation core.
///
/// The core performs no I/O of its own, so nothing here is transient:
/// every variant is surfaced synchronously to the immediate caller, who
/// decides whether to re-run the pipeline or abandon the emission.
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed device profile or field spec. Profiles are static
    /// external inputs, so this is never retried.
    #[error("invalid profile configuration: {0}")]
    Configuration(String),

    /// Malformed hardware identifier or an override producing an
    /// impossible state.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown scenario: {0}")]
    ScenarioNotFound(String),

    #[error("unknown alarm trigger: {0}")]
    TriggerNotFound(String),

    #[error("unknown device: {0}")]
    DeviceNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
