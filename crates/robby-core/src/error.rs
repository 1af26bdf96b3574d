//! Error taxonomy shared by every component of the launcher core.

use thiserror::Error;

/// Failures reported by actuator implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("actuator is still executing a previous rotation")]
    Busy,

    #[error("operation not supported by this actuator: {0}")]
    Unsupported(&'static str),

    #[error("actuator fault: {0}")]
    Fault(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineError {
    /// Supplied or persisted configuration is structurally or semantically invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A runtime call received an out-of-range or malformed argument.
    #[error("invalid input: {0}")]
    InputData(String),

    /// The operation is not permitted in the current mode/status.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An internal invariant was violated.
    #[error("implementation error: {0}")]
    Implementation(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error("initialization failed during {stage}: {source}")]
    Initialization {
        stage: &'static str,
        source: Box<MachineError>,
    },
}

impl MachineError {
    /// True for errors caused by the caller or the configuration rather than by the machine itself.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InputData(_) | Self::InvalidOperation(_)
        )
    }

    pub(crate) fn during(stage: &'static str, source: MachineError) -> Self {
        Self::Initialization {
            stage,
            source: Box::new(source),
        }
    }
}

pub type Result<T, E = MachineError> = std::result::Result<T, E>;
