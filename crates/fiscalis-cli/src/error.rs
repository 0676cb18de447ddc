use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] fiscalis_core::ValidationError),

    #[error(transparent)]
    Core(#[from] fiscalis_core::CoreError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Core(fiscalis_core::CoreError::Validation(_)) => 2,
            Self::Core(fiscalis_core::CoreError::Serialization(_)) | Self::Serialization(_) => 4,
            Self::Core(fiscalis_core::CoreError::Io(_)) | Self::Io(_) => 10,
        }
    }
}
