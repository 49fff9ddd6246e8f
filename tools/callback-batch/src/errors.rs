use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{target} does not support operation `{operation}`")]
    UnsupportedOperation { target: String, operation: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("batch is already draining")]
    AlreadyDraining,
    #[error("illegal drain transition: {0}")]
    IllegalTransition(String),
    #[error("reactor exceeded {0} turns before going idle")]
    TurnLimit(u64),
    #[error("reactor went idle with {remaining} step(s) still queued")]
    Stalled { remaining: usize },
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("cli error: {0}")]
    Cli(String),
}

impl BatchError {
    pub fn unsupported(target: &str, operation: &str) -> Self {
        Self::UnsupportedOperation {
            target: target.to_string(),
            operation: operation.to_string(),
        }
    }
}
