use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("card not found: {0}")]
    CardNotFound(String),
    #[error("control not found: {0}")]
    ControlNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(String),
}
