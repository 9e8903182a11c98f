use thiserror::Error;

pub type Result<T, E = TreeError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("node is not a compound: {0}")]
    NotCompound(String),
    #[error("duplicate node id: {0}")]
    Duplicate(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
