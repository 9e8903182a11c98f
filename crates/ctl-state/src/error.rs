use ctl_transport::TransportError;
use state_tree::TreeError;
use thiserror::Error;

pub type Result<T, E = StateError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("device error: {0}")]
    Device(#[from] TransportError),
    #[error("control #{numid}: {source}")]
    Control {
        numid: u32,
        #[source]
        source: TransportError,
    },
    #[error("control #{numid}: {reason}")]
    Data { numid: u32, reason: String },
    #[error("control #{numid} not found ({id}): {reason}")]
    ControlNotFound {
        numid: u32,
        id: String,
        reason: String,
    },
    #[error("card not found: {0}")]
    CardNotFound(String),
    #[error("bad state document: {0}")]
    Document(String),
    #[error("state document: {0}")]
    Tree(#[from] TreeError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StateError {
    pub fn data(numid: u32, reason: impl Into<String>) -> Self {
        StateError::Data {
            numid,
            reason: reason.into(),
        }
    }

    pub(crate) fn control(numid: u32) -> impl FnOnce(TransportError) -> Self {
        move |source| StateError::Control { numid, source }
    }
}
