use crate::domain::AuthState;

/// Core error taxonomy.
///
/// Adapter crates map platform failures into this type so the session state
/// machine can tell recoverable rejections apart from transport faults:
/// `AuthRejected` leaves the machine in the same awaiting-state for a retry,
/// `Transport` is terminal for the current attempt until an explicit
/// reconnect.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("{op} is not valid while {state}")]
    InvalidState { op: &'static str, state: &'static str },

    #[error("a login request is already pending")]
    AlreadyPending,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("login cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_state(op: &'static str, state: &AuthState) -> Self {
        Self::InvalidState {
            op,
            state: state.name(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
