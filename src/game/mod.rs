//! Session modules: registry, proximity, state machine and fan-out

pub mod broadcast;
pub mod coordinator;
pub mod proximity;
pub mod registry;
pub mod session;

pub use coordinator::{SessionCommand, SessionCoordinator, SessionHandle};

use crate::ws::protocol::{ConnectionId, ServerMsg};

/// Errors for a single request; none of these stop the session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Connection {0} already has a player")]
    DuplicateIdentity(ConnectionId),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl SessionError {
    /// Stable machine-readable code for the wire
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::DuplicateIdentity(_) => "duplicate_identity",
            SessionError::UnknownConnection(_) => "unknown_connection",
            SessionError::InvalidPayload(_) => "invalid_payload",
        }
    }

    pub fn to_server_msg(&self) -> ServerMsg {
        ServerMsg::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
