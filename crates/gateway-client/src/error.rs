use std::io;

use realmwire_core::error::{FrameError, ProtocolError, SrpError, WireError};
use realmwire_core::packets::world::ResponseCode;

/// Terminal outcome of a logon or world connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("logon handshake failed: {0}")]
    Handshake(#[from] SrpError),
    #[error("world session rejected with {code:?}")]
    WorldRejected { code: ResponseCode },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("connection closed")]
    Closed,
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(err.into())
    }
}

impl From<WireError> for SessionError {
    fn from(err: WireError) -> Self {
        Self::Protocol(err.into())
    }
}

impl SessionError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
