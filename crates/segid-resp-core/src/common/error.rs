//! Errors raised while framing RESP traffic.
//!
//! A [`Error::Protocol`] means the peer sent bytes that cannot be a RESP
//! frame (or a frame larger than the codec accepts). The stream is no longer
//! aligned on a frame boundary after that, so the only sensible recovery is to
//! close the connection.

use std::io;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport failure reported by the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the wire format.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },
}

impl Error {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}
