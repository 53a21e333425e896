use common::packets::{self, FailReason};
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Lower-level I/O failure; fatal for the session.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("dial timed out")]
    DialTimeout,
    /// The Responder answered an init request with InitFail.
    #[error("connection refused: {0}")]
    HandshakeRejected(FailReason),
    #[error("unexpected packet received: {0}")]
    UnexpectedPacket(&'static str),
    #[error("unknown packet type {0:#010x}")]
    UnknownPacketType(u32),
    #[error("malformed frame")]
    MalformedFrame,
    #[error("no null terminator found for string field")]
    MalformedString,
    #[error("invalid GUID '{0}'")]
    InvalidGuid(String),
    #[error("client is not ready, dial first")]
    NotReady,
    #[error("client is closed")]
    Closed,
    /// The Responder completed the transaction with a non-OK PTP code. Not
    /// fatal for the session.
    #[error("operation failed with response code {0:#06x}")]
    OperationFailed(u16),
    #[error("operation timed out")]
    Timeout,
    /// The Responder dropped the connection on an unknown-data-phase request,
    /// as the standard permits for limited devices.
    #[error("responder does not support the unknown data phase")]
    UnsupportedDataPhase,
    #[error("camera application version is not supported")]
    UnsupportedVendorVersion,
    #[error("peer did not answer probe request in time")]
    PeerUnresponsive,
}

impl From<packets::Error> for Error {
    fn from(error: packets::Error) -> Self {
        match error {
            packets::Error::UnknownPacketType(raw) => Self::UnknownPacketType(raw),
            packets::Error::MalformedString => Self::MalformedString,
            packets::Error::ShortFrame
            | packets::Error::StdIo(_)
            | packets::Error::InvalidEnumValue { .. } => Self::MalformedFrame,
        }
    }
}

/// Fatal session failures recorded by the router threads, kept copyable so
/// they can be replayed to every waiter that asks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Failure {
    Transport,
    UnknownPacketType(u32),
    Malformed,
    PeerUnresponsive,
}

impl Failure {
    pub fn to_error(self) -> Error {
        match self {
            Self::Transport => Error::Transport(io::ErrorKind::ConnectionAborted.into()),
            Self::UnknownPacketType(raw) => Error::UnknownPacketType(raw),
            Self::Malformed => Error::MalformedFrame,
            Self::PeerUnresponsive => Error::PeerUnresponsive,
        }
    }
}
