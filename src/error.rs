use std::io;
use std::net::SocketAddr;

/// Errors surfaced by the transport's public API.
///
/// The variants map to different handling on the caller side: [TransportError::UnknownLocalAddress]
///  and [TransportError::InvalidConfig] are fatal and only returned while constructing a
///  transport. [TransportError::ValueTooLarge] aborts a single `post()` before anything is sent,
///  and [TransportError::Io] is scoped to a single destination (or to the payload encoding of a
///  single message).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot resolve local address {addr}: {reason}")]
    UnknownLocalAddress {
        addr: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{what} is {value}, exceeding the maximum of {max}")]
    ValueTooLarge {
        what: &'static str,
        value: usize,
        max: usize,
    },

    #[error("I/O error{}: {source}", fmt_destination(.to))]
    Io {
        to: Option<SocketAddr>,
        #[source]
        source: io::Error,
    },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

fn fmt_destination(to: &Option<SocketAddr>) -> String {
    match to {
        Some(addr) => format!(" sending to {:?}", addr),
        None => String::new(),
    }
}

impl TransportError {
    pub fn io(to: SocketAddr, source: io::Error) -> TransportError {
        TransportError::Io { to: Some(to), source }
    }

    /// Errors that are worth retrying at the application level, i.e. transient network problems
    ///  as opposed to messages that can never be sent or bugs
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Io { to: Some(_), .. })
    }
}

impl From<io::Error> for TransportError {
    fn from(source: io::Error) -> Self {
        TransportError::Io { to: None, source }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
