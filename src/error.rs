use thiserror::Error;

use crate::card::Protocol;

/// Error returned by smartcard backends.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Security-module session errors.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("no smartcard reader matches {0:?}")]
    NoReaderFound(String),

    #[error("cannot connect to reader {reader:?}: {source}")]
    Connect {
        reader: String,
        #[source]
        source: TransportError,
    },

    #[error("reader negotiated {actual:?}, expected {expected:?}")]
    ProtocolMismatch { expected: Protocol, actual: Protocol },

    #[error("malformed {exchange} response: {len} bytes")]
    MalformedResponse { exchange: &'static str, len: usize },

    #[error("ECM payload length {0} outside 30..=256")]
    InvalidPayloadLength(usize),

    #[error("card transport failure: {0}")]
    Transport(#[source] TransportError),

    #[error("card session is closed")]
    Closed,
}
