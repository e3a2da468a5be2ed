//! Security-module access: smartcard transport seams, APDU codec and the
//! reference-counted session shared by every decoder in the process.

pub mod apdu;
pub mod scripted;
mod session;

#[cfg(feature = "pcsc")]
pub mod pcsc;

pub use apdu::{EcmResponse, InitialSetting};
pub use session::{CardChannel, CasCard, SessionManager};

use crate::error::TransportError;

/// Transmission protocol negotiated with the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    T0,
    T1,
    Raw,
    Unknown,
}

/// Platform smartcard subsystem: reader enumeration and connect.
pub trait CardBackend: Send + Sync {
    fn list_readers(&self) -> Result<Vec<String>, TransportError>;

    /// Connects to `reader` in shared mode asking for `protocol`.
    fn connect(&self, reader: &str, protocol: Protocol) -> Result<Box<dyn CardConnection>, TransportError>;
}

/// A connected card.
pub trait CardConnection: Send {
    /// Protocol actually negotiated by the reader.
    fn protocol(&self) -> Protocol;

    /// Sends one command APDU and returns the full response.
    fn transmit(&mut self, command: &[u8], max_response_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Leaves the card powered and releases the connection.
    fn disconnect(self: Box<Self>) -> Result<(), TransportError>;
}
