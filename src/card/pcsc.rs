//! PC/SC backend (pcsc-lite on Unix, WinSCard on Windows).

use std::ffi::CString;

use pcsc::{Card, Context, Disposition, Protocols, Scope, ShareMode};

use super::{CardBackend, CardConnection, Protocol};
use crate::error::TransportError;

pub struct PcscBackend {
    ctx: Context,
}

impl PcscBackend {
    pub fn establish() -> Result<Self, TransportError> {
        Ok(Self { ctx: Context::establish(Scope::User)? })
    }
}

impl CardBackend for PcscBackend {
    fn list_readers(&self) -> Result<Vec<String>, TransportError> {
        let names = match self.ctx.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(names.into_iter().map(|n| n.to_string_lossy().into_owned()).collect())
    }

    fn connect(&self, reader: &str, protocol: Protocol) -> Result<Box<dyn CardConnection>, TransportError> {
        let wanted = match protocol {
            Protocol::T0 => Protocols::T0,
            Protocol::T1 => Protocols::T1,
            Protocol::Raw => Protocols::RAW,
            Protocol::Unknown => Protocols::ANY,
        };
        let name = CString::new(reader)?;
        let card = self.ctx.connect(&name, ShareMode::Shared, wanted)?;
        let negotiated = card.status2_owned()?.protocol2();
        let protocol = match negotiated {
            Some(pcsc::Protocol::T0) => Protocol::T0,
            Some(pcsc::Protocol::T1) => Protocol::T1,
            Some(pcsc::Protocol::RAW) => Protocol::Raw,
            #[allow(unreachable_patterns)]
            _ => Protocol::Unknown,
        };
        Ok(Box::new(PcscCard { card, protocol }))
    }
}

struct PcscCard {
    card: Card,
    protocol: Protocol,
}

impl CardConnection for PcscCard {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn transmit(&mut self, command: &[u8], max_response_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_response_len];
        let resp = self.card.transmit(command, &mut buf)?;
        Ok(resp.to_vec())
    }

    fn disconnect(self: Box<Self>) -> Result<(), TransportError> {
        self.card.disconnect(Disposition::LeaveCard).map_err(|(_, e)| e.into())
    }
}
