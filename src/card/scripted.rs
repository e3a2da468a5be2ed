//! In-memory card backend answering APDUs from a closure.
//!
//! Used by the test suite and for replaying captured exchanges without a
//! reader attached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{CardBackend, CardConnection, Protocol};
use crate::error::TransportError;

type Responder = dyn Fn(&[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync;

#[derive(Clone)]
pub struct ScriptedBackend {
    readers: Vec<String>,
    protocol: Protocol,
    connect_fails: bool,
    responder: Arc<Responder>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    commands: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedBackend {
    pub fn new<I, S, F>(readers: I, responder: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync + 'static,
    {
        Self {
            readers: readers.into_iter().map(Into::into).collect(),
            protocol: Protocol::T1,
            connect_fails: false,
            responder: Arc::new(responder),
            counters: Arc::default(),
        }
    }

    /// Makes every connection report `protocol` as negotiated.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    /// Every command APDU transmitted so far, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.counters.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl CardBackend for ScriptedBackend {
    fn list_readers(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.readers.clone())
    }

    fn connect(&self, reader: &str, _protocol: Protocol) -> Result<Box<dyn CardConnection>, TransportError> {
        if self.connect_fails {
            return Err(format!("no card in {reader}").into());
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCard {
            protocol: self.protocol,
            responder: Arc::clone(&self.responder),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedCard {
    protocol: Protocol,
    responder: Arc<Responder>,
    counters: Arc<Counters>,
}

impl CardConnection for ScriptedCard {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn transmit(&mut self, command: &[u8], max_response_len: usize) -> Result<Vec<u8>, TransportError> {
        self.counters
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_vec());
        let mut resp = (self.responder)(command)?;
        resp.truncate(max_response_len);
        Ok(resp)
    }

    fn disconnect(self: Box<Self>) -> Result<(), TransportError> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
