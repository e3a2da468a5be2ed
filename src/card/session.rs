//! Reference-counted security-module session.
//!
//! One [`SessionManager`] exists per physical card subsystem. Every logical
//! user calls [`SessionManager::acquire`] and gets a [`CasCard`] owner
//! handle; the first owner enumerates readers and connects, later owners
//! attach to the same connection, and the last one to close disconnects.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::apdu::{self, EcmResponse, InitialSetting};
use super::{CardBackend, CardConnection, Protocol};
use crate::constants::MAX_RESPONSE_LEN;
use crate::error::CardError;

type Link = Arc<Mutex<Option<Box<dyn CardConnection>>>>;

/// Owns the single physical connection and its owner count.
pub struct SessionManager {
    backend: Box<dyn CardBackend>,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    owners: usize,
    reader: Option<String>,
    link: Option<Link>,
}

impl SessionManager {
    pub fn new(backend: impl CardBackend + 'static) -> Arc<Self> {
        Arc::new(Self { backend: Box::new(backend), shared: Mutex::new(Shared::default()) })
    }

    /// Opens the session for one more logical owner.
    ///
    /// The first owner selects the first reader whose name contains
    /// `reader_filter`; later owners must match the reader already selected.
    /// Blocks while the first owner enumerates readers and connects; async
    /// callers use [`SessionManager::open`].
    pub fn acquire(self: &Arc<Self>, reader_filter: &str) -> Result<CasCard, CardError> {
        let mut shared = self.lock();

        let link = match shared.link.clone() {
            Some(link) => {
                let selected = shared.reader.as_deref().unwrap_or_default();
                if !selected.contains(reader_filter) {
                    return Err(CardError::NoReaderFound(reader_filter.to_string()));
                }
                link
            }
            None => {
                let (reader, conn) = self.connect(reader_filter)?;
                info!("card session opened on {reader:?}");
                let link: Link = Arc::new(Mutex::new(Some(conn)));
                shared.reader = Some(reader);
                shared.link = Some(Arc::clone(&link));
                link
            }
        };

        shared.owners += 1;
        debug!("card session owners: {}", shared.owners);
        Ok(CasCard { manager: Arc::clone(self), channel: CardChannel { link }, open: true })
    }

    /// [`SessionManager::acquire`] run on the blocking pool.
    pub async fn open(self: &Arc<Self>, reader_filter: &str) -> Result<CasCard, CardError> {
        let manager = Arc::clone(self);
        let filter = reader_filter.to_string();
        tokio::task::spawn_blocking(move || manager.acquire(&filter))
            .await
            .map_err(|e| CardError::Transport(Box::new(e)))?
    }

    fn connect(&self, reader_filter: &str) -> Result<(String, Box<dyn CardConnection>), CardError> {
        let readers = self.backend.list_readers().map_err(CardError::Transport)?;
        let reader = readers
            .into_iter()
            .find(|name| name.contains(reader_filter))
            .ok_or_else(|| CardError::NoReaderFound(reader_filter.to_string()))?;

        let conn = self
            .backend
            .connect(&reader, Protocol::T1)
            .map_err(|source| CardError::Connect { reader: reader.clone(), source })?;

        let actual = conn.protocol();
        if actual != Protocol::T1 {
            if let Err(e) = conn.disconnect() {
                warn!("disconnect after protocol mismatch failed: {e}");
            }
            return Err(CardError::ProtocolMismatch { expected: Protocol::T1, actual });
        }
        Ok((reader, conn))
    }

    fn release(&self) {
        let mut shared = self.lock();
        shared.owners = shared.owners.saturating_sub(1);
        if shared.owners > 0 {
            debug!("card session owners: {}", shared.owners);
            return;
        }

        let reader = shared.reader.take();
        let Some(link) = shared.link.take() else { return };
        let conn = link.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(conn) = conn {
            match conn.disconnect() {
                Ok(()) => info!("card session closed on {:?}", reader.unwrap_or_default()),
                Err(e) => warn!("card disconnect failed: {e}"),
            }
        }
    }

    /// Number of logical owners currently attached.
    pub fn owners(&self) -> usize {
        self.lock().owners
    }

    /// Reader selected by the first owner, while the session is open.
    pub fn reader(&self) -> Option<String> {
        self.lock().reader.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable access to the shared connection, usable from spawned tasks.
///
/// Exchanges fail with [`CardError::Closed`] once the last owner has
/// disconnected.
#[derive(Clone)]
pub struct CardChannel {
    link: Link,
}

impl CardChannel {
    fn transmit_blocking(&self, command: &[u8]) -> Result<Vec<u8>, CardError> {
        let mut guard = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_mut().ok_or(CardError::Closed)?;
        conn.transmit(command, MAX_RESPONSE_LEN).map_err(CardError::Transport)
    }

    async fn transmit(&self, command: Vec<u8>) -> Result<Vec<u8>, CardError> {
        let channel = self.clone();
        tokio::task::spawn_blocking(move || channel.transmit_blocking(&command))
            .await
            .map_err(|e| CardError::Transport(Box::new(e)))?
    }

    pub async fn request_initial_setting(&self) -> Result<InitialSetting, CardError> {
        let resp = self.transmit(apdu::INITIAL_SETTING_COMMAND.to_vec()).await?;
        apdu::decode_initial_setting(&resp)
    }

    /// Runs one ECM exchange. The payload length is checked before the card
    /// is touched.
    pub async fn request_ecm_key(&self, payload: &[u8]) -> Result<EcmResponse, CardError> {
        let command = apdu::ecm_command(payload)?;
        let resp = self.transmit(command).await?;
        apdu::decode_ecm_response(&resp)
    }
}

/// One logical owner of the shared session.
pub struct CasCard {
    manager: Arc<SessionManager>,
    channel: CardChannel,
    open: bool,
}

impl CasCard {
    pub fn channel(&self) -> CardChannel {
        self.channel.clone()
    }

    pub fn reader(&self) -> Option<String> {
        self.manager.reader()
    }

    pub async fn request_initial_setting(&self) -> Result<InitialSetting, CardError> {
        self.channel.request_initial_setting().await
    }

    pub async fn request_ecm_key(&self, payload: &[u8]) -> Result<EcmResponse, CardError> {
        self.channel.request_ecm_key(payload).await
    }

    /// Detaches this owner; the last owner disconnects the card.
    pub fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.manager.release();
        }
    }
}

impl Drop for CasCard {
    fn drop(&mut self) {
        self.close();
    }
}
