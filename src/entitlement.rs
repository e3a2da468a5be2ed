//! Per-ECM-PID key state and the ES PID → state routing table.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::card::{EcmResponse, InitialSetting};
use crate::cipher::{Descrambler, KeyParity};
use crate::constants::{EPOCH_EVEN_CHANGED, EPOCH_ODD_CHANGED, KEY_HALF_LEN};
use crate::error::CardError;
use crate::program::ProgramRecord;

/// Identity of one key request; never reused within a decoder.
pub type RequestToken = u64;

/// What the data lane should do with a scrambled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAction {
    /// A key request is in flight and the current key predates the packet.
    Wait,
    /// No usable key.
    Undecodable,
    Decrypt(KeyParity),
}

/// Outcome of feeding a card answer into a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUpdate {
    /// The token no longer matches; the answer was ignored.
    Stale,
    /// New key loaded; carries the new epoch.
    Loaded(u8),
    /// Card answered with a non-accepted return code.
    Rejected(u16),
    /// The exchange itself failed.
    Failed,
}

pub struct EntitlementState {
    ecm_pid:   u16,
    instance:  u64,
    ready:     bool,
    epoch:     u8,
    last_odd:  Option<[u8; KEY_HALF_LEN]>,
    last_even: Option<[u8; KEY_HALF_LEN]>,
    in_flight: Option<RequestToken>,
    cipher:    Box<dyn Descrambler>,
}

impl EntitlementState {
    pub fn new(ecm_pid: u16, instance: u64, mut cipher: Box<dyn Descrambler>, setting: &InitialSetting) -> Self {
        cipher.set_system_key(&setting.system_key);
        cipher.set_initial_cbc(&setting.initial_cbc);
        Self {
            ecm_pid,
            instance,
            ready: false,
            epoch: 0,
            last_odd: None,
            last_even: None,
            in_flight: None,
            cipher,
        }
    }

    pub fn ecm_pid(&self) -> u16 {
        self.ecm_pid
    }

    /// Distinguishes states created for the same PID at different times.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    pub fn in_flight(&self) -> Option<RequestToken> {
        self.in_flight
    }

    /// Records a new outstanding request; an older one becomes stale.
    pub fn begin_request(&mut self, token: RequestToken) {
        if let Some(old) = self.in_flight.replace(token) {
            debug!("ECM {:#06x}: request {old} superseded by {token}", self.ecm_pid);
        }
    }

    pub fn action(&self, scrambling_control: u8) -> PacketAction {
        if self.in_flight.is_some() && self.epoch != scrambling_control {
            PacketAction::Wait
        } else if !self.ready {
            PacketAction::Undecodable
        } else {
            PacketAction::Decrypt(KeyParity::from_scrambling_control(scrambling_control))
        }
    }

    pub fn decrypt(&mut self, payload: &mut [u8], parity: KeyParity) {
        self.cipher.decrypt(payload, parity);
    }

    pub fn apply_response(&mut self, token: RequestToken, outcome: Result<EcmResponse, CardError>) -> KeyUpdate {
        if self.in_flight != Some(token) {
            return KeyUpdate::Stale;
        }
        self.in_flight = None;

        match outcome {
            Ok(resp) if resp.is_accepted() => {
                let (odd, even) = (resp.odd(), resp.even());
                let mut epoch = 0;
                if self.last_odd.is_some_and(|k| k != odd) {
                    epoch += EPOCH_ODD_CHANGED;
                }
                if self.last_even.is_some_and(|k| k != even) {
                    epoch += EPOCH_EVEN_CHANGED;
                }
                self.cipher.set_scramble_key(&resp.key_block);
                self.ready = true;
                self.epoch = epoch;
                self.last_odd = Some(odd);
                self.last_even = Some(even);
                if epoch != 0 {
                    info!("ECM {:#06x}: key rotated (epoch {epoch})", self.ecm_pid);
                }
                KeyUpdate::Loaded(epoch)
            }
            Ok(resp) => {
                // halves are kept for the next comparison
                warn!("ECM {:#06x}: card returned {:#06x}", self.ecm_pid, resp.return_code);
                self.ready = false;
                self.epoch = 0;
                KeyUpdate::Rejected(resp.return_code)
            }
            Err(e) => {
                warn!("ECM {:#06x}: exchange failed: {e}", self.ecm_pid);
                self.ready = false;
                self.epoch = 0;
                self.last_odd = None;
                self.last_even = None;
                KeyUpdate::Failed
            }
        }
    }
}

/// ECM PID → state, plus ES PID → ECM PID routing. Both maps are replaced
/// together by [`EntitlementTable::rebuild`].
#[derive(Default)]
pub struct EntitlementTable {
    states:        HashMap<u16, EntitlementState>,
    routes:        HashMap<u16, u16>,
    next_instance: u64,
}

impl EntitlementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes routing from the complete program records, keeping
    /// existing states for ECM PIDs still referenced and dropping the rest.
    pub fn rebuild<'a>(
        &mut self,
        programs: impl IntoIterator<Item = &'a ProgramRecord>,
        setting: &InitialSetting,
        make_cipher: &dyn Fn() -> Box<dyn Descrambler>,
    ) {
        let mut old = std::mem::take(&mut self.states);
        let mut states = HashMap::new();
        let mut routes = HashMap::new();

        for program in programs {
            if !program.complete {
                continue;
            }
            let Some(ecm_pid) = program.ecm_pid else { continue };

            if !states.contains_key(&ecm_pid) {
                let state = match old.remove(&ecm_pid) {
                    Some(state) => state,
                    None => {
                        self.next_instance += 1;
                        debug!("ECM {ecm_pid:#06x}: new entitlement state");
                        EntitlementState::new(ecm_pid, self.next_instance, make_cipher(), setting)
                    }
                };
                states.insert(ecm_pid, state);
            }
            for &es_pid in &program.es_pids {
                routes.insert(es_pid, ecm_pid);
            }
        }

        for pid in old.keys() {
            debug!("ECM {pid:#06x}: entitlement state dropped");
        }
        self.states = states;
        self.routes = routes;
    }

    /// State protecting elementary stream `es_pid`.
    pub fn route(&self, es_pid: u16) -> Option<&EntitlementState> {
        self.routes.get(&es_pid).and_then(|ecm| self.states.get(ecm))
    }

    pub fn route_mut(&mut self, es_pid: u16) -> Option<&mut EntitlementState> {
        let ecm = *self.routes.get(&es_pid)?;
        self.states.get_mut(&ecm)
    }

    pub fn get(&self, ecm_pid: u16) -> Option<&EntitlementState> {
        self.states.get(&ecm_pid)
    }

    pub fn get_mut(&mut self, ecm_pid: u16) -> Option<&mut EntitlementState> {
        self.states.get_mut(&ecm_pid)
    }

    pub fn contains_ecm(&self, ecm_pid: u16) -> bool {
        self.states.contains_key(&ecm_pid)
    }

    pub fn ecm_pids(&self) -> impl Iterator<Item = u16> + '_ {
        self.states.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
