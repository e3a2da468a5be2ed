//! Synchronous core of the decoder.
//!
//! The control lane ([`PacketProcessor::observe_sections`]) follows PAT, CAT,
//! PMT and ECM sections and turns new ECM versions into [`KeyRequest`]s. The
//! data lane ([`PacketProcessor::descramble`]) decides, per packet, whether
//! it can be emitted now. Card exchanges happen elsewhere; their outcome
//! comes back through [`PacketProcessor::complete_request`].

use std::collections::{BTreeMap, HashSet};

use log::{debug, info, trace};

use crate::card::{EcmResponse, InitialSetting};
use crate::cipher::DescramblerFactory;
use crate::constants::*;
use crate::entitlement::{EntitlementTable, KeyUpdate, PacketAction, RequestToken};
use crate::error::CardError;
use crate::packet::TsPacket;
use crate::program::ProgramMapTracker;
use crate::psi::{parse_cat, parse_ecm, parse_emm, parse_pat, parse_pmt, SectionAssembler};
use crate::types::{DecoderStats, Options};
use crate::versions::{TableKey, VersionTracker};

/// An ECM payload that must be sent to the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub ecm_pid: u16,
    pub token:   RequestToken,
    pub payload: Vec<u8>,
}

/// Data-lane decision for one packet.
#[derive(Debug)]
pub enum Verdict {
    Emit(TsPacket),
    Drop,
    /// The packet's key is being fetched; retry after the next completion.
    Wait(TsPacket),
}

pub struct PacketProcessor {
    options:      Options,
    setting:      InitialSetting,
    factory:      DescramblerFactory,
    assembler:    SectionAssembler,
    /// PAT, CAT and ECM versions.
    tables:       VersionTracker,
    pat_pending:  BTreeMap<u16, u16>,
    /// program_number -> PMT PID from the last complete PAT.
    pmt_pids:     BTreeMap<u16, u16>,
    emm_pid:      Option<u16>,
    programs:     ProgramMapTracker,
    entitlements: EntitlementTable,
    next_token:   RequestToken,
    stats:        DecoderStats,
}

impl PacketProcessor {
    pub fn new(options: Options, setting: InitialSetting, factory: DescramblerFactory) -> Self {
        Self {
            options,
            setting,
            factory,
            assembler:    SectionAssembler::new(),
            tables:       VersionTracker::new(),
            pat_pending:  BTreeMap::new(),
            pmt_pids:     BTreeMap::new(),
            emm_pid:      None,
            programs:     ProgramMapTracker::new(),
            entitlements: EntitlementTable::new(),
            next_token:   0,
            stats:        DecoderStats::default(),
        }
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut DecoderStats {
        &mut self.stats
    }

    pub fn entitlements(&self) -> &EntitlementTable {
        &self.entitlements
    }

    pub fn programs(&self) -> &ProgramMapTracker {
        &self.programs
    }

    pub fn emm_pid(&self) -> Option<u16> {
        self.emm_pid
    }

    /// Control lane: feeds PSI packets to the section handlers. Returns the
    /// key requests raised by new ECM sections, in arrival order.
    pub fn observe_sections(&mut self, packet: &TsPacket) -> Vec<KeyRequest> {
        let pid = packet.pid();
        let header = packet.header();
        if header.is_scrambled() || !self.is_section_pid(pid) {
            return Vec::new();
        }

        let mut requests = Vec::new();
        for section in self.assembler.push(header, packet.payload()) {
            match self.handle_section(pid, &section) {
                Ok(Some(req)) => requests.push(req),
                Ok(None) => {}
                Err(e) => debug!("PID {pid:#06x}: section dropped: {e}"),
            }
        }
        requests
    }

    fn is_section_pid(&self, pid: u16) -> bool {
        pid == PAT_PID
            || pid == CAT_PID
            || self.entitlements.contains_ecm(pid)
            || (self.options.process_emm && self.emm_pid == Some(pid))
            || self.pmt_pids.values().any(|&p| p == pid)
    }

    fn handle_section(&mut self, pid: u16, section: &[u8]) -> anyhow::Result<Option<KeyRequest>> {
        let table_id = section[0];
        match table_id {
            TABLE_ID_PAT if pid == PAT_PID => self.on_pat(section)?,
            TABLE_ID_CAT if pid == CAT_PID => self.on_cat(section)?,
            TABLE_ID_PMT => self.on_pmt(pid, section)?,
            t if TABLE_ID_ECM.contains(&t) && self.entitlements.contains_ecm(pid) => {
                return self.on_ecm(pid, section);
            }
            t if TABLE_ID_EMM.contains(&t) && self.emm_pid == Some(pid) => {
                let emm = parse_emm(section)?;
                self.stats.emm_sections += 1;
                trace!("EMM {pid:#06x}: {} byte payload", emm.payload.len());
            }
            _ => {}
        }
        Ok(None)
    }

    fn on_pat(&mut self, section: &[u8]) -> anyhow::Result<()> {
        let pat = parse_pat(section)?;
        if !pat.current_next {
            return Ok(());
        }
        let update = self.tables.observe(TableKey::new(TABLE_ID_PAT, 0), pat.version, pat.section_number, pat.last_section);
        if update.new_version {
            self.pat_pending.clear();
        }
        if !update.new_section {
            return Ok(());
        }
        self.pat_pending.extend(pat.programs.iter().map(|e| (e.program_number, e.pmt_pid)));
        if !update.complete {
            return Ok(());
        }

        let current = std::mem::take(&mut self.pat_pending);
        let mut removed_live = false;
        for (&program, &pmt_pid) in &self.pmt_pids {
            if current.get(&program) != Some(&pmt_pid) {
                debug!("program {program:#06x} left the PAT");
                self.assembler.reset(pmt_pid);
                removed_live |= self.programs.remove(program);
            }
        }
        debug!("PAT v{}: {} programs", pat.version, current.len());
        self.pmt_pids = current;
        if removed_live {
            self.rebuild();
        }
        Ok(())
    }

    fn on_cat(&mut self, section: &[u8]) -> anyhow::Result<()> {
        let cat = parse_cat(section)?;
        if !cat.current_next {
            return Ok(());
        }
        let update = self.tables.observe(TableKey::new(TABLE_ID_CAT, 0), cat.version, cat.section_number, cat.last_section);
        if update.new_section {
            if let Some(pid) = cat.emm_pid(self.setting.ca_system_id) {
                if self.emm_pid != Some(pid) {
                    debug!("CAT v{}: EMM PID {pid:#06x}", cat.version);
                    self.emm_pid = Some(pid);
                }
            }
        }
        Ok(())
    }

    fn on_pmt(&mut self, pid: u16, section: &[u8]) -> anyhow::Result<()> {
        let pmt = parse_pmt(section)?;
        if self.pmt_pids.get(&pmt.program_number) != Some(&pid) {
            return Ok(());
        }
        // next-version sections are skipped inside apply
        if self.programs.apply(&pmt, self.setting.ca_system_id) {
            self.rebuild();
        }
        Ok(())
    }

    fn on_ecm(&mut self, pid: u16, section: &[u8]) -> anyhow::Result<Option<KeyRequest>> {
        let ecm = parse_ecm(section)?;
        if !ecm.current_next {
            return Ok(None);
        }
        let update = self.tables.observe(TableKey::new(ecm.table_id, pid), ecm.version, ecm.section_number, ecm.last_section);
        if !update.new_section {
            return Ok(None);
        }
        let Some(state) = self.entitlements.get_mut(pid) else {
            return Ok(None);
        };

        self.next_token += 1;
        let token = self.next_token;
        state.begin_request(token);
        self.stats.ecm_requests += 1;
        debug!("ECM {pid:#06x} v{}: requesting key ({token})", ecm.version);
        Ok(Some(KeyRequest { ecm_pid: pid, token, payload: ecm.payload }))
    }

    /// Rebuilds routing from the program records and forgets ECM versions
    /// of PIDs that lost their state.
    fn rebuild(&mut self) {
        let factory = &self.factory;
        self.entitlements.rebuild(self.programs.records(), &self.setting, &|| factory());

        let live: HashSet<u16> = self.entitlements.ecm_pids().collect();
        for &table_id in TABLE_ID_ECM {
            self.tables.retain(table_id, |pid| live.contains(&pid));
        }
        self.stats.routing_rebuilds += 1;
        info!("routing rebuilt: {} ECM streams", live.len());
    }

    /// Applies the outcome of a card exchange issued for `token`.
    pub fn complete_request(&mut self, ecm_pid: u16, token: RequestToken, outcome: Result<EcmResponse, CardError>) {
        let update = match self.entitlements.get_mut(ecm_pid) {
            Some(state) => state.apply_response(token, outcome),
            None => KeyUpdate::Stale,
        };
        match update {
            KeyUpdate::Stale => {
                debug!("ECM {ecm_pid:#06x}: discarding answer to {token}");
                self.stats.ecm_stale += 1;
            }
            KeyUpdate::Loaded(_) => self.stats.ecm_accepted += 1,
            KeyUpdate::Rejected(_) => self.stats.ecm_rejected += 1,
            KeyUpdate::Failed => self.stats.ecm_failed += 1,
        }
    }

    /// Data lane: decrypts, passes, drops or holds one packet.
    pub fn descramble(&mut self, mut packet: TsPacket) -> Verdict {
        let sc = packet.scrambling_control();
        if sc >> 1 == 0 {
            self.stats.passed_clear += 1;
            return Verdict::Emit(packet);
        }

        let pid = packet.pid();
        let Some(state) = self.entitlements.route_mut(pid) else {
            return self.undecodable(packet);
        };
        match state.action(sc) {
            PacketAction::Wait => {
                trace!("PID {pid:#06x}: waiting for key (sc {sc:#04b})");
                Verdict::Wait(packet)
            }
            PacketAction::Undecodable => self.undecodable(packet),
            PacketAction::Decrypt(parity) => {
                state.decrypt(packet.payload_mut(), parity);
                packet.clear_scrambling_control();
                self.stats.decrypted += 1;
                Verdict::Emit(packet)
            }
        }
    }

    /// Resolves a packet whose key will never arrive.
    pub fn resolve_abandoned(&mut self, packet: TsPacket) -> Verdict {
        self.undecodable(packet)
    }

    fn undecodable(&mut self, packet: TsPacket) -> Verdict {
        if self.options.output_scrambled {
            self.stats.passed_scrambled += 1;
            Verdict::Emit(packet)
        } else {
            self.stats.dropped += 1;
            Verdict::Drop
        }
    }
}
