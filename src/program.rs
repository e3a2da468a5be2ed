//! Program map tracking: which ECM PID protects which elementary streams.

use std::collections::BTreeMap;

use log::debug;

use crate::constants::TABLE_ID_PMT;
use crate::psi::PmtSection;
use crate::versions::{TableKey, VersionTracker};

/// What one program's current PMT version says about scrambling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramRecord {
    pub program_number: u16,
    pub ecm_pid:        Option<u16>,
    pub es_pids:        Vec<u16>,
    /// Every section of the current PMT version has been applied.
    pub complete:       bool,
}

#[derive(Default)]
pub struct ProgramMapTracker {
    programs: BTreeMap<u16, ProgramRecord>,
    versions: VersionTracker,
}

impl ProgramMapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one PMT section. Returns `true` when the section completed a
    /// version and the routing table must be rebuilt. Sections announcing
    /// the next version are ignored.
    pub fn apply(&mut self, pmt: &PmtSection, ca_system_id: u16) -> bool {
        if !pmt.current_next {
            return false;
        }
        let key = TableKey::new(TABLE_ID_PMT, pmt.program_number);
        let update = self.versions.observe(key, pmt.version, pmt.section_number, pmt.last_section);

        let record = self.programs.entry(pmt.program_number).or_insert_with(|| ProgramRecord {
            program_number: pmt.program_number,
            ..Default::default()
        });

        if update.new_version {
            record.ecm_pid = None;
            record.es_pids.clear();
            record.complete = false;
        }
        if !update.new_section {
            return false;
        }

        if let Some(pid) = pmt.ecm_pid(ca_system_id) {
            record.ecm_pid = Some(pid);
        }
        for stream in &pmt.streams {
            if !record.es_pids.contains(&stream.elementary_pid) {
                record.es_pids.push(stream.elementary_pid);
            }
        }

        if !update.complete {
            return false;
        }
        record.complete = true;
        debug!(
            "program {:#06x} v{}: ECM {:?}, {} streams",
            record.program_number,
            pmt.version,
            record.ecm_pid,
            record.es_pids.len()
        );
        true
    }

    /// Forgets a program that left the PAT. Returns `true` if it had been
    /// published.
    pub fn remove(&mut self, program_number: u16) -> bool {
        self.versions.forget(TableKey::new(TABLE_ID_PMT, program_number));
        self.programs.remove(&program_number).is_some_and(|r| r.complete)
    }

    pub fn get(&self, program_number: u16) -> Option<&ProgramRecord> {
        self.programs.get(&program_number)
    }

    pub fn records(&self) -> impl Iterator<Item = &ProgramRecord> {
        self.programs.values()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::{CaDescriptor, pmt::StreamInfo};

    const CA: u16 = 0x0005;

    fn pmt(version: u8, section: u8, last: u8, ecm: Option<u16>, es: &[u16]) -> PmtSection {
        PmtSection {
            version,
            current_next: true,
            program_number: 0x0400,
            section_number: section,
            last_section: last,
            pcr_pid: 0x01FF,
            ca: ecm.map(|ca_pid| CaDescriptor { ca_system_id: CA, ca_pid }).into_iter().collect(),
            streams: es.iter().map(|&p| StreamInfo { stream_type: 0x02, elementary_pid: p }).collect(),
        }
    }

    #[test]
    fn test_complete_section_publishes() {
        let mut t = ProgramMapTracker::new();
        assert!(t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111, 0x112]), CA));
        let r = t.get(0x0400).unwrap();
        assert!(r.complete);
        assert_eq!(r.ecm_pid, Some(0x130));
        assert_eq!(r.es_pids, vec![0x111, 0x112]);
    }

    #[test]
    fn test_repeat_version_is_noop() {
        let mut t = ProgramMapTracker::new();
        t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111]), CA);
        assert!(!t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111]), CA));
        assert_eq!(t.get(0x0400).unwrap().es_pids, vec![0x111]);
    }

    #[test]
    fn test_version_bump_drops_stale_pids() {
        let mut t = ProgramMapTracker::new();
        t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111, 0x112]), CA);
        assert!(t.apply(&pmt(2, 0, 0, None, &[0x113]), CA));
        let r = t.get(0x0400).unwrap();
        assert_eq!(r.ecm_pid, None);
        assert_eq!(r.es_pids, vec![0x113]);
    }

    #[test]
    fn test_partial_version_not_published() {
        let mut t = ProgramMapTracker::new();
        assert!(!t.apply(&pmt(3, 0, 1, Some(0x130), &[0x111]), CA));
        assert!(!t.get(0x0400).unwrap().complete);
        assert!(t.apply(&pmt(3, 1, 1, None, &[0x112]), CA));
        let r = t.get(0x0400).unwrap();
        assert_eq!(r.ecm_pid, Some(0x130));
        assert_eq!(r.es_pids, vec![0x111, 0x112]);
    }

    #[test]
    fn test_next_version_is_not_applied() {
        let mut t = ProgramMapTracker::new();
        t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111]), CA);
        let next = PmtSection { current_next: false, ..pmt(2, 0, 0, Some(0x140), &[0x112]) };
        assert!(!t.apply(&next, CA));
        assert_eq!(t.get(0x0400).unwrap().ecm_pid, Some(0x130));
        // the version must still count as new once it becomes current
        assert!(t.apply(&pmt(2, 0, 0, Some(0x140), &[0x112]), CA));
        assert_eq!(t.get(0x0400).unwrap().ecm_pid, Some(0x140));
    }

    #[test]
    fn test_foreign_ca_system_ignored() {
        let mut t = ProgramMapTracker::new();
        t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111]), 0x000A);
        assert_eq!(t.get(0x0400).unwrap().ecm_pid, None);
    }

    #[test]
    fn test_remove() {
        let mut t = ProgramMapTracker::new();
        t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111]), CA);
        assert!(t.remove(0x0400));
        assert!(!t.remove(0x0400));
        assert!(t.apply(&pmt(1, 0, 0, Some(0x130), &[0x111]), CA));
    }
}
