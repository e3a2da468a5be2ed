use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::constants::{CA_DESCRIPTOR_TAG, TABLE_ID_PMT};
use crate::psi::section::SectionReader;

/// ─────────── PMT ───────────
#[derive(Clone, Debug)]
pub struct PmtSection {
    pub version:        u8,
    pub current_next:   bool,
    pub program_number: u16,
    pub section_number: u8,
    pub last_section:   u8,
    pub pcr_pid:        u16,
    pub ca:             Vec<CaDescriptor>,   // program-level only
    pub streams:        Vec<StreamInfo>,
}
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_type:   u8,
    pub elementary_pid:u16,
}

/// conditional_access_descriptor (tag 0x09)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaDescriptor {
    pub ca_system_id: u16,
    pub ca_pid:       u16,
}

impl PmtSection {
    /// ECM PID announced for `ca_system_id`, if any.
    pub fn ecm_pid(&self, ca_system_id: u16) -> Option<u16> {
        self.ca.iter().find(|d| d.ca_system_id == ca_system_id).map(|d| d.ca_pid)
    }
}

pub fn parse_pmt(section: &[u8]) -> anyhow::Result<PmtSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PMT { anyhow::bail!("not PMT"); }
    let b = sec.body;
    if b.len() < 4 { anyhow::bail!("PMT body too short"); }

    let pcr_pid       = (((b[0] & 0x1F) as u16) << 8) | (b[1] as u16);
    let prog_info_len = (((b[2] & 0x0F) as usize) << 8) | (b[3] as usize);
    let mut idx       = 4 + prog_info_len;
    if idx > b.len() { anyhow::bail!("truncated program descriptors"); }

    let ca = parse_ca_descriptors(&b[4..idx]);

    let mut streams = Vec::new();
    while idx + 5 <= b.len() {
        let stype = b[idx];
        let pid   = (((b[idx+1] & 0x1F) as u16) << 8) | (b[idx+2] as u16);
        let eslen = (((b[idx+3] & 0x0F) as usize) << 8) | (b[idx+4] as usize);
        streams.push(StreamInfo{ stream_type:stype, elementary_pid:pid });
        idx += 5 + eslen;                          // ES descriptors not needed
    }

    Ok(PmtSection{ version:sec.version,
                   current_next:sec.current_next,
                   program_number:sec.extension,
                   section_number:sec.section_number,
                   last_section:sec.last_section,
                   pcr_pid,
                   ca,
                   streams })
}

/// Collects CA descriptors from a descriptor loop; other tags and
/// malformed trailing bytes are skipped.
pub fn parse_ca_descriptors(mut loop_bytes: &[u8]) -> Vec<CaDescriptor> {
    let mut out = Vec::new();
    while loop_bytes.len() >= 2 {
        let tag = loop_bytes[0];
        let len = loop_bytes[1] as usize;
        if 2 + len > loop_bytes.len() { break; }
        let body = &loop_bytes[2..2 + len];
        if tag == CA_DESCRIPTOR_TAG && len >= 4 {
            if let Ok(d) = read_ca_descriptor(body) { out.push(d); }
        }
        loop_bytes = &loop_bytes[2 + len..];
    }
    out
}

fn read_ca_descriptor(body: &[u8]) -> std::io::Result<CaDescriptor> {
    let mut br = BitReader::endian(body, BigEndian);
    let ca_system_id = br.read::<16, u16>()?;
    br.skip(3)?;                                   // reserved
    let ca_pid = br.read::<13, u16>()?;
    Ok(CaDescriptor { ca_system_id, ca_pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::build_section;

    fn pmt_body(ca: &[(u16, u16)], es: &[u16]) -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(&[0xC1, 0x01, 0x84]);   // unrelated descriptor
        for &(sys, pid) in ca {
            info.extend_from_slice(&[CA_DESCRIPTOR_TAG, 4]);
            info.extend_from_slice(&sys.to_be_bytes());
            info.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        }
        let mut b = vec![0xE1, 0x00, 0xF0 | (info.len() >> 8) as u8, info.len() as u8];
        b.extend_from_slice(&info);
        for &pid in es {
            b.extend_from_slice(&[0x02, 0xE0 | (pid >> 8) as u8, pid as u8, 0xF0, 0x03, 0x52, 0x01, 0x00]);
        }
        b
    }

    #[test]
    fn test_ca_descriptor_and_streams() {
        let raw = build_section(0x02, 0x0400, 5, 0, 0, &pmt_body(&[(0x0005, 0x0130)], &[0x0111, 0x0112]));
        let pmt = parse_pmt(&raw).unwrap();
        assert_eq!(pmt.program_number, 0x0400);
        assert_eq!(pmt.version, 5);
        assert_eq!(pmt.pcr_pid, 0x0100);
        assert_eq!(pmt.ecm_pid(0x0005), Some(0x0130));
        assert_eq!(pmt.ecm_pid(0x000A), None);
        let pids: Vec<u16> = pmt.streams.iter().map(|s| s.elementary_pid).collect();
        assert_eq!(pids, vec![0x0111, 0x0112]);
    }

    #[test]
    fn test_truncated_descriptor_is_ignored() {
        assert!(parse_ca_descriptors(&[CA_DESCRIPTOR_TAG, 6, 0x00, 0x05]).is_empty());
    }
}
