use crate::constants::TABLE_ID_PAT;
use crate::psi::section::SectionReader;

/// ─────────── PAT ───────────
#[derive(Clone, Debug)]
pub struct PatSection {
    pub version:        u8,
    pub current_next:   bool,
    pub section_number: u8,
    pub last_section:   u8,
    pub programs:       Vec<PatEntry>,
}
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid:        u16,
}

pub fn parse_pat(section: &[u8]) -> anyhow::Result<PatSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PAT { anyhow::bail!("not PAT"); }

    let mut programs = Vec::new();
    for entry in sec.body.chunks_exact(4) {
        let pn  = u16::from_be_bytes([entry[0], entry[1]]);
        let pid = (((entry[2] & 0x1F) as u16) << 8) | (entry[3] as u16);
        if pn != 0 { programs.push(PatEntry{ program_number:pn, pmt_pid:pid }); }
    }
    Ok(PatSection{ version:sec.version,
                   current_next:sec.current_next,
                   section_number:sec.section_number,
                   last_section:sec.last_section,
                   programs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::build_section;

    #[test]
    fn test_skips_network_pid_entry() {
        let body = [0x00, 0x00, 0xE0, 0x10, 0x04, 0x00, 0xE1, 0xF0];
        let pat = parse_pat(&build_section(0x00, 0x7FE0, 3, 0, 0, &body)).unwrap();
        assert_eq!(pat.version, 3);
        assert_eq!(pat.programs, vec![PatEntry { program_number: 0x0400, pmt_pid: 0x01F0 }]);
    }
}
