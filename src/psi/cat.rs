use crate::constants::TABLE_ID_CAT;
use crate::psi::pmt::{parse_ca_descriptors, CaDescriptor};
use crate::psi::section::SectionReader;

#[derive(Clone, Debug)]
pub struct CatSection {
    pub version:        u8,
    pub current_next:   bool,
    pub section_number: u8,
    pub last_section:   u8,
    pub ca:             Vec<CaDescriptor>,   // CA_PID here is the EMM PID
}

impl CatSection {
    pub fn emm_pid(&self, ca_system_id: u16) -> Option<u16> {
        self.ca.iter().find(|d| d.ca_system_id == ca_system_id).map(|d| d.ca_pid)
    }
}

pub fn parse_cat(section: &[u8]) -> anyhow::Result<CatSection> {
    let sec = SectionReader::new(section)?;          // CRC verified
    if sec.table_id != TABLE_ID_CAT {
        anyhow::bail!("not CAT");
    }
    Ok(CatSection {
        version: sec.version,
        current_next: sec.current_next,
        section_number: sec.section_number,
        last_section: sec.last_section,
        ca: parse_ca_descriptors(sec.body),
    })
}
