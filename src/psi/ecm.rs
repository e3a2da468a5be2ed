// psi/ecm.rs
//! ECM / EMM sections (ARIB table_ids 0x82-0x85). The payload handed to the
//! card is the section body between the 8-byte header and the CRC.

use crate::constants::{TABLE_ID_ECM, TABLE_ID_EMM};
use crate::psi::section::SectionReader;

#[derive(Clone, Debug)]
pub struct CaMessageSection {
    pub table_id:       u8,
    pub version:        u8,
    pub current_next:   bool,
    pub section_number: u8,
    pub last_section:   u8,
    pub payload:        Vec<u8>,
}

fn parse_ca_message(section: &[u8], table_ids: &[u8], what: &str) -> anyhow::Result<CaMessageSection> {
    let sec = SectionReader::new(section)?;
    if !table_ids.contains(&sec.table_id) {
        anyhow::bail!("not {what}");
    }
    Ok(CaMessageSection {
        table_id:       sec.table_id,
        version:        sec.version,
        current_next:   sec.current_next,
        section_number: sec.section_number,
        last_section:   sec.last_section,
        payload:        sec.body.to_vec(),
    })
}

pub fn parse_ecm(section: &[u8]) -> anyhow::Result<CaMessageSection> {
    parse_ca_message(section, TABLE_ID_ECM, "ECM")
}

pub fn parse_emm(section: &[u8]) -> anyhow::Result<CaMessageSection> {
    parse_ca_message(section, TABLE_ID_EMM, "EMM")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::build_section;

    #[test]
    fn test_ecm_payload_is_section_body() {
        let body: Vec<u8> = (0..40).collect();
        let ecm = parse_ecm(&build_section(0x82, 0x0000, 9, 0, 0, &body)).unwrap();
        assert_eq!(ecm.version, 9);
        assert_eq!(ecm.payload, body);
        assert!(parse_emm(&build_section(0x82, 0, 0, 0, 0, &body)).is_err());
    }
}
