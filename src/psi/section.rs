// psi/section.rs
//! Generic long-form PSI / SI section reader with CRC-32 (MPEG-2) validation.

use crc::{Crc, CRC_32_MPEG_2};

/// Returned by [`SectionReader::new`].
pub struct SectionReader<'a> {
    pub table_id:      u8,
    pub extension:     u16,        // program_number for PMT, ts_id for PAT
    pub version:       u8,
    pub current_next:  bool,
    pub section_number:u8,
    pub last_section:  u8,
    pub body:          &'a [u8],   // bytes between fixed header & CRC
}

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

impl<'a> SectionReader<'a> {
    /// Validates length, syntax indicator and CRC-32 of one complete
    /// section starting at `table_id`.
    pub fn new(section: &'a [u8]) -> anyhow::Result<Self> {
        if section.len() < 12 { anyhow::bail!("short section") }

        let sec_len  = ((section[1] & 0x0F) as usize) << 8 | section[2] as usize;
        if sec_len < 9 { anyhow::bail!("invalid section_length") }
        let end      = 3 + sec_len;
        if end > section.len() { anyhow::bail!("truncated section") }
        if section[1] & 0x80 == 0 { anyhow::bail!("not a long-form section") }

        let crc_calc = CRC_MPEG.checksum(&section[..end-4]);
        let crc_sec  = u32::from_be_bytes(section[end-4..end].try_into()?);
        if crc_calc != crc_sec {
            anyhow::bail!("CRC-32 mismatch");
        }

        Ok(Self {
            table_id:      section[0],
            extension:     u16::from_be_bytes([section[3], section[4]]),
            version:       (section[5] & 0x3E) >> 1,
            current_next:  section[5] & 0x01 != 0,
            section_number:section[6],
            last_section:  section[7],
            body:          &section[8 .. end-4],
        })
    }
}

/// Appends the MPEG-2 CRC; used to build sections in tests and tools.
pub fn with_crc(mut section: Vec<u8>) -> Vec<u8> {
    let crc = CRC_MPEG.checksum(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

/// Wraps `body` into a long-form section with a valid CRC.
pub fn build_section(table_id: u8, extension: u16, version: u8, section_number: u8, last_section: u8, body: &[u8]) -> Vec<u8> {
    let sec_len = 5 + body.len() + 4;
    let mut s = Vec::with_capacity(3 + sec_len);
    s.push(table_id);
    s.push(0xB0 | ((sec_len >> 8) as u8 & 0x0F));
    s.push(sec_len as u8);
    s.extend_from_slice(&extension.to_be_bytes());
    s.push(0xC1 | ((version & 0x1F) << 1));
    s.push(section_number);
    s.push(last_section);
    s.extend_from_slice(body);
    with_crc(s)
}

/// Same as [`build_section`] with current_next_indicator cleared: the
/// section announces a version that is not yet applicable.
#[cfg(test)]
pub fn build_next_section(table_id: u8, extension: u16, version: u8, section_number: u8, last_section: u8, body: &[u8]) -> Vec<u8> {
    let mut s = build_section(table_id, extension, version, section_number, last_section, body);
    s[5] &= !0x01;
    s.truncate(s.len() - 4);
    with_crc(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let raw = build_section(0x02, 0x0400, 7, 1, 2, &[0xE1, 0x00, 0xF0, 0x00]);
        let sec = SectionReader::new(&raw).unwrap();
        assert_eq!(sec.table_id, 0x02);
        assert_eq!(sec.extension, 0x0400);
        assert_eq!(sec.version, 7);
        assert!(sec.current_next);
        assert_eq!(sec.section_number, 1);
        assert_eq!(sec.last_section, 2);
        assert_eq!(sec.body, &[0xE1, 0x00, 0xF0, 0x00]);
    }

    #[test]
    fn test_next_section_keeps_valid_crc() {
        let raw = build_next_section(0x02, 0x0400, 8, 0, 0, &[0xE1, 0x00, 0xF0, 0x00]);
        let sec = SectionReader::new(&raw).unwrap();
        assert!(!sec.current_next);
        assert_eq!(sec.version, 8);
    }

    #[test]
    fn test_crc_mismatch() {
        let mut raw = build_section(0x02, 1, 0, 0, 0, &[0u8; 4]);
        raw[9] ^= 0xFF;
        assert!(SectionReader::new(&raw).is_err());
    }
}
