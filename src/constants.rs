//! Constants for MPEG-TS framing and ARIB STD-B25 card exchanges

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Fixed PIDs
pub const PAT_PID: u16 = 0x0000;
pub const CAT_PID: u16 = 0x0001;

/// Table ids handled by the control lane
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_CAT: u8 = 0x01;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TABLE_ID_ECM: &[u8] = &[0x82, 0x83];
pub const TABLE_ID_EMM: &[u8] = &[0x84, 0x85];

/// conditional_access_descriptor
pub const CA_DESCRIPTOR_TAG: u8 = 0x09;

/// Stuffing byte after the last section of a packet
pub const SECTION_STUFFING: u8 = 0xFF;

/// Card APDU constants
pub const APDU_CLASS: u8 = 0x90;
pub const INS_INITIAL_SETTING: u8 = 0x30;
pub const INS_ECM: u8 = 0x34;
pub const MAX_RESPONSE_LEN: usize = 1024;

pub const INITIAL_SETTING_MIN_LEN: usize = 57;
pub const ECM_RESPONSE_LEN: usize = 25;
pub const ECM_PAYLOAD_MIN: usize = 30;
pub const ECM_PAYLOAD_MAX: usize = 256;

pub const SYSTEM_KEY_LEN: usize = 32;
pub const CBC_LEN: usize = 8;
pub const SCRAMBLE_KEY_LEN: usize = 16;
pub const KEY_HALF_LEN: usize = 8;

/// ECM return codes that carry a usable key block
pub const ACCEPTED_ECM_RETURN_CODES: &[u16] = &[0x0200, 0x0400, 0x0800, 0x4480, 0x4280];

/// Epoch contributions of a changed key half. They match the scrambling
/// control value of the packets that use that half.
pub const EPOCH_ODD_CHANGED: u8 = 3;
pub const EPOCH_EVEN_CHANGED: u8 = 2;
