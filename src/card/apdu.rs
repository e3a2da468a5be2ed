//! APDU framing for the two B-CAS exchanges.

use std::fmt;

use crate::constants::*;
use crate::error::CardError;

/// Initial-setting command: CLA INS P1 P2 Le(0 = all available).
pub const INITIAL_SETTING_COMMAND: [u8; 5] = [APDU_CLASS, INS_INITIAL_SETTING, 0x00, 0x00, 0x00];

/// Result of the startup handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct InitialSetting {
    pub return_code: u16,
    pub ca_system_id: u16,
    pub card_id: [u8; 6],
    pub card_type: u8,
    pub message_partition_length: u8,
    pub system_key: [u8; SYSTEM_KEY_LEN],
    pub initial_cbc: [u8; CBC_LEN],
}

// keys stay out of logs
impl fmt::Debug for InitialSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitialSetting")
            .field("return_code", &format_args!("{:#06x}", self.return_code))
            .field("ca_system_id", &format_args!("{:#06x}", self.ca_system_id))
            .field("card_id", &self.card_id)
            .field("card_type", &self.card_type)
            .field("message_partition_length", &self.message_partition_length)
            .finish_non_exhaustive()
    }
}

/// Answer to an ECM exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcmResponse {
    pub return_code: u16,
    pub key_block: [u8; SCRAMBLE_KEY_LEN],
    pub recording_control: u8,
}

impl EcmResponse {
    /// Whether the card returned a usable key block.
    pub fn is_accepted(&self) -> bool {
        ACCEPTED_ECM_RETURN_CODES.contains(&self.return_code)
    }

    pub fn odd(&self) -> [u8; KEY_HALF_LEN] {
        half(&self.key_block[..KEY_HALF_LEN])
    }

    pub fn even(&self) -> [u8; KEY_HALF_LEN] {
        half(&self.key_block[KEY_HALF_LEN..])
    }
}

fn half(bytes: &[u8]) -> [u8; KEY_HALF_LEN] {
    let mut out = [0u8; KEY_HALF_LEN];
    out.copy_from_slice(bytes);
    out
}

/// Builds `90 34 00 00 Lc <payload> 00`.
///
/// Lc is a single byte, so a 256-byte payload is encoded as `00`.
pub fn ecm_command(payload: &[u8]) -> Result<Vec<u8>, CardError> {
    if !(ECM_PAYLOAD_MIN..=ECM_PAYLOAD_MAX).contains(&payload.len()) {
        return Err(CardError::InvalidPayloadLength(payload.len()));
    }
    let mut cmd = Vec::with_capacity(payload.len() + 6);
    cmd.extend_from_slice(&[APDU_CLASS, INS_ECM, 0x00, 0x00, payload.len() as u8]);
    cmd.extend_from_slice(payload);
    cmd.push(0x00);
    Ok(cmd)
}

pub fn decode_initial_setting(resp: &[u8]) -> Result<InitialSetting, CardError> {
    if resp.len() < INITIAL_SETTING_MIN_LEN {
        return Err(CardError::MalformedResponse { exchange: "initial setting", len: resp.len() });
    }
    let mut card_id = [0u8; 6];
    card_id.copy_from_slice(&resp[8..14]);
    let mut system_key = [0u8; SYSTEM_KEY_LEN];
    system_key.copy_from_slice(&resp[16..48]);
    let mut initial_cbc = [0u8; CBC_LEN];
    initial_cbc.copy_from_slice(&resp[48..56]);

    Ok(InitialSetting {
        return_code: u16::from_be_bytes([resp[4], resp[5]]),
        ca_system_id: u16::from_be_bytes([resp[6], resp[7]]),
        card_id,
        card_type: resp[14],
        message_partition_length: resp[15],
        system_key,
        initial_cbc,
    })
}

pub fn decode_ecm_response(resp: &[u8]) -> Result<EcmResponse, CardError> {
    if resp.len() != ECM_RESPONSE_LEN {
        return Err(CardError::MalformedResponse { exchange: "ECM", len: resp.len() });
    }
    let mut key_block = [0u8; SCRAMBLE_KEY_LEN];
    key_block.copy_from_slice(&resp[6..22]);
    Ok(EcmResponse {
        return_code: u16::from_be_bytes([resp[4], resp[5]]),
        key_block,
        recording_control: resp[22],
    })
}
