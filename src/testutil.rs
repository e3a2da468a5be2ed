//! Fixtures shared by unit tests.

use crate::card::{EcmResponse, InitialSetting};
use crate::cipher::{Descrambler, KeyParity};
use crate::constants::{CBC_LEN, KEY_HALF_LEN, SCRAMBLE_KEY_LEN, SYSTEM_KEY_LEN};

/// XORs every payload byte with the first byte of the selected key half.
#[derive(Default)]
pub struct XorDescrambler {
    key: [u8; SCRAMBLE_KEY_LEN],
}

impl Descrambler for XorDescrambler {
    fn set_system_key(&mut self, _key: &[u8; SYSTEM_KEY_LEN]) {}

    fn set_initial_cbc(&mut self, _cbc: &[u8; CBC_LEN]) {}

    fn set_scramble_key(&mut self, key: &[u8; SCRAMBLE_KEY_LEN]) {
        self.key = *key;
    }

    fn decrypt(&mut self, data: &mut [u8], parity: KeyParity) {
        let k = match parity {
            KeyParity::Odd => self.key[0],
            KeyParity::Even => self.key[KEY_HALF_LEN],
        };
        data.iter_mut().for_each(|b| *b ^= k);
    }
}

pub fn initial_setting() -> InitialSetting {
    InitialSetting {
        return_code: 0x2100,
        ca_system_id: 0x0005,
        card_id: [0; 6],
        card_type: 0x01,
        message_partition_length: 0,
        system_key: [0x11; SYSTEM_KEY_LEN],
        initial_cbc: [0x22; CBC_LEN],
    }
}

pub fn ecm_response(return_code: u16, odd: [u8; KEY_HALF_LEN], even: [u8; KEY_HALF_LEN]) -> EcmResponse {
    let mut key_block = [0u8; SCRAMBLE_KEY_LEN];
    key_block[..KEY_HALF_LEN].copy_from_slice(&odd);
    key_block[KEY_HALF_LEN..].copy_from_slice(&even);
    EcmResponse { return_code, key_block, recording_control: 0 }
}
