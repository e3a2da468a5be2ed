//! Seam to the MULTI2 block cipher.
//!
//! The cipher itself lives outside this crate; a decoder is handed a
//! [`DescramblerFactory`] and builds one context per entitlement stream.

use std::sync::Arc;

use crate::constants::{CBC_LEN, SCRAMBLE_KEY_LEN, SYSTEM_KEY_LEN};

/// Which half of the scramble key a packet was encrypted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyParity {
    Even,
    Odd,
}

impl KeyParity {
    /// Low bit of `transport_scrambling_control`: `11` is odd, `10` is even.
    pub fn from_scrambling_control(sc: u8) -> Self {
        if sc & 0x01 == 0 { KeyParity::Even } else { KeyParity::Odd }
    }
}

/// Cipher context used to descramble packet payloads in place.
pub trait Descrambler: Send {
    fn set_system_key(&mut self, key: &[u8; SYSTEM_KEY_LEN]);
    fn set_initial_cbc(&mut self, cbc: &[u8; CBC_LEN]);
    /// Loads the 16-byte key block: odd half first, even half second.
    fn set_scramble_key(&mut self, key: &[u8; SCRAMBLE_KEY_LEN]);
    fn decrypt(&mut self, data: &mut [u8], parity: KeyParity);
}

/// Builds a fresh, unkeyed cipher context.
pub type DescramblerFactory = Arc<dyn Fn() -> Box<dyn Descrambler> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_from_low_bit() {
        assert_eq!(KeyParity::from_scrambling_control(0b10), KeyParity::Even);
        assert_eq!(KeyParity::from_scrambling_control(0b11), KeyParity::Odd);
    }
}
