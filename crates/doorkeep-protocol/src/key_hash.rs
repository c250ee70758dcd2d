use std::fmt;
use std::str::FromStr;

use doorkeep_core::KeyRecord;

use crate::crc::crc16_xmodem_update;
use crate::error::ProtocolError;

/// Digest of a controller's key list, as reported in an `H0` response.
///
/// CRC16/XMODEM chained over every key record in order, each followed by a
/// NUL byte. Reordering the list changes the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyHash(u16);

impl KeyHash {
    #[must_use]
    pub fn of(keys: &[KeyRecord]) -> Self {
        let crc = keys.iter().fold(0u16, |crc, key| {
            let crc = crc16_xmodem_update(crc, key.as_bytes());
            crc16_xmodem_update(crc, &[0])
        });
        KeyHash(crc)
    }

    #[must_use]
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl FromStr for KeyHash {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidKeyHash(s.to_string()));
        }
        u16::from_str_radix(s, 16)
            .map(KeyHash)
            .map_err(|_| ProtocolError::InvalidKeyHash(s.to_string()))
    }
}
