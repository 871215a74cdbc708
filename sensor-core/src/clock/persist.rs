//! Sync statistics record kept in the RTC's battery-backed RAM.
//!
//! Layout (big endian), 12 bytes at RAM offset 0:
//!
//! | bytes | field                      |
//! |-------|----------------------------|
//! | 0..2  | magic `A5 5A`              |
//! | 2..4  | sync attempts (u16)        |
//! | 4..6  | successful syncs (u16)     |
//! | 6..10 | accumulated drift s (i32)  |
//! | 10..12| reserved, zero             |

/// Marker distinguishing a written record from uninitialised RAM.
pub const SYNC_RECORD_MAGIC: [u8; 2] = [0xA5, 0x5A];
/// Encoded record length.
pub const SYNC_RECORD_LEN: usize = 12;
/// Offset of the record inside the battery-backed RAM window.
pub const SYNC_RECORD_OFFSET: u8 = 0;

/// Counters that survive power loss.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncRecord {
    pub attempts: u16,
    pub successes: u16,
    pub total_drift_seconds: i32,
}

impl SyncRecord {
    pub const ZERO: Self = Self {
        attempts: 0,
        successes: 0,
        total_drift_seconds: 0,
    };

    #[must_use]
    pub const fn failures(&self) -> u16 {
        self.attempts.saturating_sub(self.successes)
    }

    #[must_use]
    pub fn encode(&self) -> [u8; SYNC_RECORD_LEN] {
        let mut bytes = [0_u8; SYNC_RECORD_LEN];
        bytes[0..2].copy_from_slice(&SYNC_RECORD_MAGIC);
        bytes[2..4].copy_from_slice(&self.attempts.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.successes.to_be_bytes());
        bytes[6..10].copy_from_slice(&self.total_drift_seconds.to_be_bytes());
        bytes
    }

    /// Decodes a stored record. Returns `None` for a wrong magic number or
    /// counters that break `successes <= attempts`.
    #[must_use]
    pub fn decode(bytes: &[u8; SYNC_RECORD_LEN]) -> Option<Self> {
        if bytes[0..2] != SYNC_RECORD_MAGIC {
            return None;
        }
        let attempts = u16::from_be_bytes([bytes[2], bytes[3]]);
        let successes = u16::from_be_bytes([bytes[4], bytes[5]]);
        let total_drift_seconds = i32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        if successes > attempts {
            return None;
        }
        Some(Self {
            attempts,
            successes,
            total_drift_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_deployed_devices() {
        let record = SyncRecord {
            attempts: 0x0102,
            successes: 0x0101,
            total_drift_seconds: -2,
        };
        assert_eq!(
            record.encode(),
            [0xA5, 0x5A, 0x01, 0x02, 0x01, 0x01, 0xFF, 0xFF, 0xFF, 0xFE, 0x00, 0x00]
        );
        assert_eq!(SyncRecord::decode(&record.encode()), Some(record));
    }

    #[test]
    fn wrong_magic_or_inverted_counters_are_rejected() {
        let mut bytes = SyncRecord {
            attempts: 3,
            successes: 2,
            total_drift_seconds: 9,
        }
        .encode();
        bytes[1] = 0x00;
        assert_eq!(SyncRecord::decode(&bytes), None);

        let inverted = SyncRecord {
            attempts: 1,
            successes: 2,
            total_drift_seconds: 0,
        }
        .encode();
        assert_eq!(SyncRecord::decode(&inverted), None);

        assert_eq!(SyncRecord::decode(&[0xFF; SYNC_RECORD_LEN]), None);
    }
}
