//! Heart-rate GATT profile: UUIDs and the measurement decoder.
//!
//! Measurement layout (characteristic 0x2A37):
//! byte 0 is a flags field; bit 0 clear means the value is a single byte at
//! offset 1, bit 0 set means a little-endian u16 at offsets 1..3.

use uuid::Uuid;

/// Heart Rate service (0x180D).
pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

/// Heart Rate Measurement characteristic (0x2A37).
pub const HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

const FLAG_VALUE_U16: u8 = 0x01;

/// Errors from decoding a measurement payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload shorter than the selected value format requires
    TooShort { expected: usize, actual: usize },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::TooShort { expected, actual } => write!(
                f,
                "Heart-rate payload too short: need {expected} bytes, got {actual}"
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode the heart-rate value (BPM) from a measurement notification.
pub fn decode_measurement(payload: &[u8]) -> Result<u16, DecodeError> {
    let Some(&flags) = payload.first() else {
        return Err(DecodeError::TooShort {
            expected: 2,
            actual: 0,
        });
    };

    if flags & FLAG_VALUE_U16 != 0 {
        match payload.get(1..3) {
            Some(&[lo, hi]) => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(DecodeError::TooShort {
                expected: 3,
                actual: payload.len(),
            }),
        }
    } else {
        payload
            .get(1)
            .map(|&v| u16::from(v))
            .ok_or(DecodeError::TooShort {
                expected: 2,
                actual: payload.len(),
            })
    }
}

/// Encode a measurement payload in the same layout. Used by the simulator.
pub fn encode_measurement(bpm: u16) -> Vec<u8> {
    match u8::try_from(bpm) {
        Ok(v) => vec![0x00, v],
        Err(_) => {
            let [lo, hi] = bpm.to_le_bytes();
            vec![FLAG_VALUE_U16, lo, hi]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_expand_short_forms() {
        assert_eq!(
            HEART_RATE_SERVICE.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_decode_8bit_for_every_value_and_flag_combination() {
        for flags in (0u8..=255).filter(|f| f & 0x01 == 0).step_by(7) {
            for v in 0u8..=255 {
                assert_eq!(decode_measurement(&[flags, v]), Ok(u16::from(v)));
            }
        }
    }

    #[test]
    fn test_decode_16bit_little_endian() {
        for flags in [0x01u8, 0x11, 0xFF] {
            for (lo, hi) in [(0u8, 0u8), (0x48, 0x00), (0x2C, 0x01), (0xFF, 0xFF)] {
                let expected = u16::from(lo) | (u16::from(hi) << 8);
                assert_eq!(decode_measurement(&[flags, lo, hi]), Ok(expected));
            }
        }
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        // RR intervals and energy fields may follow the value.
        assert_eq!(decode_measurement(&[0x10, 72, 0x20, 0x03]), Ok(72));
    }

    #[test]
    fn test_undersized_payloads_are_rejected() {
        assert_eq!(
            decode_measurement(&[]),
            Err(DecodeError::TooShort { expected: 2, actual: 0 })
        );
        assert_eq!(
            decode_measurement(&[0x00]),
            Err(DecodeError::TooShort { expected: 2, actual: 1 })
        );
        assert_eq!(
            decode_measurement(&[0x01, 0x48]),
            Err(DecodeError::TooShort { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn test_encode_matches_decode() {
        assert_eq!(encode_measurement(72), vec![0x00, 72]);
        assert_eq!(decode_measurement(&encode_measurement(300)), Ok(300));
    }
}
