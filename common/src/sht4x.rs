//! SHT4x command set and response decoding.
//!
//! Every response is a sequence of 16-bit big-endian words, each followed by
//! a CRC-8 byte (polynomial 0x31, init 0xFF).

use crate::error::ClimateError;

pub const DEFAULT_ADDRESS: u8 = 0x44;

pub const CMD_SOFT_RESET: u8 = 0x94;
pub const CMD_READ_SERIAL: u8 = 0x89;
pub const CMD_MEASURE_HIGH_PRECISION: u8 = 0xFD;

pub const SOFT_RESET_DELAY_MS: u32 = 1;
pub const SERIAL_DELAY_MS: u32 = 1;
pub const HIGH_PRECISION_DELAY_MS: u32 = 10;

pub const FRAME_LEN: usize = 6;

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn words(frame: &[u8; FRAME_LEN]) -> Result<[u16; 2], ClimateError> {
    let mut out = [0u16; 2];
    for (index, chunk) in frame.chunks_exact(3).enumerate() {
        let expected = crc8(&chunk[..2]);
        if chunk[2] != expected {
            return Err(ClimateError::SensorRead(format!(
                "SHT4x CRC mismatch in word {index}: got {:#04x}, expected {expected:#04x}",
                chunk[2]
            )));
        }
        out[index] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Ok(out)
}

/// Values are returned as computed; humidity may fall slightly outside
/// 0..100 near the extremes.
pub fn decode_measurement(frame: &[u8; FRAME_LEN]) -> Result<(f32, f32), ClimateError> {
    let [raw_t, raw_rh] = words(frame)?;
    let temperature = -45.0 + 175.0 * f32::from(raw_t) / 65535.0;
    let humidity = -6.0 + 125.0 * f32::from(raw_rh) / 65535.0;
    Ok((temperature, humidity))
}

pub fn decode_serial(frame: &[u8; FRAME_LEN]) -> Result<u32, ClimateError> {
    let [high, low] = words(frame)?;
    Ok((u32::from(high) << 16) | u32::from(low))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(first: u16, second: u16) -> [u8; FRAME_LEN] {
        let [a, b] = first.to_be_bytes();
        let [c, d] = second.to_be_bytes();
        [a, b, crc8(&[a, b]), c, d, crc8(&[c, d])]
    }

    #[test]
    fn crc_matches_datasheet_vector() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn converts_raw_words() {
        let (temperature, humidity) = decode_measurement(&frame(0x6666, 0x8000)).unwrap();

        assert!((temperature - 25.0).abs() < 0.01, "temperature {temperature}");
        assert!((humidity - 56.5).abs() < 0.01, "humidity {humidity}");
    }

    #[test]
    fn extremes_are_not_clamped() {
        let (temperature, humidity) = decode_measurement(&frame(0, 0)).unwrap();
        assert_eq!(temperature, -45.0);
        assert_eq!(humidity, -6.0);

        let (temperature, humidity) = decode_measurement(&frame(0xFFFF, 0xFFFF)).unwrap();
        assert_eq!(temperature, 130.0);
        assert_eq!(humidity, 119.0);
    }

    #[test]
    fn rejects_corrupted_word() {
        let mut bytes = frame(0x6666, 0x8000);
        bytes[4] ^= 0x01;

        assert!(matches!(
            decode_measurement(&bytes),
            Err(ClimateError::SensorRead(_))
        ));
    }

    #[test]
    fn serial_joins_both_words() {
        assert_eq!(decode_serial(&frame(0x1234, 0xABCD)).unwrap(), 0x1234_ABCD);
    }
}
