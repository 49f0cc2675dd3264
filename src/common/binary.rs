//! Binary data helpers shared by the compound file engine.
//!
//! This module provides little-endian integer access over byte slices,
//! UTF-16LE name coding, and the Windows FILETIME encoding used by
//! directory entry timestamps.

use chrono::{DateTime, Utc};
use zerocopy::{FromBytes, LE, U16, U32, U64};

/// Binary parsing error type
#[derive(Debug, Clone)]
pub enum BinaryError {
    /// Not enough data to read or write the requested type
    InsufficientData { expected: usize, available: usize },
    /// Failed to parse the data
    ParseError(String),
}

impl std::fmt::Display for BinaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryError::InsufficientData {
                expected,
                available,
            } => {
                write!(
                    f,
                    "Insufficient data: expected {}, got {}",
                    expected, available
                )
            },
            BinaryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for BinaryError {}

/// Result type for binary operations
pub type BinaryResult<T> = Result<T, BinaryError>;

/// Number of 100ns intervals between 1601-01-01 and the Unix epoch.
pub const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

#[inline]
fn check_bounds(data: &[u8], offset: usize, width: usize) -> BinaryResult<()> {
    if offset + width > data.len() {
        return Err(BinaryError::InsufficientData {
            expected: offset + width,
            available: data.len(),
        });
    }
    Ok(())
}

/// Read a little-endian u16 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use flacfb::common::binary::read_u16_le;
/// let data = [0x34, 0x12, 0x78, 0x56];
/// assert_eq!(read_u16_le(&data, 0).unwrap(), 0x1234);
/// assert_eq!(read_u16_le(&data, 2).unwrap(), 0x5678);
/// ```
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> BinaryResult<u16> {
    check_bounds(data, offset, 2)?;
    U16::<LE>::read_from_bytes(&data[offset..offset + 2])
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u16".to_string()))
}

/// Read a little-endian u32 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use flacfb::common::binary::read_u32_le;
/// let data = [0x78, 0x56, 0x34, 0x12];
/// assert_eq!(read_u32_le(&data, 0).unwrap(), 0x12345678);
/// ```
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> BinaryResult<u32> {
    check_bounds(data, offset, 4)?;
    U32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u32".to_string()))
}

/// Read a little-endian u64 from a byte slice at the given offset.
#[inline]
pub fn read_u64_le(data: &[u8], offset: usize) -> BinaryResult<u64> {
    check_bounds(data, offset, 8)?;
    U64::<LE>::read_from_bytes(&data[offset..offset + 8])
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u64".to_string()))
}

/// Write a little-endian u16 into a byte slice at the given offset.
#[inline]
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) -> BinaryResult<()> {
    check_bounds(data, offset, 2)?;
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Write a little-endian u32 into a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use flacfb::common::binary::{read_u32_le, write_u32_le};
/// let mut data = [0u8; 8];
/// write_u32_le(&mut data, 4, 0xFFFF_FFFE).unwrap();
/// assert_eq!(read_u32_le(&data, 4).unwrap(), 0xFFFF_FFFE);
/// ```
#[inline]
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) -> BinaryResult<()> {
    check_bounds(data, offset, 4)?;
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Write a little-endian u64 into a byte slice at the given offset.
#[inline]
pub fn write_u64_le(data: &mut [u8], offset: usize, value: u64) -> BinaryResult<()> {
    check_bounds(data, offset, 8)?;
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Decode UTF-16LE bytes to a String, dropping trailing NULs.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    // Decode UTF-16 to String, replacing invalid sequences
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// Encode a string as UTF-16LE bytes (no terminator).
pub fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Convert a FILETIME (100ns ticks since 1601-01-01 UTC) to a timestamp.
///
/// Zero is the "no time recorded" value and maps to `None`.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = i64::try_from(filetime).ok()? - FILETIME_UNIX_EPOCH;
    let secs = ticks.div_euclid(10_000_000);
    let nanos = (ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Convert a timestamp to a FILETIME value. `None` encodes as zero.
pub fn datetime_to_filetime(time: Option<DateTime<Utc>>) -> u64 {
    let Some(time) = time else {
        return 0;
    };
    let ticks = time.timestamp() * 10_000_000
        + i64::from(time.timestamp_subsec_nanos() / 100)
        + FILETIME_UNIX_EPOCH;
    u64::try_from(ticks).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_read_past_end() {
        let data = [0u8; 3];
        assert!(matches!(
            read_u32_le(&data, 0),
            Err(BinaryError::InsufficientData {
                expected: 4,
                available: 3
            })
        ));
        assert!(write_u16_le(&mut [0u8; 1], 0, 1).is_err());
    }

    #[test]
    fn test_u64_layout() {
        let mut data = [0u8; 10];
        write_u64_le(&mut data, 2, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(&data[2..10], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(read_u64_le(&data, 2).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_utf16_names() {
        let bytes = encode_utf16le("Root Entry");
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[0..2], &[b'R', 0]);

        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode_utf16le(&padded), "Root Entry");
    }

    #[test]
    fn test_filetime_epoch() {
        let unix_epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            datetime_to_filetime(Some(unix_epoch)),
            FILETIME_UNIX_EPOCH as u64
        );
        assert_eq!(
            filetime_to_datetime(FILETIME_UNIX_EPOCH as u64),
            Some(unix_epoch)
        );
    }

    #[test]
    fn test_filetime_null() {
        assert_eq!(filetime_to_datetime(0), None);
        assert_eq!(datetime_to_filetime(None), 0);
    }

    #[test]
    fn test_filetime_keeps_ticks() {
        let time = Utc.with_ymd_and_hms(2009, 6, 15, 13, 45, 30).unwrap()
            + chrono::Duration::nanoseconds(1_234_500);
        let filetime = datetime_to_filetime(Some(time));
        assert_eq!(filetime_to_datetime(filetime), Some(time));
    }
}
