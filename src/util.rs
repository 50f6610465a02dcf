//! # MQTT Serialization Utilities
//!
//! Helpers for reading and writing MQTT primitive types: variable-byte
//! integers and length-prefixed UTF-8 strings.

use crate::error::PacketError;

/// Largest value a four-byte variable-byte integer can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Result of scanning a variable-byte integer that may not be fully buffered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarInt {
    /// The integer is complete: its value and how many bytes it used.
    Complete { value: usize, len: usize },
    /// More bytes are needed before the integer can be read.
    Incomplete,
}

/// Scans a variable-byte integer at the start of `buf` without requiring it
/// to be complete.
pub fn scan_variable_byte_integer(buf: &[u8]) -> Result<VarInt, PacketError> {
    let mut multiplier = 1;
    let mut value = 0;
    for (i, byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(PacketError::MalformedPacket);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(VarInt::Complete { value, len: i + 1 });
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(PacketError::MalformedPacket);
    }
    Ok(VarInt::Incomplete)
}

/// Reads a variable-byte integer from the buffer, advancing the cursor.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, PacketError> {
    let rest = buf.get(*cursor..).ok_or(PacketError::MalformedPacket)?;
    match scan_variable_byte_integer(rest)? {
        VarInt::Complete { value, len } => {
            *cursor += len;
            Ok(value)
        }
        VarInt::Incomplete => Err(PacketError::MalformedPacket),
    }
}

/// Writes a variable-byte integer at the start of `buf`, returning the byte count.
pub fn write_variable_byte_integer(buf: &mut [u8], mut val: usize) -> Result<usize, PacketError> {
    if val > MAX_REMAINING_LENGTH {
        return Err(PacketError::PayloadTooLarge);
    }
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 0x80;
        }
        *buf.get_mut(i).ok_or(PacketError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            return Ok(i);
        }
    }
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, PacketError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(PacketError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, PacketError> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(PacketError::MalformedPacket)?;
    let s = core::str::from_utf8(bytes).map_err(|_| PacketError::InvalidUtf8String)?;
    *cursor += len;
    Ok(s)
}

/// Writes length-prefixed bytes at the start of `buf`, returning the byte count.
pub fn write_binary(buf: &mut [u8], data: &[u8]) -> Result<usize, PacketError> {
    let len = u16::try_from(data.len()).map_err(|_| PacketError::PayloadTooLarge)?;
    let required_space = 2 + data.len();
    let slice = buf
        .get_mut(0..required_space)
        .ok_or(PacketError::BufferTooSmall)?;
    slice[0..2].copy_from_slice(&len.to_be_bytes());
    slice[2..].copy_from_slice(data);
    Ok(required_space)
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) at the start of `buf`.
pub fn write_utf8_string(buf: &mut [u8], s: &str) -> Result<usize, PacketError> {
    write_binary(buf, s.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_byte_integer_boundaries() {
        let mut buf = [0u8; 4];
        assert_eq!(write_variable_byte_integer(&mut buf, 127), Ok(1));
        assert_eq!(buf[0], 0x7F);

        assert_eq!(write_variable_byte_integer(&mut buf, 128), Ok(2));
        assert_eq!(&buf[..2], &[0x80, 0x01]);

        assert_eq!(write_variable_byte_integer(&mut buf, 16_383), Ok(2));
        assert_eq!(&buf[..2], &[0xFF, 0x7F]);

        let mut cursor = 0;
        assert_eq!(read_variable_byte_integer(&mut cursor, &[0xFF, 0x7F]), Ok(16_383));
        assert_eq!(cursor, 2);
    }

    #[test]
    fn scan_reports_incomplete_and_malformed() {
        assert_eq!(scan_variable_byte_integer(&[]), Ok(VarInt::Incomplete));
        assert_eq!(scan_variable_byte_integer(&[0x80]), Ok(VarInt::Incomplete));
        assert_eq!(
            scan_variable_byte_integer(&[0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(PacketError::MalformedPacket)
        );
        assert_eq!(
            scan_variable_byte_integer(&[0x05, 0xAA]),
            Ok(VarInt::Complete { value: 5, len: 1 })
        );
    }

    #[test]
    fn write_rejects_oversized_length() {
        let mut buf = [0u8; 8];
        assert_eq!(
            write_variable_byte_integer(&mut buf, MAX_REMAINING_LENGTH + 1),
            Err(PacketError::PayloadTooLarge)
        );
    }

    #[test]
    fn utf8_string_reads_back() {
        let mut buf = [0u8; 16];
        let n = write_utf8_string(&mut buf, "MQTT").unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);

        let mut cursor = 0;
        assert_eq!(read_utf8_string(&mut cursor, &buf[..n]), Ok("MQTT"));
        assert_eq!(cursor, n);
    }

    #[test]
    fn truncated_string_is_malformed() {
        let mut cursor = 0;
        assert_eq!(
            read_utf8_string(&mut cursor, &[0x00, 0x05, b'a']),
            Err(PacketError::MalformedPacket)
        );
    }

    #[test]
    fn string_into_short_buffer_fails() {
        let mut buf = [0u8; 3];
        assert_eq!(
            write_utf8_string(&mut buf, "abcd"),
            Err(PacketError::BufferTooSmall)
        );
    }
}
