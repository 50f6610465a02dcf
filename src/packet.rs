//! # MQTT Packet Structures and Serialization
//!
//! The subset of MQTT 3.1.1 control packets a publishing device needs, with
//! the traits for encoding them into and decoding them from a byte buffer.
//! Every access is bounds-checked; a short buffer is an error, never a panic.

use crate::error::PacketError;
use crate::util::{self, VarInt, read_u16, read_utf8_string, write_binary, write_utf8_string};
use heapless::Vec;

/// Bytes reserved ahead of the variable header while encoding: one for the
/// fixed header byte and up to four for the remaining length.
const HEADER_RESERVE: usize = 5;

/// Protocol level byte for MQTT 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

pub const CONNECT: u8 = 1;
pub const CONNACK: u8 = 2;
pub const PUBLISH: u8 = 3;
pub const PUBACK: u8 = 4;
pub const SUBSCRIBE: u8 = 8;
pub const SUBACK: u8 = 9;
pub const PINGREQ: u8 = 12;
pub const PINGRESP: u8 = 13;
pub const DISCONNECT: u8 = 14;

/// Return code a broker puts in a SUBACK for a rejected filter.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(PacketError::MalformedPacket),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Encodes the packet at the start of `buf`, returning its length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError>;
}

/// A trait for packets that can be decoded from a byte buffer holding exactly one packet.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError>;
}

/// The packets a client can receive from the broker.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    SubAck(SubAck),
    PingResp,
    /// Any other well-formed packet; carries its type nibble.
    Other(u8),
}

/// Returns the packet type nibble of a buffered packet.
pub fn packet_type(buf: &[u8]) -> Result<u8, PacketError> {
    buf.first()
        .map(|b| b >> 4)
        .ok_or(PacketError::MalformedPacket)
}

/// Total length of the packet at the start of `buf` once its fixed header is
/// buffered, whether or not the rest of the packet has arrived yet.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, PacketError> {
    let Some(rest) = buf.get(1..) else {
        return Ok(None);
    };
    match util::scan_variable_byte_integer(rest)? {
        VarInt::Complete { value, len } => Ok(Some(1 + len + value)),
        VarInt::Incomplete => Ok(None),
    }
}

/// Decodes one complete packet received from the broker.
pub fn decode(buf: &[u8]) -> Result<MqttPacket<'_>, PacketError> {
    let packet = match packet_type(buf)? {
        CONNACK => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        PUBLISH => MqttPacket::Publish(Publish::decode(buf)?),
        SUBACK => MqttPacket::SubAck(SubAck::decode(buf)?),
        PINGRESP => MqttPacket::PingResp,
        t @ (PUBACK | 5..=7 | 11) => MqttPacket::Other(t),
        t => return Err(PacketError::InvalidPacketType(t)),
    };
    Ok(packet)
}

/// Copies `bytes` into `buf` at the cursor, advancing it.
fn put(buf: &mut [u8], cursor: &mut usize, bytes: &[u8]) -> Result<(), PacketError> {
    let end = *cursor + bytes.len();
    buf.get_mut(*cursor..end)
        .ok_or(PacketError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor = end;
    Ok(())
}

/// Writes a length-prefixed string into `buf` at the cursor, advancing it.
fn put_str(buf: &mut [u8], cursor: &mut usize, s: &str) -> Result<(), PacketError> {
    let rest = buf.get_mut(*cursor..).ok_or(PacketError::BufferTooSmall)?;
    *cursor += write_utf8_string(rest, s)?;
    Ok(())
}

/// Writes the fixed header in front of a body that was encoded at
/// `HEADER_RESERVE..end`, then compacts the packet to the start of `buf`.
fn frame(buf: &mut [u8], header: u8, end: usize) -> Result<usize, PacketError> {
    let remaining = end - HEADER_RESERVE;
    let mut len_bytes = [0u8; 4];
    let n = util::write_variable_byte_integer(&mut len_bytes, remaining)?;
    buf[0] = header;
    buf[1..1 + n].copy_from_slice(&len_bytes[..n]);
    buf.copy_within(HEADER_RESERVE..end, 1 + n);
    Ok(1 + n + remaining)
}

fn check_reserve(buf: &[u8]) -> Result<(), PacketError> {
    if buf.len() < HEADER_RESERVE {
        return Err(PacketError::BufferTooSmall);
    }
    Ok(())
}

/// Splits a received packet into its fixed header byte and its body.
fn body(buf: &[u8]) -> Result<(u8, &[u8]), PacketError> {
    let header = *buf.first().ok_or(PacketError::MalformedPacket)?;
    let mut cursor = 1;
    let remaining = util::read_variable_byte_integer(&mut cursor, buf)?;
    let body = buf
        .get(cursor..cursor + remaining)
        .ok_or(PacketError::MalformedPacket)?;
    Ok((header, body))
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            clean_session,
            keep_alive,
            client_id,
            username: None,
            password: None,
        }
    }

    /// Sets the login credentials. MQTT 3.1.1 only allows a password
    /// together with a username.
    pub fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        check_reserve(buf)?;
        let mut cursor = HEADER_RESERVE;
        put_str(buf, &mut cursor, "MQTT")?;

        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.username.is_some() {
            flags |= 0x80;
            if self.password.is_some() {
                flags |= 0x40;
            }
        }
        put(buf, &mut cursor, &[PROTOCOL_LEVEL, flags])?;
        put(buf, &mut cursor, &self.keep_alive.to_be_bytes())?;

        put_str(buf, &mut cursor, self.client_id)?;
        if let Some(username) = self.username {
            put_str(buf, &mut cursor, username)?;
            if let Some(password) = self.password {
                let rest = buf.get_mut(cursor..).ok_or(PacketError::BufferTooSmall)?;
                cursor += write_binary(rest, password)?;
            }
        }
        frame(buf, CONNECT << 4, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl<'a> DecodePacket<'a> for ConnAck {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let (_, body) = body(buf)?;
        match body {
            [flags, return_code, ..] => Ok(Self {
                session_present: flags & 0x01 != 0,
                return_code: *return_code,
            }),
            _ => Err(PacketError::MalformedPacket),
        }
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> Publish<'a> {
    /// A fire-and-forget publish.
    pub fn at_most_once(topic: &'a str, payload: &'a [u8], retain: bool) -> Self {
        Self {
            topic,
            qos: QoS::AtMostOnce,
            retain,
            payload,
            packet_id: None,
        }
    }
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let (header, body) = body(buf)?;
        let retain = header & 0x01 != 0;
        let qos = QoS::try_from((header >> 1) & 0x03)?;

        let mut cursor = 0;
        let topic = read_utf8_string(&mut cursor, body)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, body)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            retain,
            payload: &body[cursor..],
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        check_reserve(buf)?;
        let mut cursor = HEADER_RESERVE;
        put_str(buf, &mut cursor, self.topic)?;

        if self.qos != QoS::AtMostOnce {
            let id = self.packet_id.ok_or(PacketError::MalformedPacket)?;
            put(buf, &mut cursor, &id.to_be_bytes())?;
        }
        put(buf, &mut cursor, self.payload)?;

        let mut header = (PUBLISH << 4) | ((self.qos as u8) << 1);
        if self.retain {
            header |= 0x01;
        }
        frame(buf, header, cursor)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), 4>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic filter.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        check_reserve(buf)?;
        let mut cursor = HEADER_RESERVE;
        put(buf, &mut cursor, &self.packet_id.to_be_bytes())?;
        for (topic, qos) in &self.topics {
            put_str(buf, &mut cursor, topic)?;
            put(buf, &mut cursor, &[*qos as u8])?;
        }
        // SUBSCRIBE carries the mandatory reserved flags 0b0010.
        frame(buf, (SUBSCRIBE << 4) | 0x02, cursor)
    }
}

// --- SUBACK Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, 4>,
}

impl SubAck {
    /// True when the broker rejected any of the requested filters.
    pub fn rejected(&self) -> bool {
        self.return_codes.contains(&SUBACK_FAILURE)
    }
}

impl<'a> DecodePacket<'a> for SubAck {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let (_, body) = body(buf)?;
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;
        let mut return_codes = Vec::new();
        for code in &body[cursor..] {
            return_codes
                .push(*code)
                .map_err(|_| PacketError::BufferTooSmall)?;
        }
        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = 0;
        put(buf, &mut cursor, &[PINGREQ << 4, 0x00])?;
        Ok(cursor)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = 0;
        put(buf, &mut cursor, &[DISCONNECT << 4, 0x00])?;
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_with_credentials() {
        let mut buf = [0u8; 64];
        let packet = Connect::new("dev", 60, true).with_credentials("u", b"pw");
        let n = packet.encode(&mut buf).unwrap();

        let expected: &[u8] = &[
            0x10, 22, // fixed header
            0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
            0x04, // level
            0xC2, // username | password | clean session
            0x00, 0x3C, // keep alive
            0x00, 0x03, b'd', b'e', b'v', // client id
            0x00, 0x01, b'u', // username
            0x00, 0x02, b'p', b'w', // password
        ];
        assert_eq!(&buf[..n], expected);
    }

    #[test]
    fn connect_without_credentials_sets_only_clean_flag() {
        let mut buf = [0u8; 32];
        let n = Connect::new("d", 0, true).encode(&mut buf).unwrap();
        assert_eq!(buf[9], 0x02);
        assert_eq!(n, 15);
    }

    #[test]
    fn connack_decodes_return_code() {
        let ack = ConnAck::decode(&[0x20, 0x02, 0x01, 0x05]).unwrap();
        assert!(ack.session_present);
        assert_eq!(ack.return_code, 5);

        assert_eq!(
            ConnAck::decode(&[0x20, 0x01, 0x00]),
            Err(PacketError::MalformedPacket)
        );
    }

    #[test]
    fn publish_encode_then_decode() {
        let mut buf = [0u8; 64];
        let publish = Publish::at_most_once("a/b", b"21.5", true);
        let n = publish.encode(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0x31, 9]);

        let decoded = Publish::decode(&buf[..n]).unwrap();
        assert_eq!(decoded, publish);
    }

    #[test]
    fn publish_payload_stops_at_remaining_length() {
        // A second packet coalesced behind the first must not leak into the payload.
        let buf = [0x30, 0x05, 0x00, 0x01, b't', b'x', b'y', 0xD0, 0x00];
        let decoded = Publish::decode(&buf).unwrap();
        assert_eq!(decoded.topic, "t");
        assert_eq!(decoded.payload, b"xy");
    }

    #[test]
    fn qos1_publish_carries_packet_id() {
        let buf = [0x32, 0x06, 0x00, 0x01, b't', 0x00, 0x07, b'v'];
        let decoded = Publish::decode(&buf).unwrap();
        assert_eq!(decoded.qos, QoS::AtLeastOnce);
        assert_eq!(decoded.packet_id, Some(7));
        assert_eq!(decoded.payload, b"v");
    }

    #[test]
    fn publish_into_small_buffer_fails() {
        let mut buf = [0u8; 8];
        let publish = Publish::at_most_once("topic", b"payload", false);
        assert_eq!(publish.encode(&mut buf), Err(PacketError::BufferTooSmall));
    }

    #[test]
    fn subscribe_sets_reserved_flags() {
        let mut buf = [0u8; 32];
        let n = Subscribe::new(1, "a/+", QoS::AtMostOnce)
            .encode(&mut buf)
            .unwrap();
        assert_eq!(
            &buf[..n],
            &[0x82, 8, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'+', 0x00]
        );
    }

    #[test]
    fn suback_reports_rejection() {
        let ack = SubAck::decode(&[0x90, 0x03, 0x00, 0x02, 0x80]).unwrap();
        assert_eq!(ack.packet_id, 2);
        assert!(ack.rejected());

        let ack = SubAck::decode(&[0x90, 0x03, 0x00, 0x02, 0x00]).unwrap();
        assert!(!ack.rejected());
    }

    #[test]
    fn decode_dispatches_on_type() {
        assert!(matches!(decode(&[0xD0, 0x00]), Ok(MqttPacket::PingResp)));
        assert!(matches!(
            decode(&[0x40, 0x02, 0x00, 0x01]),
            Ok(MqttPacket::Other(PUBACK))
        ));
        assert_eq!(
            decode(&[0x10, 0x00]).err(),
            Some(PacketError::InvalidPacketType(CONNECT))
        );
    }

    #[test]
    fn frame_len_needs_fixed_header() {
        assert_eq!(frame_len(&[]), Ok(None));
        assert_eq!(frame_len(&[0x30]), Ok(None));
        assert_eq!(frame_len(&[0x30, 0x80]), Ok(None));
        assert_eq!(frame_len(&[0x30, 0x80, 0x01]), Ok(Some(131)));
        assert_eq!(frame_len(&[0xD0, 0x00, 0x20]), Ok(Some(2)));
    }

    #[test]
    fn fixed_two_byte_packets() {
        let mut buf = [0u8; 2];
        assert_eq!(PingReq.encode(&mut buf), Ok(2));
        assert_eq!(buf, [0xC0, 0x00]);
        assert_eq!(Disconnect.encode(&mut buf), Ok(2));
        assert_eq!(buf, [0xE0, 0x00]);
    }
}
