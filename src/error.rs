//! # Error Types
//!
//! Errors are layered the same way the crate is: wire-level packet errors,
//! the transport-generic MQTT link error, codec errors for the Cayenne
//! topic/payload grammar, and the session error the application sees.

use core::fmt;

/// Errors produced while encoding or decoding a single MQTT packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// The packet type nibble is not one this client understands.
    InvalidPacketType(u8),
    /// The packet ended early or its length fields are inconsistent.
    MalformedPacket,
    /// A length-prefixed string was not valid UTF-8.
    InvalidUtf8String,
    /// A string or payload does not fit the MQTT length fields.
    PayloadTooLarge,
    /// The output buffer is too small for the encoded packet.
    BufferTooSmall,
}

/// The primary error enum for the MQTT link.
///
/// It is generic over the transport error type `T` so the `?` operator works
/// directly on `Result`s returned by the transport.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A packet could not be encoded or a received packet was malformed.
    Packet(PacketError),
    /// The broker answered with something other than what the exchange expects.
    UnexpectedPacket(u8),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// The client is not currently connected to the broker.
    NotConnected,
    /// The broker did not answer in time.
    Timeout,
}

impl<T> From<T> for MqttError<T> {
    fn from(err: T) -> Self {
        MqttError::Transport(err)
    }
}

impl<T: fmt::Debug> fmt::Display for MqttError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttError::Transport(e) => write!(f, "transport error: {e:?}"),
            MqttError::Packet(e) => write!(f, "packet error: {e:?}"),
            MqttError::UnexpectedPacket(t) => write!(f, "unexpected packet type {t}"),
            MqttError::ConnectionRefused(code) => write!(f, "connection refused: {code:?}"),
            MqttError::NotConnected => f.write_str("not connected"),
            MqttError::Timeout => f.write_str("timed out waiting for broker"),
        }
    }
}

/// Represents the return codes of a `CONNACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A code outside the MQTT 3.1.1 range.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// An outbound topic or payload did not fit its fixed-capacity buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    Overflow,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("encoded topic or payload exceeds buffer capacity")
    }
}

/// Why an inbound command could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MalformedMessage {
    /// The topic has fewer than six `/`-separated levels.
    TooFewSegments(usize),
    /// The channel level is not a non-negative integer.
    InvalidChannel,
    /// The payload has no `,` between message id and value.
    MissingSeparator,
    /// Topic or payload bytes are not UTF-8.
    InvalidUtf8,
    /// Topic or payload exceed the session's inbound buffers.
    TooLong,
}

impl fmt::Display for MalformedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedMessage::TooFewSegments(n) => {
                write!(f, "topic has {n} levels, expected at least 6")
            }
            MalformedMessage::InvalidChannel => f.write_str("channel is not an integer"),
            MalformedMessage::MissingSeparator => f.write_str("payload has no ',' separator"),
            MalformedMessage::InvalidUtf8 => f.write_str("message is not valid UTF-8"),
            MalformedMessage::TooLong => f.write_str("message exceeds inbound buffer"),
        }
    }
}

/// Errors surfaced by [`Session`](crate::session::Session) operations.
///
/// `E` is the broker's error type.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError<E> {
    /// `begin` could not connect; the session stays disconnected.
    Connection(E),
    /// A subscribe, publish or poll failed on an established link.
    Transport(E),
    /// A topic or payload did not fit its buffer.
    Encode(EncodeError),
}

impl<E> From<EncodeError> for SessionError<E> {
    fn from(err: EncodeError) -> Self {
        SessionError::Encode(err)
    }
}

impl<E: fmt::Debug> fmt::Display for SessionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connection(e) => write!(f, "connection error: {e:?}"),
            SessionError::Transport(e) => write!(f, "transport error: {e:?}"),
            SessionError::Encode(e) => write!(f, "{e}"),
        }
    }
}
