//! # Topic and Payload Codec
//!
//! Pure functions for the dashboard's MQTT convention:
//!
//! | Purpose          | Topic                      | Payload                        |
//! |------------------|----------------------------|--------------------------------|
//! | data (out)       | `{root}/data/{channel}`    | `{type},{unit}={value}` or `{value}` |
//! | command (in)     | `{root}/cmd/{channel}`     | `{msg_id},{value}`             |
//! | response (out)   | `{root}/response`          | `ok,{msg_id}` or `error,{msg_id}={message}` |
//!
//! where `root` is `v1/{username}/things/{client_id}`.
//!
//! Nothing is escaped. A value containing `,`, `=` or `/` produces a message
//! the broker side cannot split back apart, so callers must keep those
//! characters out of values.

use core::fmt::{Display, Write};

use heapless::String;

use crate::error::{EncodeError, MalformedMessage};
use crate::identity::FIELD_CAPACITY;
use crate::measure::Measure;

/// Capacity of the root topic: `v1/` + username + `/things/` + client id.
pub const ROOT_CAPACITY: usize = 3 + FIELD_CAPACITY + 8 + FIELD_CAPACITY;
/// Capacity of any full topic built from the root.
pub const TOPIC_CAPACITY: usize = ROOT_CAPACITY + 32;
/// Capacity of an outbound payload. Large enough to echo any command value
/// the session accepts, or to report an error for it.
pub const PAYLOAD_CAPACITY: usize = 384;

const DATA_TOPIC: &str = "data";
const COMMAND_TOPIC: &str = "cmd";
const RESPONSE_TOPIC: &str = "response";

/// A logical sensor or actuator endpoint on the device.
pub type Channel = u32;

/// Builds topics under one device's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: String<ROOT_CAPACITY>,
}

impl Topics {
    pub fn new(username: &str, client_id: &str) -> Result<Self, EncodeError> {
        let mut root = String::new();
        write!(root, "v1/{username}/things/{client_id}").map_err(|_| EncodeError::Overflow)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn build(&self, args: core::fmt::Arguments<'_>) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        let mut topic = String::new();
        write!(topic, "{}/{}", self.root, args).map_err(|_| EncodeError::Overflow)?;
        Ok(topic)
    }

    /// `{root}/data/{channel}`
    pub fn data(&self, channel: Channel) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        self.build(format_args!("{DATA_TOPIC}/{channel}"))
    }

    /// `{root}/cmd/+`, the filter the session subscribes to.
    pub fn command(&self) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        self.build(format_args!("{COMMAND_TOPIC}/+"))
    }

    /// `{root}/response`
    pub fn response(&self) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        self.build(format_args!("{RESPONSE_TOPIC}"))
    }

    /// `{root}/sys/{name}`, used for device metadata.
    pub fn sys(&self, name: &str) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        self.build(format_args!("sys/{name}"))
    }

    /// Whether `topic` matches `{root}/cmd/+`: the exact prefix followed by
    /// one non-empty level.
    pub fn is_command(&self, topic: &str) -> bool {
        let Some(rest) = topic
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_prefix(COMMAND_TOPIC))
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return false;
        };
        !rest.is_empty() && !rest.contains('/')
    }
}

/// A topic/payload pair ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String<TOPIC_CAPACITY>,
    pub payload: String<PAYLOAD_CAPACITY>,
}

/// A command received from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command<'a> {
    /// Client id level of the topic.
    pub client_id: &'a str,
    /// Topic class level, `cmd` for commands.
    pub topic: &'a str,
    pub channel: Channel,
    pub msg_id: &'a str,
    pub value: &'a str,
}

/// Encodes a data point for `channel`.
///
/// With a measure the payload is `{type},{unit}={value}`; without one the
/// value's text is the whole payload.
pub fn encode(
    topics: &Topics,
    channel: Channel,
    value: impl Display,
    measure: Option<Measure>,
) -> Result<Outbound, EncodeError> {
    let topic = topics.data(channel)?;
    let mut payload = String::new();
    let written = match measure {
        Some(Measure { data_type, unit }) => write!(payload, "{data_type},{unit}={value}"),
        None => write!(payload, "{value}"),
    };
    written.map_err(|_| EncodeError::Overflow)?;
    Ok(Outbound { topic, payload })
}

/// Encodes the acknowledgement for command `msg_id`. An empty error message
/// counts as success.
pub fn encode_response(
    topics: &Topics,
    msg_id: &str,
    error: Option<&str>,
) -> Result<Outbound, EncodeError> {
    let topic = topics.response()?;
    let mut payload = String::new();
    let written = match error.filter(|message| !message.is_empty()) {
        Some(message) => write!(payload, "error,{msg_id}={message}"),
        None => write!(payload, "ok,{msg_id}"),
    };
    written.map_err(|_| EncodeError::Overflow)?;
    Ok(Outbound { topic, payload })
}

/// Parses an inbound command.
///
/// The topic needs at least six levels (`v1/{user}/things/{client}/{class}/{channel}`)
/// with an integer channel. The payload is split on its first comma only, so
/// the value keeps any commas of its own.
pub fn decode<'a>(topic: &'a str, payload: &'a str) -> Result<Command<'a>, MalformedMessage> {
    let mut levels = topic.split('/');
    let mut level = |count: usize| levels.next().ok_or(MalformedMessage::TooFewSegments(count));

    level(0)?;
    level(1)?;
    level(2)?;
    let client_id = level(3)?;
    let class = level(4)?;
    let channel = level(5)?
        .parse::<Channel>()
        .map_err(|_| MalformedMessage::InvalidChannel)?;

    let (msg_id, value) = payload
        .split_once(',')
        .ok_or(MalformedMessage::MissingSeparator)?;

    Ok(Command {
        client_id,
        topic: class,
        channel,
        msg_id,
        value,
    })
}
