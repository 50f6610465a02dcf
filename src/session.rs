//! # Device Session
//!
//! A [`Session`] owns one device identity and the broker link, turns writes
//! into data publishes, and answers every command it hands to the
//! application's [`CommandHandler`].
//!
//! The session never runs anything in the background. The application drives
//! it by calling [`Session::poll`]; a command received during that call is
//! handled, echoed and acknowledged before the call returns.
//!
//! ```ignore
//! let identity = Identity::new(USERNAME, PASSWORD, CLIENT_ID)?;
//! let client = MqttClient::<_, 512>::new(transport, MqttOptions::from_identity(&identity));
//! let mut session = Session::new(client, identity)?.with_handler(|cmd: &Command<'_>| {
//!     relay.set(cmd.channel, cmd.value == "1");
//!     Ok(())
//! });
//!
//! session.begin().await?;
//! loop {
//!     session.poll().await?;
//!     session.celsius_write(1, sensor.read()).await?;
//! }
//! ```

use core::fmt::Display;
use core::str;

use heapless::{String, Vec};

use crate::codec::{
    self, Channel, Command, Outbound, PAYLOAD_CAPACITY, TOPIC_CAPACITY, Topics,
};
use crate::error::{EncodeError, MalformedMessage, SessionError};
use crate::identity::Identity;
use crate::measure::Measure;

/// Client version reported on `sys/version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform label reported on `sys/model` unless overridden.
pub const DEFAULT_MODEL: &str = "rust";

/// Largest inbound command payload the session accepts.
pub const INBOUND_PAYLOAD_CAPACITY: usize = 256;

/// Capacity of a handler's error message.
pub const ERROR_CAPACITY: usize = 64;

// Any accepted command must leave room for its echo and for
// `error,{msg_id}={message}`.
const _: () = assert!(INBOUND_PAYLOAD_CAPACITY + ERROR_CAPACITY + 7 <= PAYLOAD_CAPACITY);

/// A publish received from the broker, still as raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub topic: &'a [u8],
    pub payload: &'a [u8],
}

/// The publish/subscribe operations the session needs from a broker link.
///
/// Every publish is fire-and-forget (QoS 0) and not retained unless asked.
#[allow(async_fn_in_trait)]
pub trait Broker {
    type Error: core::fmt::Debug;

    /// Opens the MQTT session on an already established link.
    async fn connect(&mut self, clean_session: bool) -> Result<(), Self::Error>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool)
    -> Result<(), Self::Error>;

    /// Waits for the next inbound publish. `Ok(None)` when nothing arrived
    /// or the link only processed housekeeping traffic.
    async fn poll(&mut self) -> Result<Option<Inbound<'_>>, Self::Error>;
}

/// The message a handler reports when it could not apply a command.
///
/// Holds at most [`ERROR_CAPACITY`] bytes; longer text is cut at the last
/// character boundary that fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError(String<ERROR_CAPACITY>);

impl CommandError {
    /// Copies `message`, cutting it at a character boundary if it is too long.
    pub fn new(message: &str) -> Self {
        let mut end = message.len().min(ERROR_CAPACITY);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        let mut text = String::new();
        let _ = text.push_str(&message[..end]);
        Self(text)
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Application callback for inbound commands.
///
/// `Ok(())` means the new value was applied and the session echoes it back on
/// the command's channel. An `Err` is reported to the broker instead; an
/// error with an empty message counts as success. Error text longer than
/// [`ERROR_CAPACITY`] bytes is truncated.
pub trait CommandHandler {
    fn on_command(&mut self, command: &Command<'_>) -> Result<(), CommandError>;
}

impl<F> CommandHandler for F
where
    F: FnMut(&Command<'_>) -> Result<(), CommandError>,
{
    fn on_command(&mut self, command: &Command<'_>) -> Result<(), CommandError> {
        self(command)
    }
}

/// Handler type of a session that has none registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unhandled;

impl CommandHandler for Unhandled {
    fn on_command(&mut self, _command: &Command<'_>) -> Result<(), CommandError> {
        Ok(())
    }
}

/// Whether the broker link is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    /// The handler ran and a response was sent; `accepted` is false when it
    /// reported an error.
    Dispatched { accepted: bool },
    /// A valid command arrived but no handler is registered.
    Unhandled,
    /// The topic is not this device's command topic.
    Ignored,
    /// The message was dropped because it does not parse.
    Malformed(MalformedMessage),
}

/// One device's session with the broker.
pub struct Session<B, H = Unhandled> {
    broker: B,
    identity: Identity,
    topics: Topics,
    state: LinkState,
    handler: Option<H>,
    model: &'static str,
}

impl<B: Broker> Session<B, Unhandled> {
    /// Creates a disconnected session without a command handler.
    pub fn new(broker: B, identity: Identity) -> Result<Self, EncodeError> {
        let topics = identity.topics()?;
        Ok(Self {
            broker,
            identity,
            topics,
            state: LinkState::Disconnected,
            handler: None,
            model: DEFAULT_MODEL,
        })
    }
}

impl<B: Broker, H: CommandHandler> Session<B, H> {
    /// Registers the command handler, replacing the handler type.
    pub fn with_handler<H2: CommandHandler>(self, handler: H2) -> Session<B, H2> {
        Session {
            broker: self.broker,
            identity: self.identity,
            topics: self.topics,
            state: self.state,
            handler: Some(handler),
            model: self.model,
        }
    }

    /// Installs a handler of the session's current handler type, e.g. after
    /// [`clear_handler`](Self::clear_handler). A fresh session's type is
    /// [`Unhandled`]; install the first real handler with
    /// [`with_handler`](Self::with_handler).
    pub fn set_handler(&mut self, handler: H) {
        self.handler = Some(handler);
    }

    /// Removes the handler; later commands are decoded but not answered.
    pub fn clear_handler(&mut self) -> Option<H> {
        self.handler.take()
    }

    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    /// Sets the platform label published on `sys/model`.
    pub fn with_model(mut self, model: &'static str) -> Self {
        self.model = model;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn into_broker(self) -> B {
        self.broker
    }

    pub fn data_topic(&self, channel: Channel) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        self.topics.data(channel)
    }

    pub fn command_topic(&self) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        self.topics.command()
    }

    pub fn response_topic(&self) -> Result<String<TOPIC_CAPACITY>, EncodeError> {
        self.topics.response()
    }

    /// Connects with a clean session, subscribes to the command topic and
    /// announces the device model and client version.
    ///
    /// On a refused or failed connect the session stays disconnected and
    /// nothing else is sent. If the subscribe or an announcement fails the
    /// session is left disconnected as well.
    pub async fn begin(&mut self) -> Result<(), SessionError<B::Error>> {
        info!(
            "Connecting to {}:{}...",
            self.identity.hostname(),
            self.identity.port()
        );

        if let Err(e) = self.broker.connect(true).await {
            error!("connection to broker failed");
            self.state = LinkState::Disconnected;
            return Err(SessionError::Connection(e));
        }
        self.state = LinkState::Connected;

        if let Err(e) = self.handshake().await {
            warn!("broker handshake failed");
            self.state = LinkState::Disconnected;
            return Err(e);
        }
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), SessionError<B::Error>> {
        let command_topic = self.topics.command()?;
        info!("SUB {}", command_topic.as_str());
        self.broker
            .subscribe(&command_topic)
            .await
            .map_err(SessionError::Transport)?;

        let model_topic = self.topics.sys("model")?;
        self.mqtt_publish(&model_topic, self.model).await?;
        let version_topic = self.topics.sys("version")?;
        self.mqtt_publish(&version_topic, VERSION).await
    }

    /// Marks the link as lost. Writes become no-ops until `begin` succeeds again.
    pub fn link_lost(&mut self) {
        if self.state == LinkState::Connected {
            warn!("broker link lost");
        }
        self.state = LinkState::Disconnected;
    }

    /// Processes at most one inbound message.
    ///
    /// Returns `Ok(None)` when disconnected or when the broker had nothing to
    /// deliver. A broker error marks the link lost.
    pub async fn poll(&mut self) -> Result<Option<Delivery>, SessionError<B::Error>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let mut topic: Vec<u8, TOPIC_CAPACITY> = Vec::new();
        let mut payload: Vec<u8, INBOUND_PAYLOAD_CAPACITY> = Vec::new();
        match self.broker.poll().await {
            Ok(Some(inbound)) => {
                if topic.extend_from_slice(inbound.topic).is_err()
                    || payload.extend_from_slice(inbound.payload).is_err()
                {
                    warn!("dropping oversized message ({} bytes)", inbound.payload.len());
                    return Ok(Some(Delivery::Malformed(MalformedMessage::TooLong)));
                }
            }
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("broker link lost");
                self.state = LinkState::Disconnected;
                return Err(SessionError::Transport(e));
            }
        }

        self.handle_message(&topic, &payload).await.map(Some)
    }

    /// Handles one publish the broker link received.
    ///
    /// Messages outside `{root}/cmd/+` are ignored; malformed commands are
    /// logged and dropped. A decoded command goes to the handler, and the
    /// session then publishes exactly one response for it, preceded by an
    /// echo of the value on its channel when the handler succeeded.
    pub async fn handle_message(
        &mut self,
        topic: &[u8],
        payload: &[u8],
    ) -> Result<Delivery, SessionError<B::Error>> {
        let (Ok(topic), Ok(payload)) = (str::from_utf8(topic), str::from_utf8(payload)) else {
            warn!("dropping message that is not UTF-8");
            return Ok(Delivery::Malformed(MalformedMessage::InvalidUtf8));
        };

        if !self.topics.is_command(topic) {
            debug!("ignoring message on {}", topic);
            return Ok(Delivery::Ignored);
        }

        let command = match codec::decode(topic, payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("dropping malformed command on {}: {}", topic, e);
                return Ok(Delivery::Malformed(e));
            }
        };

        self.dispatch(&command).await
    }

    async fn dispatch(&mut self, command: &Command<'_>) -> Result<Delivery, SessionError<B::Error>> {
        let result = match self.handler.as_mut() {
            Some(handler) => handler.on_command(command),
            None => {
                debug!("no handler for command {}", command.msg_id);
                return Ok(Delivery::Unhandled);
            }
        };

        let error = result.err().filter(|e| !e.message().is_empty());
        let echoed = match error {
            None => self.virtual_write(command.channel, command.value, None).await,
            Some(_) => Ok(()),
        };
        self.response_write(command.msg_id, error.as_ref().map(CommandError::message))
            .await?;
        echoed?;

        Ok(Delivery::Dispatched {
            accepted: error.is_none(),
        })
    }

    /// Publishes `value` on `channel`, labelled with `measure` if given.
    /// Does nothing while disconnected.
    pub async fn virtual_write(
        &mut self,
        channel: Channel,
        value: impl Display,
        measure: Option<Measure>,
    ) -> Result<(), SessionError<B::Error>> {
        if !self.is_connected() {
            return Ok(());
        }
        let outbound = codec::encode(&self.topics, channel, value, measure)?;
        self.publish(&outbound).await
    }

    /// Acknowledges command `msg_id`, with `error` when it failed.
    /// Does nothing while disconnected.
    pub async fn response_write(
        &mut self,
        msg_id: &str,
        error: Option<&str>,
    ) -> Result<(), SessionError<B::Error>> {
        if !self.is_connected() {
            return Ok(());
        }
        let outbound = codec::encode_response(&self.topics, msg_id, error)?;
        self.publish(&outbound).await
    }

    /// Publishes a raw payload on any topic. Does nothing while disconnected.
    pub async fn mqtt_publish(
        &mut self,
        topic: &str,
        payload: &str,
    ) -> Result<(), SessionError<B::Error>> {
        if !self.is_connected() {
            return Ok(());
        }
        debug!("PUB {} {}", topic, payload);
        self.broker
            .publish(topic, payload.as_bytes(), false)
            .await
            .map_err(SessionError::Transport)
    }

    async fn publish(&mut self, outbound: &Outbound) -> Result<(), SessionError<B::Error>> {
        self.mqtt_publish(&outbound.topic, &outbound.payload).await
    }

    // Typed writes. None of these convert: pass the value already in the named unit.

    /// Temperature in degrees Celsius.
    pub async fn celsius_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::CELSIUS)).await
    }

    /// Temperature in degrees Fahrenheit.
    pub async fn fahrenheit_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::FAHRENHEIT)).await
    }

    /// Temperature in kelvin.
    pub async fn kelvin_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::KELVIN)).await
    }

    /// Luminosity in lux.
    pub async fn lux_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::LUX)).await
    }

    /// Barometric pressure in pascal.
    pub async fn pascal_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::PASCAL)).await
    }

    /// Barometric pressure in hectopascal.
    pub async fn hecto_pascal_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::HECTOPASCAL))
            .await
    }

    /// Relative humidity in percent.
    pub async fn relative_humidity_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::RELATIVE_HUMIDITY))
            .await
    }

    /// Battery level in percent.
    pub async fn battery_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::BATTERY)).await
    }

    pub async fn volts_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::VOLTS)).await
    }

    pub async fn millivolts_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::MILLIVOLTS))
            .await
    }

    /// Proximity in centimeters.
    pub async fn proximity_write(
        &mut self,
        channel: Channel,
        value: impl Display,
    ) -> Result<(), SessionError<B::Error>> {
        self.virtual_write(channel, value, Some(Measure::PROXIMITY))
            .await
    }
}
