//! # Cayenne-style MQTT Device Client
//!
//! `cayenne-mqtt` connects a device to an IoT dashboard broker that speaks the
//! Cayenne MQTT convention: sensor readings go out as `{type},{unit}={value}`
//! payloads on per-channel data topics, and actuator commands come in on
//! `cmd` topics and are answered on a response topic.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Topics, payloads and packet buffers live in
//!   `heapless` strings and fixed arrays.
//! - **Fully Async:** Built on the [Embassy](https://embassy.dev/) timers and
//!   networking stack, using native `async fn` in traits.
//! - **Transport Agnostic:** The MQTT link runs over any [`MqttTransport`]; a
//!   TCP implementation over `embassy-net` is included.
//! - **Pure codec:** Topic and payload encoding/decoding in [`codec`] has no
//!   I/O and can be used on its own.
//!
//! ## Architecture
//!
//! ```text
//! Session ──(Broker)──> MqttClient ──(MqttTransport)──> TcpTransport
//!    │
//!    └── codec + measure (topic and payload grammar)
//! ```
//!
//! ```ignore
//! let identity = Identity::new(USERNAME, PASSWORD, CLIENT_ID)?;
//! let transport = TcpTransport::new(socket, Duration::from_secs(1));
//! let client = MqttClient::<_, 512>::new(transport, MqttOptions::from_identity(&identity));
//!
//! let mut session = Session::new(client, identity)?;
//! session.begin().await?;
//! loop {
//!     session.poll().await?;
//!     session.celsius_write(1, 21.5).await?;
//! }
//! ```

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod client;
pub mod codec;
pub mod error;
pub mod identity;
pub mod measure;
pub mod packet;
pub mod session;
pub mod transport;
pub mod util;

pub use client::{MqttClient, MqttEvent, MqttOptions};
pub use codec::{Channel, Command, Outbound, Topics};
pub use error::{EncodeError, MalformedMessage, MqttError, PacketError, SessionError};
pub use identity::Identity;
pub use measure::{DataType, Measure, Unit};
pub use packet::QoS;
pub use session::{Broker, CommandError, CommandHandler, Delivery, LinkState, Session};
pub use transport::{MqttTransport, TcpTransport, TcpTransportError};
