//! # MQTT Client
//!
//! A minimal MQTT 3.1.1 client over any [`MqttTransport`]: connect with
//! credentials, subscribe, publish at QoS 0 and poll for inbound packets while
//! keeping the connection alive. It implements [`Broker`], so it can be handed
//! straight to a [`Session`](crate::session::Session).
//!
//! Buffers are fixed-size arrays of `BUF_SIZE` bytes, one for receiving and one
//! for sending. An inbound packet larger than the receive buffer is skipped.

use embassy_time::{Duration, Instant};
use heapless::String;

use crate::error::{EncodeError, MqttError};
use crate::identity::{FIELD_CAPACITY, Identity};
use crate::packet::{
    self, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, Publish, QoS, SubAck, Subscribe,
};
use crate::session::{Broker, Inbound};
use crate::transport::MqttTransport;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Connection options for [`MqttClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttOptions {
    client_id: String<FIELD_CAPACITY>,
    credentials: Option<(String<FIELD_CAPACITY>, String<FIELD_CAPACITY>)>,
    keep_alive: Duration,
}

impl MqttOptions {
    /// Anonymous options with the default keep-alive.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        Ok(Self {
            client_id: String::try_from(client_id).map_err(|_| EncodeError::Overflow)?,
            credentials: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
        })
    }

    /// Client id and credentials taken from a device identity.
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            client_id: identity.client_id.clone(),
            credentials: Some((identity.username.clone(), identity.password.clone())),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn set_credentials(mut self, username: &str, password: &str) -> Result<Self, EncodeError> {
        let username = String::try_from(username).map_err(|_| EncodeError::Overflow)?;
        let password = String::try_from(password).map_err(|_| EncodeError::Overflow)?;
        self.credentials = Some((username, password));
        Ok(self)
    }

    /// Sets the keep-alive interval; zero disables pings. The broker is told
    /// whole seconds.
    pub fn set_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }
}

/// Something the broker sent.
#[derive(Debug)]
pub enum MqttEvent<'a> {
    Publish(Publish<'a>),
    SubAck(SubAck),
    PingResp,
}

/// Whether a PINGREQ is due, given the last transmission time.
pub fn ping_due(last_tx: Instant, now: Instant, keep_alive: Duration) -> bool {
    keep_alive.as_ticks() != 0 && now.saturating_duration_since(last_tx) >= keep_alive
}

/// An MQTT 3.1.1 client with `BUF_SIZE`-byte send and receive buffers.
pub struct MqttClient<T, const BUF_SIZE: usize> {
    transport: T,
    options: MqttOptions,
    rx: [u8; BUF_SIZE],
    rx_len: usize,
    /// Length of the packet handed out by the last read, dropped on the next one.
    consumed: usize,
    /// Bytes of an oversized packet still to be thrown away.
    skip: usize,
    tx: [u8; BUF_SIZE],
    next_packet_id: u16,
    last_tx: Instant,
    connected: bool,
}

impl<T: MqttTransport, const BUF_SIZE: usize> MqttClient<T, BUF_SIZE> {
    pub fn new(transport: T, options: MqttOptions) -> Self {
        Self {
            transport,
            options,
            rx: [0; BUF_SIZE],
            rx_len: 0,
            consumed: 0,
            skip: 0,
            tx: [0; BUF_SIZE],
            next_packet_id: 1,
            last_tx: Instant::from_ticks(0),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Sends CONNECT and waits for the CONNACK.
    pub async fn connect(&mut self, clean_session: bool) -> Result<(), MqttError<T::Error>> {
        self.connected = false;
        self.rx_len = 0;
        self.consumed = 0;
        self.skip = 0;

        let keep_alive = u16::try_from(self.options.keep_alive.as_secs()).unwrap_or(u16::MAX);
        let mut connect = Connect::new(&self.options.client_id, keep_alive, clean_session);
        if let Some((username, password)) = &self.options.credentials {
            connect = connect.with_credentials(username, password.as_bytes());
        }
        let len = connect.encode(&mut self.tx).map_err(MqttError::Packet)?;
        self.send(len).await?;

        let Some(len) = self.read_frame().await? else {
            return Err(MqttError::Timeout);
        };
        let frame = &self.rx[..len];
        match packet::decode(frame).map_err(MqttError::Packet)? {
            MqttPacket::ConnAck(ack) if ack.return_code == 0 => {
                debug!("CONNACK, session present: {}", ack.session_present);
                self.connected = true;
                Ok(())
            }
            MqttPacket::ConnAck(ack) => Err(MqttError::ConnectionRefused(ack.return_code.into())),
            _ => Err(MqttError::UnexpectedPacket(
                packet::packet_type(frame).map_err(MqttError::Packet)?,
            )),
        }
    }

    /// Subscribes to `topic` at QoS 0 and returns the packet id. The SUBACK
    /// comes back through [`poll`](Self::poll).
    pub async fn subscribe(&mut self, topic: &str) -> Result<u16, MqttError<T::Error>> {
        if !self.connected {
            return Err(MqttError::NotConnected);
        }
        let packet_id = self.next_packet_id();
        let len = Subscribe::new(packet_id, topic, QoS::AtMostOnce)
            .encode(&mut self.tx)
            .map_err(MqttError::Packet)?;
        self.send(len).await?;
        Ok(packet_id)
    }

    /// Publishes at QoS 0.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), MqttError<T::Error>> {
        if !self.connected {
            return Err(MqttError::NotConnected);
        }
        let len = Publish::at_most_once(topic, payload, retain)
            .encode(&mut self.tx)
            .map_err(MqttError::Packet)?;
        self.send(len).await
    }

    /// Sends a ping if the keep-alive interval has passed, then reads one packet.
    ///
    /// `Ok(None)` when the transport had nothing, or the packet needs no
    /// attention from the caller.
    pub async fn poll(&mut self) -> Result<Option<MqttEvent<'_>>, MqttError<T::Error>> {
        if !self.connected {
            return Err(MqttError::NotConnected);
        }

        if ping_due(self.last_tx, Instant::now(), self.options.keep_alive) {
            trace!("PINGREQ");
            let len = PingReq.encode(&mut self.tx).map_err(MqttError::Packet)?;
            self.send(len).await?;
        }

        let Some(len) = self.read_frame().await? else {
            return Ok(None);
        };
        let event = match packet::decode(&self.rx[..len]).map_err(MqttError::Packet)? {
            MqttPacket::Publish(publish) => MqttEvent::Publish(publish),
            MqttPacket::SubAck(ack) => {
                if ack.rejected() {
                    warn!("subscription {} rejected by broker", ack.packet_id);
                }
                MqttEvent::SubAck(ack)
            }
            MqttPacket::PingResp => MqttEvent::PingResp,
            MqttPacket::ConnAck(_) => {
                return Err(MqttError::UnexpectedPacket(packet::CONNACK));
            }
            MqttPacket::Other(kind) => {
                trace!("ignoring packet type {}", kind);
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    /// Sends DISCONNECT. The client must `connect` again before further use.
    pub async fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        if !self.connected {
            return Ok(());
        }
        let len = Disconnect.encode(&mut self.tx).map_err(MqttError::Packet)?;
        let result = self.send(len).await;
        self.connected = false;
        result
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    async fn send(&mut self, len: usize) -> Result<(), MqttError<T::Error>> {
        if let Err(e) = self.transport.send(&self.tx[..len]).await {
            self.connected = false;
            return Err(MqttError::Transport(e));
        }
        self.last_tx = Instant::now();
        Ok(())
    }

    /// Buffers bytes until one whole packet sits at the start of `rx` and
    /// returns its length, or `None` once the transport has nothing more.
    async fn read_frame(&mut self) -> Result<Option<usize>, MqttError<T::Error>> {
        if self.consumed > 0 {
            self.rx.copy_within(self.consumed..self.rx_len, 0);
            self.rx_len -= self.consumed;
            self.consumed = 0;
        }

        loop {
            if self.skip == 0
                && let Some(len) =
                    packet::frame_len(&self.rx[..self.rx_len]).map_err(MqttError::Packet)?
            {
                if len > BUF_SIZE {
                    warn!("skipping {} byte packet, buffer holds {}", len, BUF_SIZE);
                    self.skip = len - self.rx_len;
                    self.rx_len = 0;
                } else if len <= self.rx_len {
                    self.consumed = len;
                    return Ok(Some(len));
                }
            }

            let n = match self.transport.recv(&mut self.rx[self.rx_len..]).await {
                Ok(n) => n,
                Err(e) => {
                    self.connected = false;
                    return Err(MqttError::Transport(e));
                }
            };
            if n == 0 {
                return Ok(None);
            }
            self.rx_len += n;

            if self.skip > 0 {
                let dropped = self.skip.min(self.rx_len);
                self.rx.copy_within(dropped..self.rx_len, 0);
                self.rx_len -= dropped;
                self.skip -= dropped;
            }
        }
    }
}

impl<T: MqttTransport, const BUF_SIZE: usize> Broker for MqttClient<T, BUF_SIZE> {
    type Error = MqttError<T::Error>;

    async fn connect(&mut self, clean_session: bool) -> Result<(), Self::Error> {
        MqttClient::connect(self, clean_session).await
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic).await.map(|_| ())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, retain).await
    }

    async fn poll(&mut self) -> Result<Option<Inbound<'_>>, Self::Error> {
        match MqttClient::poll(self).await? {
            Some(MqttEvent::Publish(publish)) => Ok(Some(Inbound {
                topic: publish.topic.as_bytes(),
                payload: publish.payload,
            })),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectReasonCode;
    use crate::packet::DecodePacket;
    use crate::codec::Command;
    use crate::session::{CommandError, Delivery, Session};
    use embassy_futures::block_on;
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Debug, PartialEq)]
    struct MockError;

    /// Scripted byte stream: each `recv` hands out (part of) the next chunk.
    #[derive(Default)]
    struct MockTransport {
        sent: Vec<u8>,
        chunks: VecDeque<Vec<u8>>,
        fail_recv: bool,
    }

    impl MockTransport {
        fn script(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                ..Default::default()
            }
        }

        /// Splits everything sent so far into packets.
        fn sent_packets(&self) -> Vec<Vec<u8>> {
            let mut packets = Vec::new();
            let mut rest = self.sent.as_slice();
            while let Ok(Some(len)) = packet::frame_len(rest) {
                packets.push(rest[..len].to_vec());
                rest = &rest[len..];
            }
            packets
        }
    }

    impl MqttTransport for MockTransport {
        type Error = MockError;

        async fn send(&mut self, buf: &[u8]) -> Result<(), MockError> {
            self.sent.extend_from_slice(buf);
            Ok(())
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, MockError> {
            if self.fail_recv {
                return Err(MockError);
            }
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    const CONNACK_OK: &[u8] = &[0x20, 0x02, 0x00, 0x00];

    fn publish_bytes(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let len = Publish::at_most_once(topic, payload, false)
            .encode(&mut buf)
            .unwrap();
        buf[..len].to_vec()
    }

    fn identity() -> Identity {
        Identity::new("alice", "secret", "dev1").unwrap()
    }

    fn client(chunks: &[&[u8]]) -> MqttClient<MockTransport, 64> {
        MqttClient::new(
            MockTransport::script(chunks),
            MqttOptions::from_identity(&identity()),
        )
    }

    #[test]
    fn connect_sends_credentials() {
        let mut client = client(&[CONNACK_OK]);
        block_on(client.connect(true)).unwrap();
        assert!(client.is_connected());

        let sent = client.transport().sent_packets();
        assert_eq!(sent.len(), 1);
        let connect = &sent[0];
        assert_eq!(connect[0], 0x10);
        assert_eq!(connect[9], 0xC2);
        assert_eq!(&connect[10..12], &60u16.to_be_bytes());
        assert!(connect.windows(4).any(|w| w == b"dev1"));
        assert!(connect.windows(5).any(|w| w == b"alice"));
        assert!(connect.windows(6).any(|w| w == b"secret"));
    }

    #[test]
    fn connect_refused() {
        let mut client = client(&[&[0x20, 0x02, 0x00, 0x04]]);
        let result = block_on(client.connect(true));
        assert!(matches!(
            result,
            Err(MqttError::ConnectionRefused(
                ConnectReasonCode::BadUserNameOrPassword
            ))
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn connect_without_answer_times_out() {
        let mut client = client(&[]);
        assert!(matches!(
            block_on(client.connect(true)),
            Err(MqttError::Timeout)
        ));
    }

    #[test]
    fn connect_answered_with_wrong_packet() {
        let mut client = client(&[&[0xD0, 0x00]]);
        assert!(matches!(
            block_on(client.connect(true)),
            Err(MqttError::UnexpectedPacket(packet::PINGRESP))
        ));
    }

    #[test]
    fn operations_need_connection() {
        let mut client = client(&[]);
        assert!(matches!(
            block_on(client.publish("t", b"x", false)),
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            block_on(client.subscribe("t")),
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            block_on(client.poll()),
            Err(MqttError::NotConnected)
        ));
        assert!(client.transport().sent.is_empty());
    }

    #[test]
    fn subscribe_ids_increase() {
        let mut client = client(&[CONNACK_OK]);
        block_on(client.connect(true)).unwrap();
        assert_eq!(block_on(client.subscribe("a/+")).unwrap(), 1);
        assert_eq!(block_on(client.subscribe("b/+")).unwrap(), 2);

        let sent = client.transport().sent_packets();
        assert_eq!(sent[1][0], 0x82);
        assert_eq!(&sent[2][2..4], &[0x00, 0x02]);
    }

    #[test]
    fn packet_id_wraps_past_zero() {
        let mut client = client(&[]);
        client.next_packet_id = u16::MAX;
        assert_eq!(client.next_packet_id(), u16::MAX);
        assert_eq!(client.next_packet_id(), 1);
    }

    #[test]
    fn publish_is_qos0() {
        let mut client = client(&[CONNACK_OK]);
        block_on(client.connect(true)).unwrap();
        block_on(client.publish("v1/a/data/1", b"temp,c=20", false)).unwrap();

        let sent = client.transport().sent_packets();
        let publish = Publish::decode(&sent[1]).unwrap();
        assert_eq!(publish.topic, "v1/a/data/1");
        assert_eq!(publish.payload, b"temp,c=20");
        assert_eq!(publish.qos, QoS::AtMostOnce);
        assert!(!publish.retain);
    }

    #[test]
    fn poll_reassembles_split_packet() {
        let bytes = publish_bytes("a/b", b"hello");
        let mut client = client(&[CONNACK_OK, &bytes[..1], &bytes[1..4], &bytes[4..]]);
        block_on(client.connect(true)).unwrap();

        match block_on(client.poll()).unwrap() {
            Some(MqttEvent::Publish(publish)) => {
                assert_eq!(publish.topic, "a/b");
                assert_eq!(publish.payload, b"hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(block_on(client.poll()).unwrap().is_none());
    }

    #[test]
    fn poll_splits_coalesced_packets() {
        let mut chunk = std::vec![0x90, 0x03, 0x00, 0x01, 0x00];
        chunk.extend(publish_bytes("x", b"1"));
        chunk.extend([0xD0, 0x00]);
        let mut client = client(&[CONNACK_OK, &chunk]);
        block_on(client.connect(true)).unwrap();

        assert!(matches!(
            block_on(client.poll()).unwrap(),
            Some(MqttEvent::SubAck(SubAck { packet_id: 1, .. }))
        ));
        assert!(matches!(
            block_on(client.poll()).unwrap(),
            Some(MqttEvent::Publish(Publish { topic: "x", .. }))
        ));
        assert!(matches!(
            block_on(client.poll()).unwrap(),
            Some(MqttEvent::PingResp)
        ));
    }

    #[test]
    fn oversized_packet_is_skipped() {
        let big = publish_bytes("big", &[b'z'; 100]);
        let mut stream = big.clone();
        stream.extend([0xD0, 0x00]);
        let mut client = client(&[CONNACK_OK, &stream]);
        block_on(client.connect(true)).unwrap();

        assert!(matches!(
            block_on(client.poll()).unwrap(),
            Some(MqttEvent::PingResp)
        ));
    }

    #[test]
    fn puback_needs_no_attention() {
        let mut client = client(&[CONNACK_OK, &[0x40, 0x02, 0x00, 0x01]]);
        block_on(client.connect(true)).unwrap();
        assert!(block_on(client.poll()).unwrap().is_none());
    }

    #[test]
    fn recv_failure_drops_connection() {
        let mut client = client(&[CONNACK_OK]);
        block_on(client.connect(true)).unwrap();
        client.transport_mut().fail_recv = true;

        assert!(matches!(
            block_on(client.poll()),
            Err(MqttError::Transport(MockError))
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn disconnect_sends_packet() {
        let mut client = client(&[CONNACK_OK]);
        block_on(client.connect(true)).unwrap();
        block_on(client.disconnect()).unwrap();
        assert!(!client.is_connected());
        assert_eq!(client.transport().sent_packets()[1], [0xE0, 0x00]);
    }

    #[test]
    fn ping_schedule() {
        let start = Instant::from_secs(100);
        let keep_alive = Duration::from_secs(60);
        assert!(!ping_due(start, start + Duration::from_secs(59), keep_alive));
        assert!(ping_due(start, start + Duration::from_secs(60), keep_alive));
        assert!(!ping_due(
            start,
            start + Duration::from_secs(600),
            Duration::from_secs(0)
        ));
        assert!(!ping_due(start, Instant::from_secs(10), keep_alive));
    }

    #[test]
    fn options_builders() {
        let options = MqttOptions::new("node")
            .unwrap()
            .set_credentials("u", "p")
            .unwrap()
            .set_keep_alive(Duration::from_secs(15));
        assert_eq!(options.client_id(), "node");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert_eq!(
            MqttOptions::from_identity(&identity()).client_id(),
            "dev1"
        );
    }

    #[test]
    fn session_over_mqtt_client() {
        let command = publish_bytes("v1/alice/things/dev1/cmd/5", b"m1,on");
        let transport = MockTransport::script(&[CONNACK_OK, &command]);
        let client: MqttClient<_, 256> =
            MqttClient::new(transport, MqttOptions::from_identity(&identity()));

        let mut seen = Vec::new();
        let mut session = Session::new(client, identity())
            .unwrap()
            .with_handler(|cmd: &Command<'_>| -> Result<(), CommandError> {
                seen.push((cmd.channel, cmd.value.len()));
                Ok(())
            });

        block_on(session.begin()).unwrap();
        let delivery = block_on(session.poll()).unwrap();
        assert_eq!(delivery, Some(Delivery::Dispatched { accepted: true }));

        let sent = session.broker().transport().sent_packets();
        let kinds: Vec<u8> = sent.iter().map(|p| p[0] >> 4).collect();
        assert_eq!(
            kinds,
            [
                packet::CONNECT,
                packet::SUBSCRIBE,
                packet::PUBLISH,
                packet::PUBLISH,
                packet::PUBLISH,
                packet::PUBLISH,
            ]
        );

        let subscribe = &sent[1];
        assert!(subscribe.windows(26).any(|w| w == b"v1/alice/things/dev1/cmd/+"));

        let model = Publish::decode(&sent[2]).unwrap();
        assert_eq!(model.topic, "v1/alice/things/dev1/sys/model");
        assert_eq!(model.payload, b"rust");

        let echo = Publish::decode(&sent[4]).unwrap();
        assert_eq!(echo.topic, "v1/alice/things/dev1/data/5");
        assert_eq!(echo.payload, b"on");

        let response = Publish::decode(&sent[5]).unwrap();
        assert_eq!(response.topic, "v1/alice/things/dev1/response");
        assert_eq!(response.payload, b"ok,m1");

        drop(session);
        assert_eq!(seen, [(5, 2)]);
    }
}
