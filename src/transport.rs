//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the underlying
//! byte stream (TCP, UART, ...) the MQTT link runs over, and a TCP
//! implementation on top of `embassy-net`.

use embassy_net::tcp::{Error as TcpError, TcpSocket};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;
use futures::future::{Either, select};

/// A reliable, ordered byte stream carrying MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// Sends the whole buffer.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data into `buf`, returning the number of bytes read.
    ///
    /// `Ok(0)` means nothing arrived before the transport's own read timeout;
    /// a closed connection is an error.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Errors from [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpTransportError {
    /// The socket reported an error.
    Tcp(TcpError),
    /// The peer closed the connection.
    Closed,
}

#[cfg(feature = "defmt")]
impl defmt::Format for TcpTransportError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            TcpTransportError::Tcp(_) => defmt::write!(f, "Tcp"),
            TcpTransportError::Closed => defmt::write!(f, "Closed"),
        }
    }
}

impl From<TcpError> for TcpTransportError {
    fn from(err: TcpError) -> Self {
        TcpTransportError::Tcp(err)
    }
}

/// TCP transport implementation using `embassy-net`.
///
/// The socket must already be connected to the broker.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport`; `timeout` bounds every `recv`.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// Gives the socket back, e.g. to close it.
    pub fn into_inner(self) -> TcpSocket<'a> {
        self.socket
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpTransportError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("TCP TX {} bytes", buf.len());
        self.socket.write_all(buf).await.inspect_err(|_| {
            warn!("TCP write failed");
        })?;
        self.socket.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let read = self.socket.read(buf);
        let timer = Timer::after(self.timeout);

        match select(core::pin::pin!(read), core::pin::pin!(timer)).await {
            Either::Left((Ok(0), _)) => {
                debug!("TCP connection closed by peer");
                Err(TcpTransportError::Closed)
            }
            Either::Left((Ok(n), _)) => {
                trace!("TCP RX {} bytes", n);
                Ok(n)
            }
            Either::Left((Err(e), _)) => {
                warn!("TCP read failed");
                Err(TcpTransportError::Tcp(e))
            }
            Either::Right(((), _)) => Ok(0),
        }
    }
}
