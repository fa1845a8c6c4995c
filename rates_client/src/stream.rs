//! Client side of the `SubscribeRates` stream.
//!
//! A `Connector` opens one stream and splits it into a `RequestWriter`, used to
//! send subscribe requests, and a `MessageReader`, drained by the cache's
//! receive loop. The TCP implementation reads with a timeout so the loop can
//! notice shutdown while the server is quiet.
use std::net::TcpStream;
use std::time::Duration;

use log::debug;
use rates_common::codec::{FrameReader, write_frame};
use rates_common::{RateRequest, Result, StreamMessage};

/// Result of one read from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A message from the server.
    Message(StreamMessage),
    /// Nothing arrived within the read timeout.
    Idle,
    /// The server closed the stream.
    Closed,
}

/// Sending half of a rate stream.
pub trait RequestWriter: Send {
    /// Sends one subscribe request.
    fn send(&mut self, request: &RateRequest) -> Result<()>;
}

/// Receiving half of a rate stream.
pub trait MessageReader: Send {
    /// Waits for the next message, up to the reader's timeout.
    fn recv(&mut self) -> Result<Inbound>;
}

/// Opens rate streams.
pub trait Connector: Send + Sync {
    /// Opens a new stream.
    fn connect(&self) -> Result<(Box<dyn RequestWriter>, Box<dyn MessageReader>)>;
}

/// `Connector` for the server's stream TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    read_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector for `addr`; reads give up after `read_timeout`.
    pub fn new(addr: impl Into<String>, read_timeout: Duration) -> Self {
        TcpConnector {
            addr: addr.into(),
            read_timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<(Box<dyn RequestWriter>, Box<dyn MessageReader>)> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        let reader = FrameReader::new(stream.try_clone()?);
        debug!("Opened rate stream to {}", self.addr);
        Ok((
            Box::new(TcpRequestWriter { stream }),
            Box::new(TcpMessageReader { reader }),
        ))
    }
}

struct TcpRequestWriter {
    stream: TcpStream,
}

impl RequestWriter for TcpRequestWriter {
    fn send(&mut self, request: &RateRequest) -> Result<()> {
        write_frame(&mut self.stream, request)
    }
}

struct TcpMessageReader {
    reader: FrameReader<TcpStream>,
}

impl MessageReader for TcpMessageReader {
    fn recv(&mut self) -> Result<Inbound> {
        match self.reader.read_frame() {
            Ok(Some(message)) => Ok(Inbound::Message(message)),
            Ok(None) => Ok(Inbound::Closed),
            Err(e) if e.is_timeout() => Ok(Inbound::Idle),
            Err(e) => Err(e),
        }
    }
}
