//! Unary `GetRate` calls to the rate server.
//!
//! `RateSource` is the seam the cache uses for synchronous lookups on a miss.
//! `TcpRateSource` keeps one connection open and reuses it for every call,
//! reopening it on the next call after a failure.
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use rates_common::codec::{FrameReader, write_frame};
use rates_common::{RateRequest, RateResponse, RatesError, Result, UnaryReply};

/// Read timeout for a single unary reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Synchronous rate lookup.
pub trait RateSource: Send + Sync {
    /// Fetches the current rate for `request`.
    ///
    /// A typed server failure comes back as `RatesError::Rpc`, untouched.
    fn get_rate(&self, request: &RateRequest) -> Result<RateResponse>;
}

struct UnaryConnection {
    writer: TcpStream,
    reader: FrameReader<TcpStream>,
}

impl UnaryConnection {
    fn open(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
        let reader = FrameReader::new(stream.try_clone()?);
        debug!("Opened GetRate connection to {}", addr);
        Ok(UnaryConnection {
            writer: stream,
            reader,
        })
    }

    fn call(&mut self, request: &RateRequest) -> Result<UnaryReply> {
        write_frame(&mut self.writer, request)?;
        self.reader
            .read_frame()?
            .ok_or_else(|| RatesError::Transport("rate server closed the connection".to_string()))
    }
}

/// `RateSource` backed by the server's unary TCP endpoint.
pub struct TcpRateSource {
    addr: String,
    connection: Mutex<Option<UnaryConnection>>,
}

impl TcpRateSource {
    /// Creates a source for the server at `addr`; connects on first use.
    pub fn new(addr: impl Into<String>) -> Self {
        TcpRateSource {
            addr: addr.into(),
            connection: Mutex::new(None),
        }
    }
}

impl RateSource for TcpRateSource {
    fn get_rate(&self, request: &RateRequest) -> Result<RateResponse> {
        let mut guard = self.connection.lock()?;
        if guard.is_none() {
            *guard = Some(UnaryConnection::open(&self.addr)?);
        }
        let reply = match guard.as_mut() {
            Some(connection) => connection.call(request),
            None => return Err(RatesError::Transport("no GetRate connection".to_string())),
        };
        if let Err(e) = &reply {
            warn!("GetRate {} failed, dropping connection: {}", request, e);
            *guard = None;
        }

        match reply? {
            UnaryReply::Rate(response) => Ok(response),
            UnaryReply::Error(err) => Err(RatesError::Rpc(err)),
        }
    }
}
