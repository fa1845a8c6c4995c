use crate::connection::serve_stream;
use crate::service::RateService;
use log::{debug, error, info};
use rates_common::codec::{FrameReader, write_frame};
use rates_common::{RateRequest, Result, UnaryReply};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// TCP front end of the rate server.
///
/// Binds two listening sockets: one for unary `GetRate` calls and one for
/// `SubscribeRates` streams. Every accepted connection is served on its own
/// thread, so a failing client never stops the accept loops or other clients.
pub struct RateServer {
    service: Arc<RateService>,
    unary: TcpListener,
    stream: TcpListener,
    capacity: usize,
}

impl RateServer {
    /// Bind both listeners. `capacity` is the outbound buffer size of every
    /// rate stream connection.
    pub fn bind(
        service: Arc<RateService>,
        unary_addr: &str,
        stream_addr: &str,
        capacity: usize,
    ) -> Result<Self> {
        let unary = TcpListener::bind(unary_addr)?;
        let stream = TcpListener::bind(stream_addr)?;
        Ok(Self {
            service,
            unary,
            stream,
            capacity,
        })
    }

    /// Addresses actually bound, as `(unary, stream)`.
    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr)> {
        Ok((self.unary.local_addr()?, self.stream.local_addr()?))
    }

    /// Start the accept loops on background threads.
    pub fn spawn(self) -> Result<(JoinHandle<()>, JoinHandle<()>)> {
        let (unary_addr, stream_addr) = self.local_addrs()?;
        info!("GetRate server is started on {}", unary_addr);
        info!("SubscribeRates server is started on {}", stream_addr);

        let unary_service = Arc::clone(&self.service);
        let unary_listener = self.unary;
        let unary = thread::Builder::new()
            .name("unary-accept".to_string())
            .spawn(move || {
                accept_loop(unary_listener, "unary", move |stream| {
                    serve_unary(&unary_service, stream)
                })
            })?;

        let stream_service = self.service;
        let stream_listener = self.stream;
        let capacity = self.capacity;
        let streams = thread::Builder::new()
            .name("stream-accept".to_string())
            .spawn(move || {
                accept_loop(stream_listener, "stream", move |stream| {
                    serve_stream(&stream_service, stream, capacity)
                })
            })?;

        Ok((unary, streams))
    }
}

/// Blocking loop that accepts connections and serves each on its own thread.
fn accept_loop<F>(listener: TcpListener, kind: &'static str, handler: F)
where
    F: Fn(TcpStream) -> Result<()> + Send + Sync + Clone + 'static,
{
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| "unknown peer".to_string());
                debug!("Accepted {} connection from {}", kind, peer);
                let handler = handler.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-{}", kind, peer))
                    .spawn(move || {
                        if let Err(e) = handler(stream) {
                            error!("{} connection {} failed: {}", kind, peer, e);
                        }
                    });
                if let Err(e) = spawned {
                    error!("Unable to spawn {} handler: {}", kind, e);
                }
            }
            Err(e) => error!("{} TCP connection error: {}", kind, e),
        }
    }
}

/// Serve unary `GetRate` calls on one connection until the peer closes it.
///
/// Requests are answered in order, one reply per request.
pub fn serve_unary(service: &RateService, stream: TcpStream) -> Result<()> {
    let mut reader = FrameReader::new(&stream);
    let mut writer = &stream;

    while let Some(request) = reader.read_frame::<RateRequest>()? {
        let reply = UnaryReply::from(service.get_rate(&request));
        write_frame(&mut writer, &reply)?;
    }
    Ok(())
}
