//! One `SubscribeRates` stream over a TCP connection.
//!
//! Each connection runs two flows:
//! - Inbound, on the calling thread: reads subscribe requests until the peer
//!   closes the stream or a transport error occurs, and registers them through
//!   the `RateService`. Rejected requests are answered in-band.
//! - Outbound, on a dedicated sender thread: the only writer of the socket. It
//!   drains the connection's bounded queue in order, so in-band errors and
//!   broadcast updates share one ordered path.
//!
//! Lifecycle: `Created -> Active -> Closing -> Closed`. Closing starts on EOF,
//! transport error or a failed write; the registry entry is removed, pending
//! frames are abandoned and the socket is shut down.

use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, bounded, select};
use log::{debug, error, info, warn};
use rates_common::codec::{FrameReader, write_frame};
use rates_common::{RateRequest, RatesError, Result, StreamError, StreamMessage};

use crate::model::registry::ConnectionId;
use crate::service::RateService;

/// How long an in-band error waits for room in a full outbound queue.
const IN_BAND_TIMEOUT: Duration = Duration::from_millis(250);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Registered, sender not running yet.
    Created,
    /// Both flows running.
    Active,
    /// Tearing down; no more frames are written.
    Closing,
    /// Fully torn down.
    Closed,
}

/// Forward-only state tracker for one connection.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Starts in `Created`.
    pub fn new() -> Self {
        Lifecycle {
            state: ConnectionState::Created,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Moves to `next` if it lies ahead of the current state. Nothing leaves
    /// `Closed`. Returns whether the transition happened.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if next <= self.state {
            return false;
        }
        self.state = next;
        true
    }
}

/// Serves one rate stream until it closes.
///
/// Returns `Ok(())` when the peer closed the stream cleanly and the transport
/// error otherwise. Either way the connection's subscriptions are gone when
/// this returns.
pub fn serve_stream(service: &RateService, stream: TcpStream, capacity: usize) -> Result<()> {
    let peer = stream.peer_addr()?;
    let mut lifecycle = Lifecycle::new();
    let (conn, outbound_tx, outbound_rx) = service.open_connection(capacity)?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    let sender = match stream.try_clone().and_then(|writer| {
        thread::Builder::new()
            .name(format!("{}-sender", conn))
            .spawn(move || run_sender(conn, writer, outbound_rx, stop_rx))
    }) {
        Ok(handle) => handle,
        Err(e) => {
            service.close_connection(conn)?;
            return Err(e.into());
        }
    };
    lifecycle.advance(ConnectionState::Active);
    info!("Rate stream {} opened for {}", conn, peer);

    let outcome = read_requests(service, conn, &stream, &outbound_tx);

    lifecycle.advance(ConnectionState::Closing);
    match &outcome {
        Ok(()) => info!("Client {} on {} has closed the stream", peer, conn),
        Err(e) => error!("Unable to read from client {} on {}: {}", peer, conn, e),
    }
    if let Err(e) = service.close_connection(conn) {
        error!("Failed to remove subscriptions of {}: {}", conn, e);
    }
    drop(outbound_tx);
    let _ = stop_tx.send(());
    let _ = stream.shutdown(Shutdown::Both);
    if sender.join().is_err() {
        error!("Sender thread of {} panicked", conn);
    }
    lifecycle.advance(ConnectionState::Closed);
    debug!("{} is {:?}", conn, lifecycle.state());

    outcome
}

/// Inbound flow: reads subscribe requests until EOF or a transport error.
fn read_requests(
    service: &RateService,
    conn: ConnectionId,
    stream: &TcpStream,
    outbound: &Sender<StreamMessage>,
) -> Result<()> {
    let mut reader = FrameReader::new(stream);

    loop {
        match reader.read_frame::<RateRequest>() {
            Ok(None) => return Ok(()),
            Ok(Some(request)) => {
                if let Err(err) = service.subscribe(conn, &request) {
                    warn!("Rejected subscription on {}: {}", conn, err);
                    reply(conn, outbound, err)?;
                }
            }
            Err(RatesError::Json(e)) => {
                warn!("Malformed subscribe request on {}: {}", conn, e);
                reply(conn, outbound, StreamError::malformed(format!("malformed request: {}", e)))?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Queues an in-band error behind any pending updates.
///
/// Unlike broadcast updates, an in-band error waits up to `IN_BAND_TIMEOUT`
/// for the sender to make room. It is dropped only if the queue stays full.
fn reply(conn: ConnectionId, outbound: &Sender<StreamMessage>, err: StreamError) -> Result<()> {
    match outbound.send_timeout(StreamMessage::Error(err), IN_BAND_TIMEOUT) {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(_)) => {
            warn!("Outbound buffer full for {}: dropping in-band error", conn);
            Ok(())
        }
        Err(SendTimeoutError::Disconnected(_)) => {
            Err(RatesError::Transport(format!("{} sender has stopped", conn)))
        }
    }
}

/// Outbound flow: the single writer of the connection.
///
/// Stops on the stop signal, when every producer is gone, or on the first
/// failed write. The stop signal is checked before every write, so nothing is
/// written once it is raised. A failed write also shuts the socket down so the
/// inbound flow wakes up and tears the connection down.
fn run_sender(
    conn: ConnectionId,
    mut writer: TcpStream,
    outbound: Receiver<StreamMessage>,
    stop: Receiver<()>,
) {
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(outbound) -> msg => match msg {
                Ok(message) => {
                    if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                    if let Err(e) = write_frame(&mut writer, &message) {
                        error!("Unable to send to {}: {}", conn, e);
                        let _ = writer.shutdown(Shutdown::Both);
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
    let abandoned = outbound.len();
    if abandoned > 0 {
        debug!("{} abandoned {} pending frames", conn, abandoned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rates_common::{Currency, RateRequest, RateResponse};
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Instant;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    fn update() -> StreamMessage {
        StreamMessage::Rate(RateResponse {
            base: Currency::EUR,
            destination: Currency::USD,
            rate: 1.1,
            timestamp: 0,
        })
    }

    #[test]
    fn nothing_is_written_after_stop() {
        let (server, mut client) = socket_pair();
        let (outbound_tx, outbound_rx) = bounded(8);
        for _ in 0..8 {
            outbound_tx.send(update()).unwrap();
        }
        let (stop_tx, stop_rx) = bounded(1);
        stop_tx.send(()).unwrap();

        run_sender(ConnectionId(1), server, outbound_rx, stop_rx);

        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert!(received.is_empty());
    }

    #[test]
    fn in_band_error_waits_for_room() {
        let (outbound_tx, outbound_rx) = bounded(1);
        outbound_tx.send(update()).unwrap();
        let drain = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let first = outbound_rx.recv().unwrap();
            let second = outbound_rx.recv().unwrap();
            (first, second)
        });

        let request = RateRequest::from_anchor(Currency::USD);
        reply(ConnectionId(1), &outbound_tx, StreamError::duplicate(request)).unwrap();

        let (first, second) = drain.join().unwrap();
        assert!(matches!(first, StreamMessage::Rate(_)));
        match second {
            StreamMessage::Error(err) => assert_eq!(err.detail, Some(request)),
            other => panic!("expected in-band error, got {:?}", other),
        }
    }

    #[test]
    fn in_band_error_is_dropped_when_the_queue_stays_full() {
        let (outbound_tx, _outbound_rx) = bounded(1);
        outbound_tx.send(update()).unwrap();

        let started = Instant::now();
        let request = RateRequest::from_anchor(Currency::GBP);
        reply(ConnectionId(1), &outbound_tx, StreamError::duplicate(request)).unwrap();
        assert!(started.elapsed() >= IN_BAND_TIMEOUT);
        assert_eq!(outbound_tx.len(), 1);
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Created);
        assert!(lifecycle.advance(ConnectionState::Active));
        assert!(!lifecycle.advance(ConnectionState::Created));
        assert!(lifecycle.advance(ConnectionState::Closing));
        assert!(lifecycle.advance(ConnectionState::Closed));
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn nothing_leaves_closed() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(ConnectionState::Closed));
        for state in [
            ConnectionState::Created,
            ConnectionState::Active,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            assert!(!lifecycle.advance(state));
        }
    }

    #[test]
    fn created_may_close_directly() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(ConnectionState::Closing));
        assert!(lifecycle.advance(ConnectionState::Closed));
    }
}
