//! Non-blocking, failover-capable transport (§4.4).
//!
//! No analog in the teacher (it hands all of this to `tokio`). Grounded on
//! `SleepingPills-bushhammer`'s `net` module for the chunked,
//! `WouldBlock`-tolerant read/write discipline, and on the pre-async
//! `stomp-rs` `Session` for the readiness-poll-with-timeout shape its
//! `mio::EventLoop`-driven reads and writes had — reimplemented against
//! `mio` 0.8's `Poll`/`Events`/`Interest` directly, since `EventLoop` no
//! longer exists in modern `mio`.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use rand::seq::SliceRandom;

use crate::error::{Result, StompError};
use crate::frame::Frame;
use crate::observer::{HeartbeatEmitter, Observer, ServerAliveObserver};
use crate::parser::{ParseEvent, Parser};
use crate::uri::{BrokerUri, Endpoint};

const SOCKET_TOKEN: Token = Token(0);
const WRITE_SLEEP: Duration = Duration::from_micros(2500);
const EMPTY_READ_SLEEP: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_read_bytes: usize,
    pub max_write_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_read_bytes: 8 * 1024,
            max_write_bytes: 8 * 1024,
        }
    }
}

/// Non-blocking socket plus the incremental parser feeding off it.
pub struct Connection {
    poll: Poll,
    stream: Option<TcpStream>,
    active_host: Option<String>,
    parser: Parser,
    config: ConnectionConfig,
    observers: Vec<Box<dyn Observer>>,
    heartbeat_emitter: Option<HeartbeatEmitter>,
    server_alive: Option<ServerAliveObserver>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> io::Result<Self> {
        Ok(Connection {
            poll: Poll::new()?,
            stream: None,
            active_host: None,
            parser: Parser::new(),
            config,
            observers: Vec::new(),
            heartbeat_emitter: None,
            server_alive: None,
        })
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Arms the negotiated heartbeat cadence (§4.4 `HeartbeatEmitter` /
    /// `ServerAliveObserver`). `send_interval` of zero disables outbound
    /// heartbeats; `recv_deadline` of zero disables the server-alive check.
    pub fn configure_heartbeat(&mut self, send_interval: Duration, recv_deadline: Duration) {
        self.heartbeat_emitter = (!send_interval.is_zero()).then(|| HeartbeatEmitter::new(send_interval));
        self.server_alive = (!recv_deadline.is_zero()).then(|| ServerAliveObserver::new(recv_deadline));
    }

    pub fn set_legacy_mode(&mut self, legacy: bool) {
        self.parser.set_legacy_mode(legacy);
    }

    pub fn active_host(&self) -> Option<&str> {
        self.active_host.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Tries each endpoint in order (shuffled first if `randomize`),
    /// returning on first success (§4.4 "Endpoint selection").
    pub fn connect(&mut self, uri: &BrokerUri) -> Result<()> {
        let mut endpoints = uri.endpoints.clone();
        if uri.randomize {
            endpoints.shuffle(&mut rand::thread_rng());
        }

        let mut last_err: Option<io::Error> = None;
        for endpoint in &endpoints {
            match self.try_connect(endpoint) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("failed to connect to {}: {e}", endpoint.to_socket_addr_string());
                    last_err = Some(e);
                }
            }
        }

        Err(StompError::ConnectionFailed {
            attempted: endpoints.iter().map(Endpoint::to_socket_addr_string).collect(),
            last: Box::new(last_err.unwrap_or_else(|| io::Error::other("no endpoints"))),
        })
    }

    fn try_connect(&mut self, endpoint: &Endpoint) -> io::Result<()> {
        let addr = endpoint
            .to_socket_addr_string()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{e}")))?;
        let mut stream = TcpStream::connect(addr)?;
        self.poll
            .registry()
            .register(&mut stream, SOCKET_TOKEN, Interest::WRITABLE)?;

        let deadline = Instant::now() + self.config.connect_timeout;
        let mut events = Events::with_capacity(4);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let _ = self.poll.registry().deregister(&mut stream);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
            }
            self.poll.poll(&mut events, Some(remaining))?;
            if events.iter().any(|e| e.token() == SOCKET_TOKEN) {
                if let Some(err) = stream.take_error()? {
                    let _ = self.poll.registry().deregister(&mut stream);
                    return Err(err);
                }
                break;
            }
        }

        self.poll
            .registry()
            .reregister(&mut stream, SOCKET_TOKEN, Interest::READABLE)?;
        self.stream = Some(stream);
        self.active_host = Some(endpoint.to_socket_addr_string());
        debug!("connected to {}", endpoint.to_socket_addr_string());
        Ok(())
    }

    /// Writes `frame` in chunks of at most `max_write_bytes`, retrying on
    /// `WouldBlock` until the whole frame is written or `write_timeout`
    /// elapses with no forward progress.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        trace!("sending {}", frame.command);
        let bytes = frame.to_bytes();
        self.write_bytes(&bytes)?;
        for observer in &mut self.observers {
            observer.sent_frame(frame);
        }
        if let Some(emitter) = self.heartbeat_emitter.as_mut() {
            emitter.sent_frame(frame);
        }
        Ok(())
    }

    /// Emits a single heartbeat byte (§4.4 `sendAlive`).
    pub fn send_alive(&mut self) -> Result<()> {
        trace!("sending heartbeat byte");
        self.write_bytes(b"\n")
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let host = self.active_host.clone().unwrap_or_default();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| StompError::connection(host.clone(), io::Error::new(io::ErrorKind::NotConnected, "not connected")))?;

        let mut written = 0usize;
        let mut last_progress = Instant::now();
        while written < data.len() {
            let end = (written + self.config.max_write_bytes).min(data.len());
            match stream.write(&data[written..end]) {
                Ok(0) => {
                    return Err(StompError::connection(host, io::Error::new(io::ErrorKind::WriteZero, "write returned zero")));
                }
                Ok(n) => {
                    written += n;
                    last_progress = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if last_progress.elapsed() > self.config.write_timeout {
                        return Err(StompError::connection(host, io::Error::new(io::ErrorKind::TimedOut, "write timed out")));
                    }
                    thread::sleep(WRITE_SLEEP);
                }
                Err(e) => return Err(StompError::connection(host, e)),
            }
        }
        Ok(())
    }

    /// Drains any already-parsed frame first; otherwise waits (via a
    /// readiness poll with `read_timeout`) for new bytes. `wait_callback`
    /// is invoked between polls and may abort the wait by returning
    /// `false` (§4.4, §5 "Cooperative wait callback").
    pub fn read_frame(&mut self, mut wait_callback: Option<&mut dyn FnMut() -> bool>) -> Result<Option<Frame>> {
        if let Some(frame) = self.drain_parsed()? {
            return Ok(Some(frame));
        }

        let host = self.active_host.clone().unwrap_or_default();
        let deadline = Instant::now() + self.config.read_timeout;
        let mut events = Events::with_capacity(4);
        let mut buf = vec![0u8; self.config.max_read_bytes];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if let Some(cb) = wait_callback.as_deref_mut() {
                if !cb() {
                    return Ok(None);
                }
            }
            if self.server_alive.as_ref().is_some_and(ServerAliveObserver::overdue) {
                return Err(StompError::HeartbeatTimeout);
            }
            if self.heartbeat_emitter.as_mut().is_some_and(HeartbeatEmitter::due) {
                self.send_alive()?;
            }

            self.poll.poll(&mut events, Some(remaining.min(Duration::from_millis(100))))?;
            if !events.iter().any(|e| e.token() == SOCKET_TOKEN) {
                continue;
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| StompError::connection(host.clone(), io::Error::new(io::ErrorKind::NotConnected, "not connected")))?;

            match stream.read(&mut buf) {
                Ok(0) => {
                    for observer in &mut self.observers {
                        observer.empty_read();
                    }
                    thread::sleep(EMPTY_READ_SLEEP);
                    return Ok(None);
                }
                Ok(n) => {
                    self.parser.add_data(&buf[..n]);
                    if let Some(frame) = self.drain_parsed()? {
                        return Ok(Some(frame));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(StompError::connection(host, e)),
            }
        }
    }

    /// Drains a frame the parser can already produce from previously-read
    /// bytes, without performing a new socket read (used by
    /// `flush_buffered_frames`, which must not block or read ahead).
    pub fn poll_buffered(&mut self) -> Result<Option<Frame>> {
        self.drain_parsed()
    }

    fn drain_parsed(&mut self) -> Result<Option<Frame>> {
        while let Some(event) = self.parser.next_event() {
            match event {
                ParseEvent::Frame(frame) => {
                    for observer in &mut self.observers {
                        observer.received_frame(&frame);
                    }
                    if let Some(server_alive) = self.server_alive.as_mut() {
                        server_alive.received_frame(&frame);
                    }
                    return Ok(Some(frame));
                }
                ParseEvent::Heartbeat => {
                    for observer in &mut self.observers {
                        observer.empty_line_read();
                    }
                    if let Some(server_alive) = self.server_alive.as_mut() {
                        server_alive.empty_line_read();
                    }
                }
            }
        }
        if self.parser.is_buffer_empty() {
            for observer in &mut self.observers {
                observer.empty_buffer();
            }
        }
        Ok(None)
    }

    /// Shuts down both halves of the socket and clears the active-host
    /// record. Subsequent operations fail with a not-connected error.
    pub fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("disconnecting from {}", self.active_host.as_deref().unwrap_or("<unknown>"));
            let _ = self.poll.registry().deregister(&mut stream);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.active_host = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connects_and_round_trips_a_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"CONNECT\n"));
            sock.write_all(b"CONNECTED\nversion:1.2\n\n\x00").unwrap();
        });

        let mut conn = Connection::new(ConnectionConfig::default()).unwrap();
        let uri = crate::uri::parse(&format!("tcp://{addr}")).unwrap();
        conn.connect(&uri).unwrap();
        assert!(conn.is_connected());

        let frame = Frame::new("CONNECT").legacy(true).with_header("accept-version", "1.2");
        conn.write_frame(&frame).unwrap();

        let mut received = None;
        for _ in 0..50 {
            if let Some(f) = conn.read_frame(None).unwrap() {
                received = Some(f);
                break;
            }
        }
        let received = received.expect("expected CONNECTED frame");
        assert_eq!(received.command, "CONNECTED");
        assert_eq!(received.header("version"), Some("1.2"));

        conn.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn failover_skips_dead_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (_sock, _) = listener.accept().unwrap();
        });

        let mut conn = Connection::new(ConnectionConfig::default()).unwrap();
        let uri = crate::uri::parse(&format!("failover://(tcp://127.0.0.1:1,tcp://{addr})")).unwrap();
        conn.connect(&uri).unwrap();
        assert_eq!(conn.active_host(), Some(addr.to_string().as_str()));
        conn.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn failover_with_every_endpoint_dead_reports_all_attempts() {
        let mut conn = Connection::new(ConnectionConfig {
            connect_timeout: Duration::from_millis(200),
            ..ConnectionConfig::default()
        })
        .unwrap();
        let uri = crate::uri::parse("failover://(tcp://127.0.0.1:1,tcp://127.0.0.1:2)").unwrap();
        let err = conn.connect(&uri).unwrap_err();
        match err {
            StompError::ConnectionFailed { attempted, .. } => {
                assert_eq!(attempted, vec!["127.0.0.1:1", "127.0.0.1:2"]);
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }
}
