//! Session bring-up, receipt-based synchronous sends, and the public
//! producer/consumer surface (§4.5).
//!
//! The CONNECT/CONNECTED handshake is grounded on the teacher's
//! `client_handshake`; synchronous receipt-waiting and `unprocessed_frames`
//! buffering are new, modeled on `stomp-rs`'s receipt bookkeeping and
//! `Laymer-stomping-rs`'s `ConnectionState.receipts` map.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::connection::{Connection, ConnectionConfig};
use crate::error::{Result, StompError};
use crate::frame::Frame;
use crate::idgen;
use crate::protocol::{AckMode, ConnectOptions, Dialect, Protocol, SubscribeOptions, Version};
use crate::state::{StateKind, StateMachine};
use crate::subscription::{Subscription, Subscriptions};
use crate::transform;
use crate::uri;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub client_id: Option<String>,
    pub host: Option<String>,
    pub heartbeat: (u32, u32),
    pub sync: bool,
    pub connect_timeout: Duration,
    pub receipt_wait: Duration,
    pub dialect: Dialect,
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            login: None,
            passcode: None,
            client_id: None,
            host: None,
            heartbeat: (0, 0),
            sync: true,
            connect_timeout: Duration::from_secs(10),
            receipt_wait: Duration::from_secs(5),
            dialect: Dialect::Generic,
            connection: ConnectionConfig::default(),
        }
    }
}

/// A live STOMP session: owns the Connection for its lifetime (§3
/// "destroying the Session disconnects the Connection").
pub struct Client {
    connection: Connection,
    protocol: Protocol,
    state: StateMachine,
    subscriptions: Subscriptions,
    unprocessed_frames: VecDeque<Frame>,
    session_id: Option<String>,
    config: ClientConfig,
}

impl Client {
    /// Opens the transport, performs the CONNECT/CONNECTED handshake, and
    /// returns a session ready for use (§4.5 "Bring-up").
    pub fn connect(broker_uri: &str, config: ClientConfig) -> Result<Self> {
        let parsed = uri::parse(broker_uri)?;
        let mut connection = Connection::new(config.connection.clone())?;
        connection.set_legacy_mode(true);
        connection.connect(&parsed)?;

        let mut client = Client {
            connection,
            protocol: Protocol::new(Version::V1_0, config.dialect),
            state: StateMachine::new(),
            subscriptions: Subscriptions::new(),
            unprocessed_frames: VecDeque::new(),
            session_id: None,
            config,
        };
        client.handshake()?;
        Ok(client)
    }

    fn handshake(&mut self) -> Result<()> {
        let connect_frame = Protocol::new(Version::V1_0, self.config.dialect).connect(&ConnectOptions {
            login: self.config.login.clone(),
            passcode: self.config.passcode.clone(),
            client_id: self.config.client_id.clone(),
            host: self.config.host.clone(),
            heartbeat: self.config.heartbeat,
            accept_versions: vec![Version::V1_0, Version::V1_1, Version::V1_2],
        });
        self.connection.write_frame(&connect_frame)?;

        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(StompError::connection(
                    self.connection.active_host().unwrap_or_default().to_string(),
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "CONNECTED not received"),
                ));
            }
            match self.connection.read_frame(None)? {
                Some(frame) if frame.command == "CONNECTED" => {
                    let version = frame
                        .header("version")
                        .and_then(Version::parse)
                        .unwrap_or(Version::V1_0);
                    self.connection.set_legacy_mode(version.is_legacy());
                    self.session_id = frame.header("session").map(str::to_string);
                    self.protocol = Protocol::new(version, self.config.dialect);
                    self.negotiate_heartbeat(frame.header("heart-beat"));
                    return Ok(());
                }
                Some(frame) if frame.command == "ERROR" => return Err(StompError::ErrorFrame { frame }),
                Some(other) => self.unprocessed_frames.push_back(other),
                None => {}
            }
        }
    }

    /// Negotiates the effective heartbeat cadence from the client's
    /// `(send, recv)` tuple and the server's `heart-beat` header, per the
    /// STOMP negotiation rule: the effective interval is the max of the two
    /// sides' values, or zero (disabled) if either side offered zero.
    fn negotiate_heartbeat(&mut self, server_heart_beat: Option<&str>) {
        let (client_send, client_recv) = self.config.heartbeat;
        let (server_send, server_recv) = server_heart_beat
            .and_then(|h| h.split_once(','))
            .and_then(|(a, b)| Some((a.trim().parse().ok()?, b.trim().parse().ok()?)))
            .unwrap_or((0u32, 0u32));

        let effective_send = if client_send != 0 && server_recv != 0 {
            client_send.max(server_recv)
        } else {
            0
        };
        let effective_recv = if client_recv != 0 && server_send != 0 {
            client_recv.max(server_send)
        } else {
            0
        };
        self.connection.configure_heartbeat(
            Duration::from_millis(effective_send.into()),
            Duration::from_millis(u64::from(effective_recv) * 2),
        );
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn version(&self) -> Version {
        self.protocol.version
    }

    pub fn state(&self) -> &StateKind {
        self.state.state()
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Writes `frame`. If `sync` (or the config default) is true, injects a
    /// fresh `receipt` header — always overwriting any the caller set,
    /// per the Open Questions decision on `waitForReceipt` — and blocks
    /// until a matching RECEIPT arrives or `receipt_wait` elapses.
    fn write_with_receipt(&mut self, mut frame: Frame, sync: Option<bool>) -> Result<()> {
        let sync = sync.unwrap_or(self.config.sync);
        if !sync {
            self.connection.write_frame(&frame)?;
            return Ok(());
        }
        let receipt_id = idgen::generate("receipt")?;
        frame.set_header("receipt", receipt_id.clone());
        self.connection.write_frame(&frame)?;
        let result = self.wait_for_receipt(&receipt_id);
        idgen::release(&receipt_id);
        result
    }

    fn wait_for_receipt(&mut self, receipt_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.config.receipt_wait;
        loop {
            if Instant::now() >= deadline {
                return Err(StompError::MissingReceipt);
            }
            match self.connection.read_frame(None)? {
                Some(frame) if frame.command == "RECEIPT" => {
                    return match frame.header("receipt-id") {
                        Some(id) if id == receipt_id => Ok(()),
                        other => Err(StompError::UnexpectedResponse(format!(
                            "expected receipt-id {receipt_id}, got {other:?}"
                        ))),
                    };
                }
                Some(frame) if frame.command == "ERROR" => return Err(StompError::ErrorFrame { frame }),
                Some(other) => self.unprocessed_frames.push_back(other),
                None => {}
            }
        }
    }

    pub fn send(
        &mut self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        headers: &[(String, String)],
        sync: Option<bool>,
    ) -> Result<()> {
        let transaction = self.state.check_send()?;
        let mut frame = Frame::new("SEND")
            .legacy(self.protocol.version.is_legacy())
            .with_header("destination", destination)
            .with_body(body);
        for (key, value) in headers {
            frame.set_header(key.clone(), value.clone());
        }
        if let Some(tx) = transaction {
            frame.set_header("transaction", tx);
        }
        self.write_with_receipt(frame, sync)
    }

    /// Sends `map` as a `jms-map-json` transformed body (§6 "JSON map
    /// transformation").
    pub fn send_map(
        &mut self,
        destination: &str,
        map: &serde_json::Map<String, serde_json::Value>,
        sync: Option<bool>,
    ) -> Result<()> {
        let transaction = self.state.check_send()?;
        let mut frame = transform::encode("SEND", map)?
            .legacy(self.protocol.version.is_legacy())
            .with_header("destination", destination);
        if let Some(tx) = transaction {
            frame.set_header("transaction", tx);
        }
        self.write_with_receipt(frame, sync)
    }

    /// Decodes `frame`'s body as a JSON map if it carries the
    /// `transformation: jms-map-json` header, leaving the raw body
    /// untouched either way.
    pub fn as_map(&self, frame: &Frame) -> Option<Result<serde_json::Map<String, serde_json::Value>>> {
        transform::is_map_json(frame).then(|| transform::decode(frame))
    }

    pub fn subscribe(&mut self, destination: &str, ack: AckMode) -> Result<String> {
        self.subscribe_with(SubscribeOptions {
            destination: destination.to_string(),
            ack,
            ..Default::default()
        })
    }

    pub fn subscribe_with(&mut self, mut opts: SubscribeOptions) -> Result<String> {
        let id = match opts.id.clone() {
            Some(id) => id,
            None => idgen::generate("sub")?,
        };
        opts.id = Some(id.clone());
        let frame = self.protocol.subscribe(&opts)?;
        self.write_with_receipt(frame, None)?;
        self.state.subscribe()?;
        self.subscriptions
            .insert(Subscription::new(id.clone(), opts.destination, opts.ack.as_str()));
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: &str) -> Result<()> {
        let subscription = self
            .subscriptions
            .by_id(id)
            .cloned()
            .ok_or_else(|| StompError::Protocol(format!("no such subscription: {id}")))?;
        let frame = self.protocol.unsubscribe(id, &subscription.destination);
        self.write_with_receipt(frame, None)?;
        self.subscriptions.remove(id);
        let last_removed = self.subscriptions.is_empty();
        let buffer_empty = self.unprocessed_frames.is_empty();
        self.state.unsubscribe(last_removed, buffer_empty)?;
        idgen::release(id);
        Ok(())
    }

    pub fn ack(&mut self, received: &Frame) -> Result<()> {
        let transaction = self.state.check_ack()?;
        let frame = self
            .protocol
            .ack(received, received.header("subscription"), transaction.as_deref());
        self.write_with_receipt(frame, None)
    }

    pub fn nack(&mut self, received: &Frame, requeue: Option<bool>) -> Result<()> {
        let transaction = self.state.check_ack()?;
        let frame = self
            .protocol
            .nack(received, received.header("subscription"), transaction.as_deref(), requeue)?;
        self.write_with_receipt(frame, None)
    }

    pub fn begin(&mut self) -> Result<String> {
        let transaction_id = idgen::generate("tx")?;
        let frame = self.protocol.begin(&transaction_id);
        self.write_with_receipt(frame, None)?;
        self.state.begin(transaction_id.clone())?;
        Ok(transaction_id)
    }

    pub fn commit(&mut self) -> Result<()> {
        let transaction_id = self
            .state
            .state()
            .transaction_id()
            .ok_or_else(|| StompError::InvalidState {
                state: self.state.state().name().to_string(),
                operation: "commit".to_string(),
            })?
            .to_string();
        let frame = self.protocol.commit(&transaction_id);
        self.write_with_receipt(frame, None)?;
        self.state.commit()?;
        idgen::release(&transaction_id);
        Ok(())
    }

    pub fn abort(&mut self) -> Result<()> {
        let transaction_id = self
            .state
            .state()
            .transaction_id()
            .ok_or_else(|| StompError::InvalidState {
                state: self.state.state().name().to_string(),
                operation: "abort".to_string(),
            })?
            .to_string();
        let frame = self.protocol.abort(&transaction_id);
        self.write_with_receipt(frame, None)?;
        self.state.abort()?;
        idgen::release(&transaction_id);
        Ok(())
    }

    /// Drains `unprocessed_frames` first, then falls back to the
    /// connection. When draining completes and the buffer runs dry, moves
    /// the state machine to its producer peer state (§4.6).
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.state.check_read()?;
        if let Some(frame) = self.unprocessed_frames.pop_front() {
            return Ok(Some(frame));
        }
        let frame = self.connection.read_frame(None)?;
        match &frame {
            Some(f) if f.command == "ERROR" => return Err(StompError::ErrorFrame { frame: f.clone() }),
            Some(_) => {}
            None => {
                if matches!(
                    self.state.state(),
                    StateKind::DrainingConsumer | StateKind::DrainingConsumerInTx { .. }
                ) {
                    self.state.drained();
                }
            }
        }
        Ok(frame)
    }

    /// Yields the buffered `unprocessed_frames` followed by anything the
    /// parser can already produce from bytes already read — performs no
    /// new socket reads (§4.5 `flushBufferedFrames`).
    pub fn flush_buffered_frames(&mut self) -> Vec<Frame> {
        let mut out: Vec<Frame> = self.unprocessed_frames.drain(..).collect();
        while let Ok(Some(frame)) = self.connection.poll_buffered() {
            out.push(frame);
        }
        out
    }

    /// Sends DISCONNECT (errors suppressed) and tears down the transport.
    pub fn disconnect(&mut self) {
        if self.connection.is_connected() {
            let frame = self.protocol.disconnect(self.config.client_id.as_deref());
            let _ = self.connection.write_frame(&frame);
        }
        self.connection.disconnect();
        self.unprocessed_frames.clear();
        self.session_id = None;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn s4_sync_send_without_receipt_raises_missing_receipt() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"CONNECT\n"));
            sock.write_all(b"CONNECTED\nversion:1.2\nsession:s-1\n\n\x00").unwrap();

            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"SEND\n"));
            // Server only sends an unrelated MESSAGE, never a RECEIPT.
            sock.write_all(b"MESSAGE\ndestination:/queue/a\nsubscription:sub-0\nmessage-id:m-1\n\nhi\x00")
                .unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let config = ClientConfig {
            receipt_wait: Duration::from_millis(100),
            connection: ConnectionConfig {
                read_timeout: Duration::from_millis(50),
                ..ConnectionConfig::default()
            },
            ..ClientConfig::default()
        };
        let mut client = Client::connect(&format!("tcp://{addr}"), config).unwrap();
        assert_eq!(client.session_id(), Some("s-1"));
        assert_eq!(client.version(), Version::V1_2);

        let err = client.send("/queue/a", b"hi".to_vec(), &[], Some(true)).unwrap_err();
        assert!(matches!(err, StompError::MissingReceipt));

        let buffered = client.flush_buffered_frames();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].command, "MESSAGE");

        client.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn s6_subscribe_then_unsubscribe_transitions_state() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let _ = sock.read(&mut buf).unwrap();
            sock.write_all(b"CONNECTED\nversion:1.2\n\n\x00").unwrap();

            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"SUBSCRIBE\n"));
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let receipt_id = request.lines().find_map(|l| l.strip_prefix("receipt:")).unwrap().to_string();
            sock.write_all(format!("RECEIPT\nreceipt-id:{receipt_id}\n\n\x00").as_bytes())
                .unwrap();

            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"UNSUBSCRIBE\n"));
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let receipt_id = request.lines().find_map(|l| l.strip_prefix("receipt:")).unwrap().to_string();
            sock.write_all(format!("RECEIPT\nreceipt-id:{receipt_id}\n\n\x00").as_bytes())
                .unwrap();
        });

        let config = ClientConfig::default();
        let mut client = Client::connect(&format!("tcp://{addr}"), config).unwrap();
        let sub_id = client.subscribe("/queue/a", AckMode::Auto).unwrap();
        assert_eq!(client.state().name(), "Consumer");
        assert_eq!(client.subscriptions().len(), 1);

        client.unsubscribe(&sub_id).unwrap();
        assert_eq!(client.state().name(), "Producer");

        client.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn negotiated_heartbeat_emits_alive_bytes_without_traffic() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            let mut buf = [0u8; 512];
            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"CONNECT\n"));
            // Server asks for a heartbeat from the client every 20ms
            // (second field of its own heart-beat header) but promises
            // nothing itself.
            sock.write_all(b"CONNECTED\nversion:1.2\nheart-beat:0,20\n\n\x00").unwrap();

            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"SUBSCRIBE\n"));
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let receipt_id = request.lines().find_map(|l| l.strip_prefix("receipt:")).unwrap().to_string();
            sock.write_all(format!("RECEIPT\nreceipt-id:{receipt_id}\n\n\x00").as_bytes())
                .unwrap();

            // Expect at least one lone heartbeat byte even with no other
            // application traffic in flight once the client is reading.
            let n = sock.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"\n"), "expected a heartbeat byte, got {:?}", &buf[..n]);
        });

        let config = ClientConfig {
            heartbeat: (20, 0),
            connection: ConnectionConfig {
                read_timeout: Duration::from_millis(300),
                ..ConnectionConfig::default()
            },
            ..ClientConfig::default()
        };
        let mut client = Client::connect(&format!("tcp://{addr}"), config).unwrap();
        client.subscribe("/queue/a", AckMode::Auto).unwrap();
        // No application traffic; read_frame's internal poll loop (capped
        // at 100ms ticks within the 300ms read_timeout) is what drives the
        // heartbeat emitter to fire at least once.
        let _ = client.read_frame();

        server.join().unwrap();
        client.disconnect();
    }

    #[test]
    fn send_map_round_trips_through_as_map() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let _ = sock.read(&mut buf).unwrap();
            sock.write_all(b"CONNECTED\nversion:1.2\n\n\x00").unwrap();

            let n = sock.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            assert!(request.contains("transformation:jms-map-json"));
            let receipt_id = request.lines().find_map(|l| l.strip_prefix("receipt:")).unwrap().to_string();
            sock.write_all(format!("RECEIPT\nreceipt-id:{receipt_id}\n\n\x00").as_bytes())
                .unwrap();
        });

        let mut client = Client::connect(&format!("tcp://{addr}"), ClientConfig::default()).unwrap();
        let mut map = serde_json::Map::new();
        map.insert("a".to_string(), serde_json::Value::from(1));
        client.send_map("/queue/a", &map, None).unwrap();

        let received = Frame::new("MESSAGE").with_header("transformation", "jms-map-json").with_body(b"{\"a\":1}".to_vec());
        let decoded = client.as_map(&received).unwrap().unwrap();
        assert_eq!(decoded, map);

        client.disconnect();
        server.join().unwrap();
    }
}
