//! Protocol (dialect layer): constructs outbound verb frames per version
//! and broker flavor (§4.3).
//!
//! The teacher's `ToServer::to_frame` match arms are the base for the verb
//! constructors; dialect selection and ack-mode validation are new,
//! modeled as one `Protocol` struct carrying a `Dialect` tag rather than a
//! trait object per dialect (Design Notes §9: "tagged variants carrying
//! dialect configuration" — there's no behavior here that needs dynamic
//! dispatch, just a handful of per-dialect header tweaks).

use crate::error::{Result, StompError};
use crate::frame::Frame;

/// STOMP protocol version, with total ordering per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    pub fn has_version(self, other: Version) -> bool {
        self >= other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    pub fn parse(s: &str) -> Option<Version> {
        match s {
            "1.0" => Some(Version::V1_0),
            "1.1" => Some(Version::V1_1),
            "1.2" => Some(Version::V1_2),
            _ => None,
        }
    }

    pub fn is_legacy(self) -> bool {
        self == Version::V1_0
    }
}

/// Ack mode for SUBSCRIBE, version-gated per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    fn validate(self, version: Version) -> Result<()> {
        match self {
            AckMode::ClientIndividual if !version.has_version(Version::V1_1) => Err(
                StompError::Protocol(format!("ack mode 'client-individual' requires STOMP >= 1.1, got {}", version.as_str())),
            ),
            _ => Ok(()),
        }
    }
}

/// Broker-specific extension set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Generic,
    ActiveMq,
    RabbitMq,
    Apollo,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub client_id: Option<String>,
    pub host: Option<String>,
    pub heartbeat: (u32, u32),
    pub accept_versions: Vec<Version>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub destination: String,
    pub ack: AckMode,
    pub id: Option<String>,
    pub selector: Option<String>,
    pub durable: bool,
    /// ActiveMQ `activemq.prefetchSize` / RabbitMQ `prefetch-count`.
    pub prefetch: Option<u32>,
}

/// Constructs the outbound verb frames for one negotiated (version, dialect)
/// pair. A fresh `Protocol` is installed once CONNECTED is received (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct Protocol {
    pub version: Version,
    pub dialect: Dialect,
}

impl Protocol {
    pub fn new(version: Version, dialect: Dialect) -> Self {
        Protocol { version, dialect }
    }

    pub fn connect(&self, opts: &ConnectOptions) -> Frame {
        let mut frame = Frame::new("CONNECT").legacy(true);
        if opts.login.is_some() || opts.passcode.is_some() {
            frame.set_header("login", opts.login.clone().unwrap_or_default());
            frame.set_header("passcode", opts.passcode.clone().unwrap_or_default());
        }
        if let Some(client_id) = &opts.client_id {
            frame.set_header("client-id", client_id.clone());
        }
        if let Some(host) = &opts.host {
            frame.set_header("host", host.clone());
        }
        let versions = opts
            .accept_versions
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(",");
        frame.set_header("accept-version", versions);
        frame.set_header(
            "heart-beat",
            format!("{},{}", opts.heartbeat.0, opts.heartbeat.1),
        );
        frame
    }

    pub fn subscribe(&self, opts: &SubscribeOptions) -> Result<Frame> {
        opts.ack.validate(self.version)?;
        let mut frame = Frame::new("SUBSCRIBE").legacy(self.version.is_legacy());
        frame.set_header("destination", opts.destination.clone());
        frame.set_header("ack", opts.ack.as_str());
        if let Some(id) = &opts.id {
            frame.set_header("id", id.clone());
        }
        if let Some(selector) = &opts.selector {
            frame.set_header("selector", selector.clone());
        }
        match self.dialect {
            Dialect::ActiveMq => {
                if let Some(prefetch) = opts.prefetch {
                    frame.set_header("activemq.prefetchSize", prefetch.to_string());
                }
                if opts.durable {
                    if let Some(id) = &opts.id {
                        frame.set_header("activemq.subscriptionName", id.clone());
                        frame.set_header("durable-subscriber-name", id.clone());
                    }
                }
            }
            Dialect::RabbitMq => {
                if let Some(prefetch) = opts.prefetch {
                    frame.set_header("prefetch-count", prefetch.to_string());
                }
                if opts.durable {
                    frame.set_header("persistent", "true");
                }
            }
            Dialect::Generic | Dialect::Apollo => {}
        }
        Ok(frame)
    }

    pub fn unsubscribe(&self, id: &str, destination: &str) -> Frame {
        Frame::new("UNSUBSCRIBE")
            .legacy(self.version.is_legacy())
            .with_header("id", id)
            .with_header("destination", destination)
    }

    pub fn begin(&self, transaction: &str) -> Frame {
        Frame::new("BEGIN")
            .legacy(self.version.is_legacy())
            .with_header("transaction", transaction)
    }

    pub fn commit(&self, transaction: &str) -> Frame {
        Frame::new("COMMIT")
            .legacy(self.version.is_legacy())
            .with_header("transaction", transaction)
    }

    pub fn abort(&self, transaction: &str) -> Frame {
        Frame::new("ABORT")
            .legacy(self.version.is_legacy())
            .with_header("transaction", transaction)
    }

    /// Builds an ACK frame for `received`, per the per-version id rule in
    /// §4.3 (and the ActiveMQ override, which prefers `ack` over
    /// `message-id` at V1_2 — identical to generic in practice since
    /// generic already prefers `ack` at V1_2).
    pub fn ack(&self, received: &Frame, subscription_id: Option<&str>, transaction: Option<&str>) -> Frame {
        let mut frame = Frame::new("ACK").legacy(self.version.is_legacy());
        self.apply_ack_nack_ids(&mut frame, received, subscription_id);
        if let Some(tx) = transaction {
            frame.set_header("transaction", tx);
        }
        frame
    }

    /// Builds a NACK frame. Disallowed at V1_0 (§4.3, S5). `requeue` is
    /// only honored by the RabbitMQ dialect; other dialects reject a
    /// non-null value.
    pub fn nack(
        &self,
        received: &Frame,
        subscription_id: Option<&str>,
        transaction: Option<&str>,
        requeue: Option<bool>,
    ) -> Result<Frame> {
        if self.version == Version::V1_0 {
            return Err(StompError::Protocol("NACK is not available at STOMP 1.0".into()));
        }
        if requeue.is_some() && self.dialect != Dialect::RabbitMq {
            return Err(StompError::Protocol(
                "'requeue' is only supported by the RabbitMQ dialect".into(),
            ));
        }
        let mut frame = Frame::new("NACK").legacy(false);
        self.apply_ack_nack_ids(&mut frame, received, subscription_id);
        if let Some(tx) = transaction {
            frame.set_header("transaction", tx);
        }
        if let (Dialect::RabbitMq, Some(requeue)) = (self.dialect, requeue) {
            frame.set_header("requeue", requeue.to_string());
        }
        Ok(frame)
    }

    fn apply_ack_nack_ids(&self, frame: &mut Frame, received: &Frame, subscription_id: Option<&str>) {
        match self.version {
            Version::V1_0 => {
                if let Some(message_id) = received.header("message-id") {
                    frame.set_header("message-id", message_id);
                }
            }
            Version::V1_1 => {
                if let Some(message_id) = received.header("message-id") {
                    frame.set_header("message-id", message_id);
                }
                if let Some(sub) = subscription_id.or_else(|| received.header("subscription")) {
                    frame.set_header("subscription", sub);
                }
            }
            Version::V1_2 => {
                let id = received
                    .header("ack")
                    .or_else(|| received.header("message-id"));
                if let Some(id) = id {
                    frame.set_header("id", id);
                }
            }
        }
    }

    pub fn disconnect(&self, client_id: Option<&str>) -> Frame {
        let mut frame = Frame::new("DISCONNECT").legacy(self.version.is_legacy());
        if let Some(client_id) = client_id {
            frame.set_header("client-id", client_id);
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_joins_accept_versions_and_heartbeat() {
        let proto = Protocol::new(Version::V1_0, Dialect::Generic);
        let frame = proto.connect(&ConnectOptions {
            accept_versions: vec![Version::V1_0, Version::V1_1, Version::V1_2],
            heartbeat: (0, 0),
            ..Default::default()
        });
        assert_eq!(frame.header("accept-version"), Some("1.0,1.1,1.2"));
        assert_eq!(frame.header("heart-beat"), Some("0,0"));
    }

    #[test]
    fn subscribe_rejects_client_individual_at_v10() {
        let proto = Protocol::new(Version::V1_0, Dialect::Generic);
        let err = proto
            .subscribe(&SubscribeOptions {
                destination: "/queue/a".into(),
                ack: AckMode::ClientIndividual,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StompError::Protocol(_)));
    }

    #[test]
    fn activemq_durable_subscribe_adds_headers() {
        let proto = Protocol::new(Version::V1_2, Dialect::ActiveMq);
        let frame = proto
            .subscribe(&SubscribeOptions {
                destination: "/queue/a".into(),
                ack: AckMode::Client,
                id: Some("sub-0".into()),
                durable: true,
                prefetch: Some(10),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(frame.header("activemq.prefetchSize"), Some("10"));
        assert_eq!(frame.header("activemq.subscriptionName"), Some("sub-0"));
        assert_eq!(frame.header("durable-subscriber-name"), Some("sub-0"));
    }

    #[test]
    fn rabbitmq_durable_subscribe_sets_persistent() {
        let proto = Protocol::new(Version::V1_2, Dialect::RabbitMq);
        let frame = proto
            .subscribe(&SubscribeOptions {
                destination: "/queue/a".into(),
                ack: AckMode::Auto,
                durable: true,
                prefetch: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(frame.header("prefetch-count"), Some("5"));
        assert_eq!(frame.header("persistent"), Some("true"));
    }

    #[test]
    fn ack_composition_differs_by_version() {
        let received = Frame::new("MESSAGE")
            .with_header("message-id", "m-1")
            .with_header("subscription", "sub-0")
            .with_header("ack", "a-1");

        let v10 = Protocol::new(Version::V1_0, Dialect::Generic).ack(&received, None, None);
        assert_eq!(v10.header("message-id"), Some("m-1"));
        assert_eq!(v10.header("id"), None);

        let v11 = Protocol::new(Version::V1_1, Dialect::Generic).ack(&received, None, None);
        assert_eq!(v11.header("message-id"), Some("m-1"));
        assert_eq!(v11.header("subscription"), Some("sub-0"));

        let v12 = Protocol::new(Version::V1_2, Dialect::Generic).ack(&received, None, None);
        assert_eq!(v12.header("id"), Some("a-1"));
    }

    #[test]
    fn nack_rejected_at_v10() {
        let received = Frame::new("MESSAGE").with_header("message-id", "m-1");
        let err = Protocol::new(Version::V1_0, Dialect::Generic)
            .nack(&received, None, None, None)
            .unwrap_err();
        assert!(matches!(err, StompError::Protocol(_)));
    }

    #[test]
    fn nack_requeue_only_on_rabbitmq() {
        let received = Frame::new("MESSAGE").with_header("message-id", "m-1");
        let err = Protocol::new(Version::V1_2, Dialect::ActiveMq)
            .nack(&received, None, None, Some(true))
            .unwrap_err();
        assert!(matches!(err, StompError::Protocol(_)));

        let frame = Protocol::new(Version::V1_2, Dialect::RabbitMq)
            .nack(&received, None, None, Some(true))
            .unwrap();
        assert_eq!(frame.header("requeue"), Some("true"));
    }

    #[test]
    fn version_ordering() {
        assert!(Version::V1_2.has_version(Version::V1_0));
        assert!(!Version::V1_0.has_version(Version::V1_2));
    }
}
