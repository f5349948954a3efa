//! A STOMP 1.0/1.1/1.2 client library with ActiveMQ/RabbitMQ/Apollo
//! dialects: frame codec, incremental parser, failover-capable
//! non-blocking connection, and a stateful producer/consumer/transaction
//! façade.
//!
//! ```no_run
//! use stomp_client::{AckMode, Client, ClientConfig};
//!
//! let mut client = Client::connect("tcp://localhost:61613", ClientConfig::default())?;
//! let sub = client.subscribe("/queue/a", AckMode::Client)?;
//! if let Some(frame) = client.read_frame()? {
//!     client.ack(&frame)?;
//! }
//! client.unsubscribe(&sub)?;
//! # Ok::<(), stomp_client::StompError>(())
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod idgen;
pub mod observer;
pub mod parser;
pub mod protocol;
pub mod state;
pub mod subscription;
pub mod transform;
pub mod uri;

pub use client::{Client, ClientConfig};
pub use connection::{Connection, ConnectionConfig};
pub use error::{Result, StompError};
pub use frame::{Frame, Headers};
pub use observer::{HeartbeatEmitter, Observer, ServerAliveObserver};
pub use parser::{ParseEvent, Parser};
pub use protocol::{AckMode, ConnectOptions, Dialect, Protocol, SubscribeOptions, Version};
pub use state::{StateKind, StateMachine};
pub use subscription::{Subscription, Subscriptions};
