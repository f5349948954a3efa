//! Connection observer hooks (§4.4).
//!
//! The teacher has no analog (it delegates all of this to tokio codecs);
//! grounded on `stomp-rs`'s `Session` heartbeat/timeout callbacks and
//! `Laymer-stomping-rs`'s keepalive timeout tracking, generalized into a
//! trait so a connection can be wired to more than one kind of watcher at
//! once (a heartbeat emitter and a server-alive deadline tracker, say).

use std::time::Instant;

use crate::frame::Frame;

/// Observes connection-level I/O events. All methods have empty default
/// bodies so an implementor only needs to override what it cares about.
pub trait Observer {
    fn sent_frame(&mut self, _frame: &Frame) {}
    fn received_frame(&mut self, _frame: &Frame) {}
    /// A read returned zero bytes (peer closed its write half).
    fn empty_read(&mut self) {}
    /// The outgoing buffer was fully flushed.
    fn empty_buffer(&mut self) {}
    /// A heartbeat byte (or `\r\n` pair) was read from the peer.
    fn empty_line_read(&mut self) {}
}

/// Emits heartbeat bytes on a fixed cadence, tracked by elapsed wall time
/// rather than a background timer (this crate has no async runtime or
/// dedicated timer thread to drive one).
pub struct HeartbeatEmitter {
    interval: std::time::Duration,
    last_sent: Instant,
}

impl HeartbeatEmitter {
    pub fn new(interval: std::time::Duration) -> Self {
        HeartbeatEmitter {
            interval,
            last_sent: Instant::now(),
        }
    }

    /// Returns `true` if a heartbeat is due and resets the cadence clock.
    pub fn due(&mut self) -> bool {
        if self.interval.is_zero() {
            return false;
        }
        if self.last_sent.elapsed() >= self.interval {
            self.last_sent = Instant::now();
            true
        } else {
            false
        }
    }
}

impl Observer for HeartbeatEmitter {
    fn sent_frame(&mut self, _frame: &Frame) {
        self.last_sent = Instant::now();
    }
}

/// Tracks the deadline by which the peer must send something (a frame or a
/// heartbeat byte) or be considered unresponsive. Per §1/§7, this crate
/// observes and reports the deadline; it does not strictly enforce
/// disconnection on its own (callers decide what to do with `overdue()`).
pub struct ServerAliveObserver {
    deadline: std::time::Duration,
    last_seen: Instant,
}

impl ServerAliveObserver {
    pub fn new(deadline: std::time::Duration) -> Self {
        ServerAliveObserver {
            deadline,
            last_seen: Instant::now(),
        }
    }

    pub fn overdue(&self) -> bool {
        !self.deadline.is_zero() && self.last_seen.elapsed() > self.deadline
    }
}

impl Observer for ServerAliveObserver {
    fn received_frame(&mut self, _frame: &Frame) {
        self.last_seen = Instant::now();
    }

    fn empty_line_read(&mut self) {
        self.last_seen = Instant::now();
    }
}
