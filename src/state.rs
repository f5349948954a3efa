//! Stateful façade: the Producer/Consumer/*InTx/Draining* state machine
//! that governs which STOMP verbs are legal at each moment (§4.6).
//!
//! No analog in the teacher. Structurally grounded on `stomp-rs`'s split
//! between `Session`/`Transaction`/`Subscription`, but modeled per Design
//! Notes §9 option (a) — a tagged `StateKind` enum updated in place by a
//! mediator — rather than the mutually-owning state-object graph the
//! source language allows; Rust's ownership rules make that graph awkward.

use log::trace;

use crate::error::{Result, StompError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Producer,
    Consumer,
    ProducerInTx { transaction_id: String },
    ConsumerInTx { transaction_id: String },
    DrainingConsumer,
    DrainingConsumerInTx { transaction_id: String },
}

impl StateKind {
    pub fn name(&self) -> &'static str {
        match self {
            StateKind::Producer => "Producer",
            StateKind::Consumer => "Consumer",
            StateKind::ProducerInTx { .. } => "ProducerInTx",
            StateKind::ConsumerInTx { .. } => "ConsumerInTx",
            StateKind::DrainingConsumer => "DrainingConsumer",
            StateKind::DrainingConsumerInTx { .. } => "DrainingConsumerInTx",
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            StateKind::ProducerInTx { transaction_id }
            | StateKind::ConsumerInTx { transaction_id }
            | StateKind::DrainingConsumerInTx { transaction_id } => Some(transaction_id),
            _ => None,
        }
    }
}

fn invalid(state: &StateKind, operation: &str) -> StompError {
    StompError::InvalidState {
        state: state.name().to_string(),
        operation: operation.to_string(),
    }
}

fn draining(operation: &str) -> StompError {
    StompError::DrainingMessage {
        operation: operation.to_string(),
    }
}

/// Mediator holding the current state and exposing the legal operations
/// from the §4.6 table. Transitions are atomic from the caller's view: a
/// method either succeeds and leaves the new state installed, or fails
/// and leaves the state untouched.
#[derive(Debug)]
pub struct StateMachine {
    state: StateKind,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            state: StateKind::Producer,
        }
    }

    pub fn state(&self) -> &StateKind {
        &self.state
    }

    /// Returns `Ok(Some(transaction_id))` if sends must carry a
    /// `transaction` header, `Ok(None)` if not, or `Err` if `send` is not
    /// legal in the current state (only `DrainingConsumerInTx`).
    pub fn check_send(&self) -> Result<Option<String>> {
        match &self.state {
            StateKind::Producer | StateKind::Consumer | StateKind::DrainingConsumer => Ok(None),
            StateKind::ProducerInTx { transaction_id } | StateKind::ConsumerInTx { transaction_id } => {
                Ok(Some(transaction_id.clone()))
            }
            StateKind::DrainingConsumerInTx { .. } => Err(draining("send")),
        }
    }

    /// Returns `Ok(Some(transaction_id))`/`Ok(None)` the same way as
    /// [`Self::check_send`], for ack/nack, which is illegal in the
    /// Producer states.
    pub fn check_ack(&self) -> Result<Option<String>> {
        match &self.state {
            StateKind::Consumer | StateKind::DrainingConsumer => Ok(None),
            StateKind::ConsumerInTx { transaction_id } | StateKind::DrainingConsumerInTx { transaction_id } => {
                Ok(Some(transaction_id.clone()))
            }
            StateKind::Producer | StateKind::ProducerInTx { .. } => Err(invalid(&self.state, "ack/nack")),
        }
    }

    pub fn check_read(&self) -> Result<()> {
        match &self.state {
            StateKind::Consumer
            | StateKind::ConsumerInTx { .. }
            | StateKind::DrainingConsumer
            | StateKind::DrainingConsumerInTx { .. } => Ok(()),
            StateKind::Producer | StateKind::ProducerInTx { .. } => Err(invalid(&self.state, "read")),
        }
    }

    /// Moves Producer(InTx) into Consumer(InTx); a no-op transition if
    /// already consuming (the caller still adds the subscription to the
    /// registry).
    pub fn subscribe(&mut self) -> Result<()> {
        self.state = match &self.state {
            StateKind::Producer => StateKind::Consumer,
            StateKind::Consumer => StateKind::Consumer,
            StateKind::ProducerInTx { transaction_id } => StateKind::ConsumerInTx {
                transaction_id: transaction_id.clone(),
            },
            StateKind::ConsumerInTx { transaction_id } => StateKind::ConsumerInTx {
                transaction_id: transaction_id.clone(),
            },
            StateKind::DrainingConsumer | StateKind::DrainingConsumerInTx { .. } => {
                return Err(draining("subscribe"))
            }
        };
        trace!("state -> {}", self.state.name());
        Ok(())
    }

    /// Called after a subscription is removed from the registry.
    /// `last_removed` is whether that was the final live subscription;
    /// `buffer_empty` is whether the session has no buffered unread
    /// frames. Per §4.6: if the buffer is empty, drop straight to the
    /// producer peer state; otherwise drain first.
    pub fn unsubscribe(&mut self, last_removed: bool, buffer_empty: bool) -> Result<()> {
        if !last_removed {
            return match &self.state {
                StateKind::Consumer | StateKind::ConsumerInTx { .. } => Ok(()),
                _ => Err(invalid(&self.state, "unsubscribe")),
            };
        }
        self.state = match &self.state {
            StateKind::Consumer => {
                if buffer_empty {
                    StateKind::Producer
                } else {
                    StateKind::DrainingConsumer
                }
            }
            StateKind::ConsumerInTx { transaction_id } => {
                if buffer_empty {
                    StateKind::ProducerInTx {
                        transaction_id: transaction_id.clone(),
                    }
                } else {
                    StateKind::DrainingConsumerInTx {
                        transaction_id: transaction_id.clone(),
                    }
                }
            }
            _ => return Err(invalid(&self.state, "unsubscribe")),
        };
        trace!("state -> {}", self.state.name());
        Ok(())
    }

    /// `read()` returned no more buffered frames while draining: finish
    /// the transition to the producer peer state.
    pub fn drained(&mut self) {
        self.state = match &self.state {
            StateKind::DrainingConsumer => StateKind::Producer,
            StateKind::DrainingConsumerInTx { transaction_id } => StateKind::ProducerInTx {
                transaction_id: transaction_id.clone(),
            },
            other => other.clone(),
        };
        trace!("state -> {}", self.state.name());
    }

    /// Enters a transaction. Nested `begin` (from an already-In-Tx state)
    /// is rejected.
    pub fn begin(&mut self, transaction_id: String) -> Result<()> {
        self.state = match &self.state {
            StateKind::Producer => StateKind::ProducerInTx { transaction_id },
            StateKind::Consumer => StateKind::ConsumerInTx { transaction_id },
            _ => return Err(invalid(&self.state, "begin")),
        };
        trace!("state -> {}", self.state.name());
        Ok(())
    }

    /// Leaves a transaction on COMMIT, returning the released transaction
    /// id.
    pub fn commit(&mut self) -> Result<String> {
        let (next, tx) = match &self.state {
            StateKind::ProducerInTx { transaction_id } => (StateKind::Producer, transaction_id.clone()),
            StateKind::ConsumerInTx { transaction_id } => (StateKind::Consumer, transaction_id.clone()),
            _ => return Err(invalid(&self.state, "commit")),
        };
        self.state = next;
        trace!("state -> {}", self.state.name());
        Ok(tx)
    }

    /// Leaves a transaction on ABORT. Disallowed while draining inside a
    /// transaction (no in-flight transaction work can be rolled back once
    /// its subscription is already gone).
    pub fn abort(&mut self) -> Result<String> {
        let (next, tx) = match &self.state {
            StateKind::ProducerInTx { transaction_id } => (StateKind::Producer, transaction_id.clone()),
            StateKind::ConsumerInTx { transaction_id } => (StateKind::Consumer, transaction_id.clone()),
            _ => return Err(invalid(&self.state, "abort")),
        };
        self.state = next;
        trace!("state -> {}", self.state.name());
        Ok(tx)
    }
}
