//! Subscriptions registry (§4.7).
//!
//! `stomp-rs`'s `Session` keys subscriptions by id in a `HashMap`. §4.7
//! requires insertion order and first-match lookup, so this keeps an
//! ordered `Vec` instead — small enough (a handful of live subscriptions
//! per session) that linear scan is the right tradeoff over hashing.

use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    pub ack_mode: String,
}

impl Subscription {
    pub fn new(id: impl Into<String>, destination: impl Into<String>, ack_mode: impl Into<String>) -> Self {
        Subscription {
            id: id.into(),
            destination: destination.into(),
            ack_mode: ack_mode.into(),
        }
    }
}

/// Insertion-ordered registry of live subscriptions.
#[derive(Debug, Default)]
pub struct Subscriptions(Vec<Subscription>);

impl Subscriptions {
    pub fn new() -> Self {
        Subscriptions(Vec::new())
    }

    pub fn insert(&mut self, subscription: Subscription) {
        self.0.push(subscription);
    }

    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        let idx = self.0.iter().position(|s| s.id == id)?;
        Some(self.0.remove(idx))
    }

    pub fn by_id(&self, id: &str) -> Option<&Subscription> {
        self.0.iter().find(|s| s.id == id)
    }

    /// Looks up the subscription a `MESSAGE` frame belongs to, by its
    /// `subscription` header — first match in insertion order.
    pub fn for_frame(&self, frame: &Frame) -> Option<&Subscription> {
        let id = frame.header("subscription")?;
        self.by_id(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_frame_subscription_header() {
        let mut subs = Subscriptions::new();
        subs.insert(Subscription::new("sub-0", "/queue/a", "auto"));
        subs.insert(Subscription::new("sub-1", "/queue/b", "client"));

        let frame = Frame::new("MESSAGE").with_header("subscription", "sub-1");
        assert_eq!(subs.for_frame(&frame).unwrap().destination, "/queue/b");
    }

    #[test]
    fn insertion_order_preserved() {
        let mut subs = Subscriptions::new();
        subs.insert(Subscription::new("sub-0", "/a", "auto"));
        subs.insert(Subscription::new("sub-1", "/b", "auto"));
        let ids: Vec<_> = subs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sub-0", "sub-1"]);
    }
}
