//! Subscriber identity for the reactive system.
//!
//! A subscriber is any computation that depends on reactive values: a render
//! step, a cached derived value, or an explicit watch expression.

use std::fmt;

/// Unique identifier for a subscriber.
///
/// Ids are handed out by the owning [`ReactiveGraph`](super::ReactiveGraph)
/// in creation order, so comparing two ids tells which computation was
/// created first. The scheduler relies on this to run parents before
/// children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Wrap a raw id allocated by a graph.
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
