//! Dependency Trackers
//!
//! A [`Tracker`] is the notification point for one observable thing: a
//! reactive property, or a whole observed structure. Computations that read
//! the thing while running subscribe to its tracker; writes to the thing
//! call [`Tracker::notify`].
//!
//! Subscriptions are bidirectional. The tracker holds weak references to
//! its subscribers, and each computation holds strong references to the
//! trackers it depends on, so dropping a computation never keeps state
//! alive and dropping state never keeps a computation alive.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::trace;

use super::computation::Computation;
use super::runtime::{ReactiveGraph, WeakGraph};
use super::subscriber::SubscriberId;

/// Unique identifier for a tracker within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackerId(u64);

impl TrackerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

type Snapshot = SmallVec<[(SubscriberId, Weak<Computation>); 8]>;

/// Subscriber set for one observable property or structure.
pub struct Tracker {
    id: TrackerId,
    graph: WeakGraph,
    /// Insertion ordered, so notification follows subscription order.
    subscribers: RefCell<IndexMap<SubscriberId, Weak<Computation>>>,
}

impl Tracker {
    /// Create a tracker in `graph`.
    pub fn new(graph: &ReactiveGraph) -> Rc<Self> {
        Rc::new(Self {
            id: graph.next_tracker_id(),
            graph: graph.downgrade(),
            subscribers: RefCell::new(IndexMap::new()),
        })
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    pub(crate) fn graph(&self) -> Option<ReactiveGraph> {
        self.graph.upgrade()
    }

    /// Add `computation` to the subscriber set. Subscribing twice is a no-op.
    pub fn subscribe(&self, computation: &Rc<Computation>) {
        let id = computation.id();
        let mut subscribers = self.subscribers.borrow_mut();
        if !subscribers.contains_key(&id) {
            trace!(tracker = self.id.0, subscriber = %id, "subscribe");
            subscribers.insert(id, Rc::downgrade(computation));
        }
    }

    /// Remove a subscriber, keeping the order of the rest.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.borrow_mut().shift_remove(&id).is_some() {
            trace!(tracker = self.id.0, subscriber = %id, "unsubscribe");
        }
    }

    /// Record this tracker as a dependency of the running computation.
    ///
    /// Returns `true` when a computation was running, i.e. when the read
    /// was attributed to someone.
    pub fn depend(self: &Rc<Self>) -> bool {
        let Some(graph) = self.graph.upgrade() else {
            return false;
        };
        match graph.context().current() {
            Some(computation) => {
                computation.add_dependency(self);
                true
            }
            None => false,
        }
    }

    /// Tell every subscriber that the observed thing changed.
    pub fn notify(&self) {
        Self::notify_all(&[self]);
    }

    /// Notify the union of several trackers' subscribers, each once.
    pub(crate) fn notify_all(trackers: &[&Tracker]) {
        let Some(graph) = trackers.first().and_then(|t| t.graph.upgrade()) else {
            return;
        };

        // Snapshot first: updates may subscribe and unsubscribe.
        let mut snapshot = Snapshot::new();
        if let [tracker] = trackers {
            snapshot.extend(
                tracker
                    .subscribers
                    .borrow()
                    .iter()
                    .map(|(id, weak)| (*id, weak.clone())),
            );
        } else {
            let mut seen = HashSet::new();
            for tracker in trackers {
                for (id, weak) in tracker.subscribers.borrow().iter() {
                    if seen.insert(*id) {
                        snapshot.push((*id, weak.clone()));
                    }
                }
            }
        }

        if graph.config().sync {
            snapshot.sort_by_key(|(id, _)| *id);
        }

        for (id, weak) in snapshot {
            match weak.upgrade() {
                Some(computation) => computation.update(),
                None => {
                    // Dropped without teardown.
                    for tracker in trackers {
                        tracker.unsubscribe(id);
                    }
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Subscriber ids in subscription order.
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.borrow().keys().copied().collect()
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.id)
            .field("subscribers", &self.subscriber_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Value;
    use crate::reactive::{ComputationOptions, Getter};

    fn computation(graph: &ReactiveGraph) -> Rc<Computation> {
        graph
            .computation(
                Getter::new(|| Ok(Value::Undefined)),
                None,
                ComputationOptions::default().lazy(),
            )
            .unwrap()
    }

    #[test]
    fn tracker_ids_increase() {
        let graph = ReactiveGraph::new();
        let a = Tracker::new(&graph);
        let b = Tracker::new(&graph);
        assert!(a.id() < b.id());
    }

    #[test]
    fn subscribe_is_idempotent_and_ordered() {
        let graph = ReactiveGraph::new();
        let tracker = Tracker::new(&graph);
        let first = computation(&graph);
        let second = computation(&graph);

        tracker.subscribe(&second);
        tracker.subscribe(&first);
        tracker.subscribe(&second);
        assert_eq!(tracker.subscriber_ids(), vec![second.id(), first.id()]);

        tracker.unsubscribe(second.id());
        assert_eq!(tracker.subscriber_ids(), vec![first.id()]);
    }

    #[test]
    fn depend_outside_a_computation_records_nothing() {
        let graph = ReactiveGraph::new();
        let tracker = Tracker::new(&graph);
        assert!(!tracker.depend());
        assert_eq!(tracker.subscriber_count(), 0);
    }

    #[test]
    fn notify_marks_lazy_subscribers_dirty() {
        let graph = ReactiveGraph::new();
        let tracker = Tracker::new(&graph);
        let lazy = computation(&graph);
        lazy.evaluate().unwrap();
        assert!(!lazy.is_dirty());

        tracker.subscribe(&lazy);
        tracker.notify();
        assert!(lazy.is_dirty());
    }

    #[test]
    fn notify_all_updates_shared_subscribers_once() {
        let graph = ReactiveGraph::new();
        let first = Tracker::new(&graph);
        let second = Tracker::new(&graph);
        let runs = Rc::new(std::cell::Cell::new(0));
        let counter = runs.clone();
        let c = graph
            .computation(
                Getter::new(move || {
                    counter.set(counter.get() + 1);
                    Ok(Value::Undefined)
                }),
                None,
                ComputationOptions::default().sync(),
            )
            .unwrap();
        assert_eq!(runs.get(), 1);

        first.subscribe(&c);
        second.subscribe(&c);
        Tracker::notify_all(&[&first, &second]);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn notify_reaches_every_subscriber_of_a_large_set() {
        let graph = ReactiveGraph::new();
        let tracker = Tracker::new(&graph);
        let subscribers: Vec<_> = (0..5000)
            .map(|_| {
                let c = computation(&graph);
                c.evaluate().unwrap();
                tracker.subscribe(&c);
                c
            })
            .collect();

        tracker.notify();
        assert!(subscribers.iter().all(|c| c.is_dirty()));
        assert_eq!(tracker.subscriber_count(), 5000);
    }

    #[test]
    fn dropped_subscribers_are_skipped() {
        let graph = ReactiveGraph::new();
        let tracker = Tracker::new(&graph);
        {
            let gone = computation(&graph);
            tracker.subscribe(&gone);
        }
        assert_eq!(tracker.subscriber_count(), 1);
        tracker.notify();
        assert_eq!(tracker.subscriber_count(), 0);
    }
}
