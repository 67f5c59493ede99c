//! Update Queue
//!
//! The scheduler batches computation re-runs. Every change between two ticks
//! queues the affected computations once; the flush at the tick runs them.
//!
//! # Algorithm
//!
//! 1. `queue` drops computations that are already pending. Outside a flush
//!    it appends; during a flush it inserts in id order among the entries
//!    not yet processed, so a computation created later (a child) still runs
//!    after the one that created it (its parent).
//! 2. `flush` sorts by id and walks the queue with a cursor. The queue may
//!    grow while it is walked.
//! 3. For each entry: skip it if it was excluded, call its `before` hook,
//!    clear its pending mark, and run it if it is still active.
//! 4. A computation that queued itself again during its own run is counted.
//!    Past `max_update_count` it is reported as an infinite update loop and
//!    skipped for the rest of the flush.
//! 5. State is reset, then completion hooks run, then deferred callbacks.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{Phase, ReactiveError};
use crate::reactive::{Computation, ReactiveGraph, SubscriberId};

/// Handle for removing a flush hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlushHookId(u64);

type FlushHook = Rc<dyn Fn(&FlushReport)>;

/// What happened during one flush.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Computations that ran, in run order.
    pub ran: Vec<SubscriberId>,
    /// Errors from propagate-policy computations and loop detection.
    pub errors: Vec<ReactiveError>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.ran.is_empty() && self.errors.is_empty()
    }
}

/// The update queue of one graph.
pub struct Scheduler {
    queue: RefCell<Vec<Rc<Computation>>>,
    /// Ids queued and not yet processed.
    has: RefCell<HashSet<SubscriberId>>,
    /// Re-queue counts for the current flush.
    circular: RefCell<HashMap<SubscriberId, usize>>,
    /// Computations dropped from the current flush by the loop guard.
    excluded: RefCell<HashSet<SubscriberId>>,
    waiting: Cell<bool>,
    flushing: Cell<bool>,
    index: Cell<usize>,
    deferred: RefCell<Vec<Box<dyn FnOnce()>>>,
    hooks: RefCell<Vec<(FlushHookId, FlushHook)>>,
    next_hook: Cell<u64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(Vec::new()),
            has: RefCell::new(HashSet::new()),
            circular: RefCell::new(HashMap::new()),
            excluded: RefCell::new(HashSet::new()),
            waiting: Cell::new(false),
            flushing: Cell::new(false),
            index: Cell::new(0),
            deferred: RefCell::new(Vec::new()),
            hooks: RefCell::new(Vec::new()),
            next_hook: Cell::new(0),
        }
    }

    /// Add a computation to the queue unless it is already pending.
    pub fn queue(&self, graph: &ReactiveGraph, computation: Rc<Computation>) {
        let id = computation.id();
        if !self.has.borrow_mut().insert(id) {
            return;
        }

        {
            let mut queue = self.queue.borrow_mut();
            if !self.flushing.get() {
                queue.push(computation);
            } else {
                // Keep unprocessed entries sorted; never insert at or before
                // the cursor.
                let index = self.index.get();
                let mut at = queue.len();
                while at > index + 1 && queue[at - 1].id() > id {
                    at -= 1;
                }
                queue.insert(at, computation);
            }
        }
        trace!(computation = %id, flushing = self.flushing.get(), "queued");

        if !self.waiting.get() {
            self.waiting.set(true);
            let sync = graph.config().sync;
            if sync {
                let report = self.flush(graph);
                graph.forward_unhandled(report);
            } else {
                graph.tick_signal().notify_one();
            }
        }
    }

    /// Run every queued computation, then the hooks and deferred callbacks.
    ///
    /// Calling `flush` from inside a flush does nothing.
    pub fn flush(&self, graph: &ReactiveGraph) -> FlushReport {
        let mut report = FlushReport::default();
        if self.flushing.get() {
            return report;
        }
        self.flushing.set(true);
        let reset = ResetGuard { scheduler: self };
        let limit = graph.config().max_update_count;

        self.queue.borrow_mut().sort_by_key(|c| c.id());
        debug!(queued = self.queue.borrow().len(), "flush started");

        self.index.set(0);
        loop {
            let index = self.index.get();
            let next = self.queue.borrow().get(index).cloned();
            let Some(computation) = next else {
                break;
            };
            let id = computation.id();

            if !self.excluded.borrow().contains(&id) {
                if computation.is_active() {
                    computation.run_before();
                }
                self.has.borrow_mut().remove(&id);
                if computation.is_active() {
                    if let Err(err) = computation.run() {
                        report.errors.push(err);
                    }
                    report.ran.push(id);
                }

                if self.has.borrow().contains(&id) {
                    let count = {
                        let mut circular = self.circular.borrow_mut();
                        let count = circular.entry(id).or_insert(0);
                        *count += 1;
                        *count
                    };
                    if count > limit {
                        let err = ReactiveError::InfiniteUpdateLoop {
                            id,
                            expression: computation.expression().to_string(),
                            limit,
                        };
                        graph.handle_error(&err, &computation.error_context(Phase::Scheduler));
                        report.errors.push(err);
                        self.excluded.borrow_mut().insert(id);
                    }
                }
            }
            self.index.set(index + 1);
        }

        drop(reset);
        debug!(ran = report.ran.len(), errors = report.errors.len(), "flush finished");

        let hooks: Vec<FlushHook> = self
            .hooks
            .borrow()
            .iter()
            .map(|(_, hook)| hook.clone())
            .collect();
        for hook in hooks {
            hook(&report);
        }

        self.run_deferred();
        report
    }

    fn reset(&self) {
        self.queue.borrow_mut().clear();
        self.has.borrow_mut().clear();
        self.circular.borrow_mut().clear();
        self.excluded.borrow_mut().clear();
        self.index.set(0);
        self.waiting.set(false);
        self.flushing.set(false);
    }

    /// Run the deferred callbacks registered so far. Callbacks deferred while
    /// these run wait for the next tick.
    pub(crate) fn run_deferred(&self) {
        let deferred = std::mem::take(&mut *self.deferred.borrow_mut());
        for callback in deferred {
            callback();
        }
    }

    pub(crate) fn defer(&self, callback: Box<dyn FnOnce()>) {
        self.deferred.borrow_mut().push(callback);
    }

    pub(crate) fn add_hook(&self, hook: FlushHook) -> FlushHookId {
        let id = FlushHookId(self.next_hook.get());
        self.next_hook.set(id.0 + 1);
        self.hooks.borrow_mut().push((id, hook));
        id
    }

    pub(crate) fn remove_hook(&self, id: FlushHookId) -> bool {
        let mut hooks = self.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Whether a flush has been requested and not yet run.
    pub fn is_waiting(&self) -> bool {
        self.waiting.get()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.borrow().is_empty()
    }

    /// Number of queued entries, processed or not.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub fn is_queued(&self, id: SubscriberId) -> bool {
        self.has.borrow().contains(&id)
    }
}

/// Resets the scheduler when dropped, so a panicking computation cannot
/// leave it marked as flushing.
struct ResetGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.reset();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
