//! Reactive Runtime
//!
//! The [`ReactiveGraph`] is the central coordinator that connects observable
//! state, trackers, computations, and the scheduler. Everything that would
//! otherwise be process-global lives here: the active-computation stack, the
//! id counters, the update queue, the error handlers, and the configuration.
//!
//! # How It Works
//!
//! 1. State is observed through the graph, which attaches trackers to it.
//!
//! 2. Computations created on the graph run with themselves pushed on the
//!    graph's context stack, so every tracked read subscribes them.
//!
//! 3. When state changes, its tracker notifies subscribers:
//!    a. Lazy computations mark themselves dirty
//!    b. Sync computations re-run immediately
//!    c. Everything else is queued and re-runs at the next tick
//!
//! # Threading
//!
//! The graph is single-threaded (`!Send`). Several graphs can coexist on one
//! thread; they share nothing.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::sync::Notify;
use tracing::{error, warn};

use crate::config::Config;
use crate::error::{BoxError, ErrorContext, ErrorHandler, ReactiveError, WarnHandler};
use crate::observe::{self, Observer, PropertyKey, Value};
use crate::scheduler::{FlushHookId, FlushReport, Scheduler};

use super::computation::{Callback, Computation, ComputationOptions, Getter};
use super::context::ReactiveContext;
use super::subscriber::SubscriberId;
use super::tracker::TrackerId;

pub(crate) struct GraphInner {
    config: RefCell<Config>,
    context: ReactiveContext,
    scheduler: Scheduler,
    next_subscriber: Cell<u64>,
    next_tracker: Cell<u64>,
    observing: Cell<bool>,
    error_handler: RefCell<ErrorHandler>,
    warn_handler: RefCell<Option<WarnHandler>>,
    tick_signal: Rc<Notify>,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        // Wake the local driver so it notices the graph is gone.
        self.tick_signal.notify_one();
    }
}

/// Handle to a reactive graph. Cloning shares the graph.
#[derive(Clone)]
pub struct ReactiveGraph {
    inner: Rc<GraphInner>,
}

/// Non-owning handle held by trackers, observers, and computations.
#[derive(Clone, Default)]
pub struct WeakGraph {
    inner: Weak<GraphInner>,
}

impl WeakGraph {
    pub fn upgrade(&self) -> Option<ReactiveGraph> {
        self.inner.upgrade().map(|inner| ReactiveGraph { inner })
    }
}

fn default_error_handler() -> ErrorHandler {
    Rc::new(|err: &ReactiveError, ctx: &ErrorContext| {
        error!(
            owner = ctx.owner.as_deref().unwrap_or("<root>"),
            computation = ?ctx.computation,
            "error in {}: {}",
            ctx.info,
            err
        );
    })
}

impl ReactiveGraph {
    /// Create a graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Rc::new(GraphInner {
                config: RefCell::new(config),
                context: ReactiveContext::new(),
                scheduler: Scheduler::new(),
                next_subscriber: Cell::new(0),
                next_tracker: Cell::new(0),
                observing: Cell::new(true),
                error_handler: RefCell::new(default_error_handler()),
                warn_handler: RefCell::new(None),
                tick_signal: Rc::new(Notify::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakGraph {
        WeakGraph {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same graph.
    pub fn ptr_eq(&self, other: &ReactiveGraph) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Configuration and handlers
    // ------------------------------------------------------------------------

    pub fn config(&self) -> Ref<'_, Config> {
        self.inner.config.borrow()
    }

    pub fn set_config(&self, config: Config) {
        *self.inner.config.borrow_mut() = config;
    }

    /// Install the handler for errors routed away from their caller.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.inner.error_handler.borrow_mut() = handler;
    }

    /// Install the handler for misuse warnings. Without one, warnings are
    /// logged with `tracing::warn!`.
    pub fn set_warn_handler(&self, handler: WarnHandler) {
        *self.inner.warn_handler.borrow_mut() = Some(handler);
    }

    pub fn error_handler(&self) -> ErrorHandler {
        self.inner.error_handler.borrow().clone()
    }

    /// Send an error to the configured error handler.
    pub fn handle_error(&self, err: &ReactiveError, ctx: &ErrorContext) {
        let handler = self.error_handler();
        handler(err, ctx);
    }

    /// Emit a warning unless the graph is silent, and hand it back.
    pub fn warn(&self, err: ReactiveError) -> ReactiveError {
        if self.config().silent {
            return err;
        }
        let handler = self.inner.warn_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&err),
            None => warn!("{err}"),
        }
        err
    }

    // ------------------------------------------------------------------------
    // Tracking context
    // ------------------------------------------------------------------------

    pub fn context(&self) -> &ReactiveContext {
        &self.inner.context
    }

    /// Run `f` with dependency tracking suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.context.enter_untracked();
        f()
    }

    /// Enable or disable creation of new observers. Structures that are
    /// already observed are unaffected.
    pub fn set_observing(&self, observing: bool) {
        self.inner.observing.set(observing);
    }

    pub fn is_observing(&self) -> bool {
        self.inner.observing.get()
    }

    pub(crate) fn next_subscriber_id(&self) -> SubscriberId {
        let next = self.inner.next_subscriber.get() + 1;
        self.inner.next_subscriber.set(next);
        SubscriberId::from_raw(next)
    }

    pub(crate) fn next_tracker_id(&self) -> TrackerId {
        let next = self.inner.next_tracker.get() + 1;
        self.inner.next_tracker.set(next);
        TrackerId::from_raw(next)
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// See [`observe::observe`].
    pub fn observe(&self, value: &Value) -> Option<Rc<Observer>> {
        observe::observe(self, value)
    }

    /// See [`observe::observe_root`].
    pub fn observe_root(&self, value: &Value) -> Option<Rc<Observer>> {
        observe::observe_root(self, value)
    }

    /// See [`observe::add_property`].
    pub fn add_property(
        &self,
        target: &Value,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<Value, ReactiveError> {
        observe::add_property(self, target, key.into(), value.into())
    }

    /// See [`observe::remove_property`].
    pub fn remove_property(
        &self,
        target: &Value,
        key: impl Into<PropertyKey>,
    ) -> Result<(), ReactiveError> {
        observe::remove_property(self, target, key.into())
    }

    // ------------------------------------------------------------------------
    // Computations
    // ------------------------------------------------------------------------

    /// Create an owner-less computation.
    ///
    /// Trackers only hold weak references to their subscribers, so the
    /// computation stays live only while the returned handle is kept.
    pub fn computation(
        &self,
        getter: Getter,
        callback: Option<Callback>,
        options: ComputationOptions,
    ) -> Result<Rc<Computation>, ReactiveError> {
        Computation::new(self, None, getter, callback, options)
    }

    /// Convenience for an eager, user-level computation with a callback.
    pub fn watch(
        &self,
        getter: impl Fn() -> Result<Value, BoxError> + 'static,
        callback: impl Fn(&Value, &Value) -> Result<(), BoxError> + 'static,
    ) -> Result<Rc<Computation>, ReactiveError> {
        self.computation(
            Getter::new(getter),
            Some(Rc::new(callback)),
            ComputationOptions::default().user(),
        )
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Queue a computation for the next flush.
    pub fn queue(&self, computation: Rc<Computation>) {
        self.inner.scheduler.queue(self, computation);
    }

    /// Flush the queue now.
    pub fn flush(&self) -> FlushReport {
        self.inner.scheduler.flush(self)
    }

    /// Register a hook run after every flush, in registration order.
    pub fn on_flushed(&self, hook: impl Fn(&FlushReport) + 'static) -> FlushHookId {
        self.inner.scheduler.add_hook(Rc::new(hook))
    }

    pub fn remove_flush_hook(&self, id: FlushHookId) -> bool {
        self.inner.scheduler.remove_hook(id)
    }

    pub(crate) fn tick_signal(&self) -> &Rc<Notify> {
        &self.inner.tick_signal
    }

    /// Errors left in a report nobody receives go to the error handler.
    /// Loop errors were already handled during the flush.
    pub(crate) fn forward_unhandled(&self, report: FlushReport) {
        for err in report.errors {
            if matches!(err, ReactiveError::InfiniteUpdateLoop { .. }) {
                continue;
            }
            let ctx = ErrorContext {
                owner: None,
                info: "flush".to_string(),
                computation: None,
            };
            self.handle_error(&err, &ctx);
        }
    }
}

impl Default for ReactiveGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveGraph")
            .field("config", &*self.config())
            .field("depth", &self.inner.context.depth())
            .field("queued", &self.inner.scheduler.len())
            .finish()
    }
}

impl fmt::Debug for WeakGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakGraph")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_allocated_per_graph() {
        let a = ReactiveGraph::new();
        let b = ReactiveGraph::new();

        assert_eq!(a.next_subscriber_id().raw(), 1);
        assert_eq!(a.next_subscriber_id().raw(), 2);
        assert_eq!(b.next_subscriber_id().raw(), 1);
    }

    #[test]
    fn graphs_do_not_share_tracking() {
        let a = ReactiveGraph::new();
        let b = ReactiveGraph::new();
        let value = Value::from(json!({ "x": 1 }));
        a.observe(&value);
        let object = value.as_object().cloned().expect("object");

        // Reading inside a computation of graph b does not subscribe it.
        let o = object.clone();
        let c = b
            .computation(Getter::new(move || Ok(o.get("x"))), None, Default::default())
            .unwrap();
        assert_eq!(c.dependency_count(), 0);
    }

    #[test]
    fn untracked_reads_are_not_recorded() {
        let graph = ReactiveGraph::new();
        let value = Value::from(json!({ "x": 1, "y": 2 }));
        graph.observe(&value);
        let object = value.as_object().cloned().expect("object");

        let g = graph.clone();
        let o = object.clone();
        let c = graph
            .computation(
                Getter::new(move || {
                    let x = o.get("x");
                    g.untracked(|| o.get("y"));
                    Ok(x)
                }),
                None,
                Default::default(),
            )
            .unwrap();
        assert_eq!(c.dependency_count(), 1);
    }

    #[test]
    fn weak_graph_does_not_keep_graph_alive() {
        let graph = ReactiveGraph::new();
        let weak = graph.downgrade();
        assert!(weak.upgrade().is_some());
        drop(graph);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn set_config_replaces_settings() {
        let graph = ReactiveGraph::new();
        graph.set_config(Config::default().with_max_update_count(5));
        assert_eq!(graph.config().max_update_count, 5);
    }
}
