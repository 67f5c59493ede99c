//! Computations
//!
//! A [`Computation`] is a unit of work that reads observable state: a render
//! step, a cached derived value, or a watch expression. Running it records
//! every tracker it reads; a later change to any of them calls
//! [`Computation::update`].
//!
//! # Lifecycle
//!
//! ```text
//! uncomputed --get--> clean --notify--> dirty --get--> evaluating --> clean
//!      \                 \                  \
//!       +--------------- teardown ----------+--> torn down (terminal)
//! ```
//!
//! - Eager computations evaluate at construction. Lazy ones start dirty and
//!   evaluate on first [`evaluate`](Computation::evaluate).
//! - On change a lazy computation only marks itself dirty. A `sync` one
//!   re-runs on the spot. Everything else is queued on the scheduler and
//!   re-runs at the next flush.
//!
//! # Dependency Reconciliation
//!
//! Each run collects its reads into a pending set. When the run finishes the
//! pending set replaces the current one and the computation unsubscribes from
//! every tracker it no longer read, so conditional reads re-derive the
//! dependency set on every run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::trace;

use crate::error::{BoxError, ErrorContext, ErrorHandler, Phase, ReactiveError};
use crate::observe::{traverse, Object, Value};

use super::runtime::{ReactiveGraph, WeakGraph};
use super::subscriber::SubscriberId;
use super::tracker::{Tracker, TrackerId};

type GetterFn = dyn Fn() -> Result<Value, BoxError>;

/// Change callback: `(new_value, old_value)`.
pub type Callback = Rc<dyn Fn(&Value, &Value) -> Result<(), BoxError>>;

/// The function a computation evaluates.
#[derive(Clone)]
pub struct Getter {
    func: Rc<GetterFn>,
    expression: String,
}

impl Getter {
    pub fn new(func: impl Fn() -> Result<Value, BoxError> + 'static) -> Self {
        Self::named("<closure>", func)
    }

    /// A getter with a label used in logs and error messages.
    pub fn named(
        expression: impl Into<String>,
        func: impl Fn() -> Result<Value, BoxError> + 'static,
    ) -> Self {
        Self {
            func: Rc::new(func),
            expression: expression.into(),
        }
    }

    /// A getter resolving a dot-delimited path against `root`.
    ///
    /// Only ASCII letters, digits, `_`, `$` and `.` are accepted. Segments
    /// address keyed properties, sequence indices, or a sequence's `length`.
    /// Resolution stops with `Undefined` at the first primitive.
    pub fn path(root: &Object, path: &str) -> Result<Self, ReactiveError> {
        let valid = path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
        if !valid {
            return Err(ReactiveError::InvalidPath(path.to_string()));
        }

        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let root = root.clone();
        Ok(Self::named(path, move || {
            let mut current = Value::Object(root.clone());
            for segment in &segments {
                current = match &current {
                    Value::Object(object) => object.get(segment),
                    Value::Array(array) if segment == "length" => Value::from(array.len()),
                    Value::Array(array) => match segment.parse::<usize>() {
                        Ok(index) => array.get(index),
                        Err(_) => Value::Undefined,
                    },
                    _ => return Ok(Value::Undefined),
                };
            }
            Ok(current)
        }))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn call(&self) -> Result<Value, BoxError> {
        (self.func)()
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Getter").field(&self.expression).finish()
    }
}

/// Where a computation's getter and callback errors go.
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    /// Return the error to whoever ran the computation.
    #[default]
    Propagate,
    /// Hand the error to a handler and carry on with `Undefined`.
    Handle(ErrorHandler),
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Propagate => f.write_str("Propagate"),
            ErrorPolicy::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

/// Construction options for a [`Computation`].
#[derive(Clone, Default)]
pub struct ComputationOptions {
    /// Evaluate on demand; a change only marks the computation dirty.
    pub lazy: bool,
    /// Re-run immediately on change instead of queueing.
    pub sync: bool,
    /// Track every nested value of the result.
    pub deep: bool,
    /// User-declared computation: errors go to the graph's error handler
    /// unless `error_policy` says otherwise.
    pub user: bool,
    pub error_policy: Option<ErrorPolicy>,
    /// Called by the scheduler right before each queued re-run.
    pub before: Option<Rc<dyn Fn()>>,
}

impl ComputationOptions {
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn user(mut self) -> Self {
        self.user = true;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    pub fn with_before(mut self, before: impl Fn() + 'static) -> Self {
        self.before = Some(Rc::new(before));
        self
    }
}

/// Something that owns computations and wants to know when one is torn down.
pub trait ComputationOwner {
    /// Name used in error contexts.
    fn name(&self) -> &str;

    /// While the owner tears everything down itself, computations do not
    /// remove themselves from its registry.
    fn is_being_destroyed(&self) -> bool;

    fn remove_computation(&self, id: SubscriberId);
}

/// A tracked unit of work.
pub struct Computation {
    id: SubscriberId,
    expression: String,
    graph: WeakGraph,
    owner: Option<Weak<dyn ComputationOwner>>,
    getter: Getter,
    callback: Option<Callback>,
    before: Option<Rc<dyn Fn()>>,
    lazy: bool,
    sync: bool,
    deep: bool,
    user: bool,
    policy: Option<ErrorPolicy>,

    value: RefCell<Value>,
    dirty: Cell<bool>,
    active: Cell<bool>,
    deps: RefCell<IndexMap<TrackerId, Rc<Tracker>>>,
    new_deps: RefCell<IndexMap<TrackerId, Rc<Tracker>>>,
}

impl Computation {
    /// Create a computation, evaluating it immediately unless it is lazy.
    pub fn new(
        graph: &ReactiveGraph,
        owner: Option<Weak<dyn ComputationOwner>>,
        getter: Getter,
        callback: Option<Callback>,
        options: ComputationOptions,
    ) -> Result<Rc<Self>, ReactiveError> {
        let computation = Rc::new(Self {
            id: graph.next_subscriber_id(),
            expression: getter.expression().to_string(),
            graph: graph.downgrade(),
            owner,
            getter,
            callback,
            before: options.before,
            lazy: options.lazy,
            sync: options.sync,
            deep: options.deep,
            user: options.user,
            policy: options.error_policy,
            value: RefCell::new(Value::Undefined),
            dirty: Cell::new(options.lazy),
            active: Cell::new(true),
            deps: RefCell::new(IndexMap::new()),
            new_deps: RefCell::new(IndexMap::new()),
        });
        trace!(id = %computation.id, expression = %computation.expression, "computation created");

        if !computation.lazy {
            match computation.get() {
                Ok(value) => {
                    computation.value.replace(value);
                }
                Err(err) => {
                    computation.teardown();
                    return Err(err);
                }
            }
        }
        Ok(computation)
    }

    /// Evaluate the getter with this computation as the running one and
    /// reconcile subscriptions afterwards.
    pub fn get(self: &Rc<Self>) -> Result<Value, ReactiveError> {
        let graph = self.graph.upgrade().ok_or(ReactiveError::Detached)?;

        let result = {
            let _guard = graph.context().enter(self.clone());
            let result = self.getter.call();
            if self.deep {
                if let Ok(value) = &result {
                    traverse(value);
                }
            }
            result
        };
        self.cleanup_deps();

        match result {
            Ok(value) => Ok(value),
            Err(source) => {
                let err = ReactiveError::evaluation(Phase::Getter, &self.expression, source);
                self.route_error(err, Phase::Getter)?;
                Ok(Value::Undefined)
            }
        }
    }

    /// Record `tracker` for the current run, subscribing if it is new.
    pub fn add_dependency(self: &Rc<Self>, tracker: &Rc<Tracker>) {
        let id = tracker.id();
        {
            let mut new_deps = self.new_deps.borrow_mut();
            if new_deps.contains_key(&id) {
                return;
            }
            new_deps.insert(id, tracker.clone());
        }
        if !self.deps.borrow().contains_key(&id) {
            tracker.subscribe(self);
        }
    }

    /// Swap the pending set in and drop subscriptions that were not renewed.
    fn cleanup_deps(&self) {
        let pending = std::mem::take(&mut *self.new_deps.borrow_mut());
        let previous = self.deps.replace(pending);

        let current = self.deps.borrow();
        for (id, tracker) in previous {
            if !current.contains_key(&id) {
                tracker.unsubscribe(self.id);
            }
        }
    }

    /// React to a change in one of the dependencies.
    pub fn update(self: &Rc<Self>) {
        if self.lazy {
            self.dirty.set(true);
            return;
        }
        let Some(graph) = self.graph.upgrade() else {
            return;
        };
        if self.sync {
            if let Err(err) = self.run() {
                graph.handle_error(&err, &self.error_context(phase_of(&err)));
            }
        } else {
            graph.queue(self.clone());
        }
    }

    /// Re-evaluate and fire the callback if the value changed.
    ///
    /// A structure result or a deep computation always counts as changed,
    /// since its contents may have been mutated in place.
    pub fn run(self: &Rc<Self>) -> Result<(), ReactiveError> {
        if !self.active.get() {
            return Ok(());
        }
        let value = self.get()?;
        let changed = {
            let old = self.value.borrow();
            !value.strict_equals(&old) || value.is_structure() || self.deep
        };
        if !changed {
            return Ok(());
        }

        let old = self.value.replace(value.clone());
        if let Some(callback) = &self.callback {
            if let Err(source) = callback(&value, &old) {
                let err = ReactiveError::evaluation(Phase::Callback, &self.expression, source);
                self.route_error(err, Phase::Callback)?;
            }
        }
        Ok(())
    }

    /// Evaluate a lazy computation and mark it clean.
    pub fn evaluate(self: &Rc<Self>) -> Result<Value, ReactiveError> {
        let value = self.get()?;
        self.value.replace(value.clone());
        self.dirty.set(false);
        Ok(value)
    }

    /// Make the running computation depend on everything this one depends
    /// on. Lets a render re-run when a derived value it read goes dirty.
    pub fn depend(&self) {
        let deps: Vec<Rc<Tracker>> = self.deps.borrow().values().cloned().collect();
        for tracker in deps {
            tracker.depend();
        }
    }

    /// Unsubscribe from everything and deactivate. Safe to call repeatedly.
    pub fn teardown(&self) {
        if !self.active.get() {
            return;
        }
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            if !owner.is_being_destroyed() {
                owner.remove_computation(self.id);
            }
        }
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for tracker in deps.values() {
            tracker.unsubscribe(self.id);
        }
        self.active.set(false);
        trace!(id = %self.id, "computation torn down");
    }

    /// Route an error by policy. Returns it back when the policy propagates.
    pub(crate) fn route_error(&self, err: ReactiveError, phase: Phase) -> Result<(), ReactiveError> {
        let handler = match &self.policy {
            Some(ErrorPolicy::Handle(handler)) => Some(handler.clone()),
            Some(ErrorPolicy::Propagate) => None,
            None if self.user => self.graph.upgrade().map(|graph| graph.error_handler()),
            None => None,
        };
        match handler {
            Some(handler) => {
                handler(&err, &self.error_context(phase));
                Ok(())
            }
            None => Err(err),
        }
    }

    pub(crate) fn error_context(&self, phase: Phase) -> ErrorContext {
        ErrorContext {
            owner: self
                .owner
                .as_ref()
                .and_then(Weak::upgrade)
                .map(|owner| owner.name().to_string()),
            info: format!("{phase} for computation \"{}\"", self.expression),
            computation: Some(self.id),
        }
    }

    pub(crate) fn run_before(&self) {
        if let Some(before) = &self.before {
            before();
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The last evaluated value.
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub fn is_deep(&self) -> bool {
        self.deep
    }

    pub fn is_user(&self) -> bool {
        self.user
    }

    pub fn dependency_count(&self) -> usize {
        self.deps.borrow().len()
    }

    pub fn dependency_ids(&self) -> Vec<TrackerId> {
        self.deps.borrow().keys().copied().collect()
    }
}

fn phase_of(err: &ReactiveError) -> Phase {
    match err {
        ReactiveError::Evaluation { phase, .. } => *phase,
        _ => Phase::Getter,
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id)
            .field("expression", &self.expression)
            .field("lazy", &self.lazy)
            .field("dirty", &self.dirty.get())
            .field("active", &self.active.get())
            .field("deps", &self.dependency_ids())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(graph: &ReactiveGraph, json: serde_json::Value) -> Object {
        let value = Value::from(json);
        graph.observe(&value);
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn eager_computation_evaluates_on_construction() {
        let graph = ReactiveGraph::new();
        let data = state(&graph, json!({ "a": 1 }));
        let d = data.clone();
        let c = graph
            .computation(Getter::new(move || Ok(d.get("a"))), None, Default::default())
            .unwrap();

        assert_eq!(c.value().as_number(), Some(1.0));
        assert_eq!(c.dependency_count(), 1);
        assert!(!c.is_dirty());
    }

    #[test]
    fn repeated_reads_subscribe_once() {
        let graph = ReactiveGraph::new();
        let data = state(&graph, json!({ "a": 1 }));
        let d = data.clone();
        let c = graph
            .computation(
                Getter::new(move || {
                    let a = d.get("a").as_number().unwrap_or(0.0);
                    let b = d.get("a").as_number().unwrap_or(0.0);
                    Ok(Value::from(a + b))
                }),
                None,
                Default::default(),
            )
            .unwrap();

        let tracker = data.property_tracker("a").expect("reactive");
        assert_eq!(tracker.subscriber_ids(), vec![c.id()]);
        assert_eq!(c.dependency_count(), 1);
    }

    #[test]
    fn lazy_computation_waits_for_evaluate() {
        let graph = ReactiveGraph::new();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let c = graph
            .computation(
                Getter::new(move || {
                    counter.set(counter.get() + 1);
                    Ok(Value::from(42))
                }),
                None,
                ComputationOptions::default().lazy(),
            )
            .unwrap();

        assert_eq!(calls.get(), 0);
        assert!(c.is_dirty());
        assert_eq!(c.evaluate().unwrap().as_number(), Some(42.0));
        assert_eq!(calls.get(), 1);
        assert!(!c.is_dirty());
    }

    #[test]
    fn getter_errors_propagate_by_default() {
        let graph = ReactiveGraph::new();
        let result = graph.computation(
            Getter::named("broken", || Err("boom".into())),
            None,
            Default::default(),
        );
        match result {
            Err(ReactiveError::Evaluation { phase, expression, .. }) => {
                assert_eq!(phase, Phase::Getter);
                assert_eq!(expression, "broken");
            }
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn handled_getter_errors_yield_undefined() {
        let graph = ReactiveGraph::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let handler: ErrorHandler = Rc::new(move |err: &ReactiveError, ctx: &ErrorContext| {
            sink.borrow_mut().push((err.to_string(), ctx.info.clone()));
        });

        let c = graph
            .computation(
                Getter::named("broken", || Err("boom".into())),
                None,
                ComputationOptions::default().with_error_policy(ErrorPolicy::Handle(handler)),
            )
            .unwrap();

        assert!(c.value().is_undefined());
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "getter for computation \"broken\"");
    }

    #[test]
    fn user_computations_use_the_graph_handler() {
        let graph = ReactiveGraph::new();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        graph.set_error_handler(Rc::new(move |_: &ReactiveError, _: &ErrorContext| {
            counter.set(counter.get() + 1)
        }));

        let c = graph.computation(
            Getter::new(|| Err("boom".into())),
            None,
            ComputationOptions::default().user(),
        );
        assert!(c.is_ok());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn sync_computation_runs_callback_on_write() {
        let graph = ReactiveGraph::new();
        let data = state(&graph, json!({ "a": 1 }));
        let d = data.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let callback: Callback = Rc::new(move |new: &Value, old: &Value| {
            sink.borrow_mut().push((new.as_number(), old.as_number()));
            Ok(())
        });

        let _c = graph
            .computation(
                Getter::new(move || Ok(d.get("a"))),
                Some(callback),
                ComputationOptions::default().sync(),
            )
            .unwrap();

        data.set("a", 2);
        data.set("a", 2);
        data.set("a", 3);
        assert_eq!(*seen.borrow(), vec![(Some(2.0), Some(1.0)), (Some(3.0), Some(2.0))]);
    }

    #[test]
    fn teardown_unsubscribes_and_is_idempotent() {
        let graph = ReactiveGraph::new();
        let data = state(&graph, json!({ "a": 1 }));
        let d = data.clone();
        let c = graph
            .computation(Getter::new(move || Ok(d.get("a"))), None, Default::default())
            .unwrap();

        let tracker = data.property_tracker("a").expect("reactive");
        assert_eq!(tracker.subscriber_count(), 1);

        c.teardown();
        c.teardown();
        assert!(!c.is_active());
        assert_eq!(tracker.subscriber_count(), 0);
        assert_eq!(c.dependency_count(), 0);
    }

    #[test]
    fn path_getter_resolves_nested_values() {
        let graph = ReactiveGraph::new();
        let data = state(&graph, json!({ "b": { "c": 2 }, "list": [10, 20] }));

        let c = Getter::path(&data, "b.c").unwrap();
        assert_eq!(c.call().unwrap().as_number(), Some(2.0));
        let index = Getter::path(&data, "list.1").unwrap();
        assert_eq!(index.call().unwrap().as_number(), Some(20.0));
        let length = Getter::path(&data, "list.length").unwrap();
        assert_eq!(length.call().unwrap().as_number(), Some(2.0));
        let past_primitive = Getter::path(&data, "b.c.d").unwrap();
        assert!(past_primitive.call().unwrap().is_undefined());
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let data = Object::new();
        for path in ["a[0]", "a + b", "fn()", "a-b"] {
            assert!(matches!(
                Getter::path(&data, path),
                Err(ReactiveError::InvalidPath(_))
            ));
        }
        assert!(Getter::path(&data, "$a._b.c1").is_ok());
    }
}
