//! Scopes
//!
//! A [`Scope`] is the owning unit of state for one piece of UI: a root state
//! container plus every computation declared against it. It is the surface a
//! rendering layer talks to.
//!
//! - [`Scope::mount`] installs the primary computation (render, then patch).
//! - [`Scope::computed`] declares a cached derived value.
//! - [`Scope::watch`] runs a callback whenever a path or expression changes.
//! - [`Scope::destroy`] tears all of it down.
//!
//! Errors from the primary computation propagate to whoever flushes; errors
//! from derived values and watchers go to the graph's error handler.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{BoxError, Phase, ReactiveError};
use crate::observe::{Object, Value};
use crate::reactive::{
    Callback, Computation, ComputationOptions, ComputationOwner, Getter, ReactiveGraph,
    SubscriberId,
};
use crate::scheduler::FlushHookId;

struct ScopeInner {
    name: String,
    graph: ReactiveGraph,
    data: Object,
    computations: RefCell<Vec<Rc<Computation>>>,
    primary: RefCell<Option<Rc<Computation>>>,
    computed: RefCell<IndexMap<String, Computed>>,
    before_update: RefCell<Vec<Rc<dyn Fn()>>>,
    flush_hooks: RefCell<Vec<FlushHookId>>,
    destroying: Cell<bool>,
    destroyed: Cell<bool>,
}

impl ComputationOwner for ScopeInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_being_destroyed(&self) -> bool {
        self.destroying.get()
    }

    fn remove_computation(&self, id: SubscriberId) {
        self.computations.borrow_mut().retain(|c| c.id() != id);
    }
}

/// An owning unit of state.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

/// A cached derived value declared with [`Scope::computed`].
#[derive(Clone)]
pub struct Computed {
    computation: Rc<Computation>,
}

impl Computed {
    /// Current value, re-evaluated only if a dependency changed since the
    /// last read. Inside a running computation the reader is subscribed to
    /// everything this value depends on.
    pub fn get(&self) -> Result<Value, ReactiveError> {
        let value = if self.computation.is_dirty() {
            self.computation.evaluate()?
        } else {
            self.computation.value()
        };
        self.computation.depend();
        Ok(value)
    }

    pub fn computation(&self) -> &Rc<Computation> {
        &self.computation
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Computed").field(&self.computation).finish()
    }
}

/// What a watcher observes.
pub enum WatchSource {
    /// Dot-delimited path into the scope's state.
    Path(String),
    /// Arbitrary expression.
    Function(Getter),
}

impl From<&str> for WatchSource {
    fn from(path: &str) -> Self {
        WatchSource::Path(path.to_string())
    }
}

impl From<String> for WatchSource {
    fn from(path: String) -> Self {
        WatchSource::Path(path)
    }
}

impl From<Getter> for WatchSource {
    fn from(getter: Getter) -> Self {
        WatchSource::Function(getter)
    }
}

/// Options for [`Scope::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Fire on nested changes too.
    pub deep: bool,
    /// Fire once right away with the initial value.
    pub immediate: bool,
    /// Fire inside the write instead of at the next tick.
    pub sync: bool,
}

/// Handle returned by [`Scope::watch`].
#[derive(Clone)]
pub struct WatchHandle {
    computation: Rc<Computation>,
}

impl WatchHandle {
    /// Stop watching.
    pub fn unwatch(&self) {
        self.computation.teardown();
    }

    pub fn computation(&self) -> &Rc<Computation> {
        &self.computation
    }
}

impl Scope {
    /// Create a scope over `data`, observing it as a root state container.
    pub fn new(
        graph: &ReactiveGraph,
        name: impl Into<String>,
        data: Value,
    ) -> Result<Self, ReactiveError> {
        let name = name.into();
        let Value::Object(object) = data else {
            return Err(ReactiveError::NotAnObject { scope: name });
        };
        graph.observe_root(&Value::Object(object.clone()));
        debug!(scope = %name, "scope created");

        Ok(Self {
            inner: Rc::new(ScopeInner {
                name,
                graph: graph.clone(),
                data: object,
                computations: RefCell::new(Vec::new()),
                primary: RefCell::new(None),
                computed: RefCell::new(IndexMap::new()),
                before_update: RefCell::new(Vec::new()),
                flush_hooks: RefCell::new(Vec::new()),
                destroying: Cell::new(false),
                destroyed: Cell::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The root state container.
    pub fn data(&self) -> &Object {
        &self.inner.data
    }

    pub fn graph(&self) -> &ReactiveGraph {
        &self.inner.graph
    }

    fn owner(&self) -> Weak<dyn ComputationOwner> {
        let weak = Rc::downgrade(&self.inner);
        weak
    }

    fn register(&self, computation: &Rc<Computation>) {
        self.inner
            .computations
            .borrow_mut()
            .push(computation.clone());
    }

    /// Install the primary computation: `render` the state, then `patch` the
    /// output. Runs once now and again whenever anything `render` read
    /// changes.
    pub fn mount(
        &self,
        render: impl Fn(&Object) -> Result<Value, BoxError> + 'static,
        patch: impl Fn(&Value) -> Result<(), BoxError> + 'static,
    ) -> Result<Rc<Computation>, ReactiveError> {
        let previous = self.inner.primary.borrow_mut().take();
        if let Some(previous) = previous {
            previous.teardown();
        }

        let data = self.inner.data.clone();
        let getter = Getter::named(format!("{} render", self.inner.name), move || {
            let output = render(&data)?;
            patch(&output)?;
            Ok(Value::Undefined)
        });

        let weak = Rc::downgrade(&self.inner);
        let options = ComputationOptions::default().with_before(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.destroyed.get() {
                return;
            }
            let hooks = inner.before_update.borrow().clone();
            for hook in hooks {
                hook();
            }
        });

        let computation =
            Computation::new(&self.inner.graph, Some(self.owner()), getter, None, options)?;
        self.register(&computation);
        *self.inner.primary.borrow_mut() = Some(computation.clone());
        debug!(scope = %self.inner.name, id = %computation.id(), "mounted");
        Ok(computation)
    }

    /// The primary computation, if mounted.
    pub fn primary(&self) -> Option<Rc<Computation>> {
        self.inner.primary.borrow().clone()
    }

    /// Declare a cached derived value named `name`.
    pub fn computed(
        &self,
        name: impl Into<String>,
        getter: impl Fn(&Object) -> Result<Value, BoxError> + 'static,
    ) -> Result<Computed, ReactiveError> {
        let name = name.into();
        let data = self.inner.data.clone();
        let getter = Getter::named(name.clone(), move || getter(&data));
        let computation = Computation::new(
            &self.inner.graph,
            Some(self.owner()),
            getter,
            None,
            ComputationOptions::default().lazy().user(),
        )?;
        self.register(&computation);

        let computed = Computed { computation };
        self.inner
            .computed
            .borrow_mut()
            .insert(name, computed.clone());
        Ok(computed)
    }

    /// Look up a derived value by name.
    pub fn get_computed(&self, name: &str) -> Option<Computed> {
        self.inner.computed.borrow().get(name).cloned()
    }

    /// Run `callback(new, old)` whenever `source` changes.
    pub fn watch(
        &self,
        source: impl Into<WatchSource>,
        callback: impl Fn(&Value, &Value) -> Result<(), BoxError> + 'static,
        options: WatchOptions,
    ) -> Result<WatchHandle, ReactiveError> {
        let getter = match source.into() {
            WatchSource::Path(path) => Getter::path(&self.inner.data, &path)?,
            WatchSource::Function(getter) => getter,
        };

        let mut computation_options = ComputationOptions::default().user();
        computation_options.deep = options.deep;
        computation_options.sync = options.sync;

        let callback: Callback = Rc::new(callback);
        let computation = Computation::new(
            &self.inner.graph,
            Some(self.owner()),
            getter,
            Some(callback.clone()),
            computation_options,
        )?;
        self.register(&computation);

        if options.immediate {
            let value = computation.value();
            let result = self
                .inner
                .graph
                .untracked(|| callback(&value, &Value::Undefined));
            if let Err(source) = result {
                let err = ReactiveError::evaluation(
                    Phase::ImmediateCallback,
                    computation.expression(),
                    source,
                );
                computation.route_error(err, Phase::ImmediateCallback)?;
            }
        }

        Ok(WatchHandle { computation })
    }

    /// Run `hook` before every queued re-run of the primary computation.
    pub fn on_before_update(&self, hook: impl Fn() + 'static) {
        self.inner.before_update.borrow_mut().push(Rc::new(hook));
    }

    /// Run `hook` after every flush in which the primary computation ran.
    pub fn on_updated(&self, hook: impl Fn() + 'static) -> FlushHookId {
        let weak = Rc::downgrade(&self.inner);
        let id = self.inner.graph.on_flushed(move |report| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.destroyed.get() {
                return;
            }
            let primary = inner.primary.borrow().as_ref().map(|c| c.id());
            if primary.is_some_and(|id| report.ran.contains(&id)) {
                hook();
            }
        });
        self.inner.flush_hooks.borrow_mut().push(id);
        id
    }

    /// Computations currently owned by this scope.
    pub fn computations(&self) -> Vec<Rc<Computation>> {
        self.inner.computations.borrow().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Tear down every owned computation and release the root state.
    /// Calling it again does nothing.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroying.get() || inner.destroyed.get() {
            return;
        }
        inner.destroying.set(true);
        debug!(scope = %inner.name, "destroying scope");

        if let Some(primary) = inner.primary.borrow().clone() {
            primary.teardown();
        }
        let computations = std::mem::take(&mut *inner.computations.borrow_mut());
        for computation in computations.iter().rev() {
            computation.teardown();
        }
        inner.computed.borrow_mut().clear();
        inner.before_update.borrow_mut().clear();

        let hooks = std::mem::take(&mut *inner.flush_hooks.borrow_mut());
        for hook in hooks {
            inner.graph.remove_flush_hook(hook);
        }
        if let Some(observer) = inner.data.observer() {
            observer.release_root();
        }

        inner.destroyed.set(true);
        debug!(scope = %inner.name, "scope destroyed");
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("computations", &self.inner.computations.borrow().len())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
