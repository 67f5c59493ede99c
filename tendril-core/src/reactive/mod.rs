//! Reactive Primitives
//!
//! This module implements the dependency side of the engine: trackers,
//! computations, and the graph that ties them together.
//!
//! # Concepts
//!
//! ## Trackers
//!
//! A [`Tracker`] sits on every reactive property and every observed
//! structure. It knows which computations read the thing it guards and
//! notifies them when it changes.
//!
//! ## Computations
//!
//! A [`Computation`] is a function over observable state. While it runs,
//! every tracked read subscribes it. It can be eager (evaluated at once and
//! re-run after changes), lazy (a cached derived value recomputed on demand),
//! or sync (re-run inside the write that invalidated it).
//!
//! ## The Graph
//!
//! A [`ReactiveGraph`] owns the active-computation stack, the update
//! scheduler, the id counters, and the handlers. It is passed explicitly
//! instead of living in a global, so independent graphs can coexist.
//!
//! # Implementation Notes
//!
//! The graph uses an explicit stack of running computations to detect
//! dependencies. When an observed value is read, the tracker checks the top
//! of the stack and, if a computation is there, the two register with each
//! other.

mod computation;
mod context;
mod runtime;
mod subscriber;
mod tracker;

pub use computation::{
    Callback, Computation, ComputationOptions, ComputationOwner, ErrorPolicy, Getter,
};
pub use context::{ContextGuard, ReactiveContext};
pub use runtime::{ReactiveGraph, WeakGraph};
pub use subscriber::SubscriberId;
pub use tracker::{Tracker, TrackerId};
