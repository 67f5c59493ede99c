//! Tendril Core
//!
//! This crate provides the reactive state engine underneath the Tendril UI
//! framework. It implements:
//!
//! - Transparent observation of a dynamic state tree
//! - Automatic dependency tracking between state and computations
//! - Batched, ordered re-runs at tick boundaries
//! - Scopes that own state and the computations declared against it
//!
//! Rendering, template compilation, and tree diffing live outside this crate;
//! they plug in through [`Scope::mount`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observe`: the `Value` tree and the wrapper that intercepts reads and writes
//! - `reactive`: trackers, computations, and the `ReactiveGraph` that owns them
//! - `scheduler`: the update queue, flush ordering, and tick driving
//! - `scope`: the owning unit of state
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tendril_core::{ReactiveGraph, Scope, Value, WatchOptions};
//!
//! let graph = ReactiveGraph::new();
//! let scope = Scope::new(&graph, "counter", Value::from(json!({ "count": 0 }))).unwrap();
//!
//! // Declare a derived value
//! let doubled = scope
//!     .computed("doubled", |data| {
//!         Ok(Value::from(data.get("count").as_number().unwrap_or(0.0) * 2.0))
//!     })
//!     .unwrap();
//!
//! // Watch a path
//! scope
//!     .watch("count", |new, _old| {
//!         println!("count is now {new:?}");
//!         Ok(())
//!     }, WatchOptions::default())
//!     .unwrap();
//!
//! // Update the state
//! scope.data().set("count", 5);
//! assert_eq!(doubled.get().unwrap().as_number(), Some(10.0));
//!
//! // The watcher runs at the next tick
//! graph.tick();
//! ```

pub mod config;
pub mod error;
pub mod observe;
pub mod reactive;
pub mod scheduler;
pub mod scope;

pub use config::Config;
pub use error::{BoxError, ErrorContext, ErrorHandler, Phase, ReactiveError, WarnHandler};
pub use observe::{Array, Object, Observer, PropertyKey, Value};
pub use reactive::{
    Computation, ComputationOptions, ErrorPolicy, Getter, ReactiveGraph, SubscriberId, Tracker,
};
pub use scheduler::{FlushHookId, FlushReport};
pub use scope::{Computed, Scope, WatchHandle, WatchOptions, WatchSource};
