//! Observable State
//!
//! This module holds the state side of the engine: the dynamic [`Value`]
//! tree, its two structure types, and the wrapper that makes them reactive.
//!
//! # Concepts
//!
//! ## Values
//!
//! State is a tree of [`Value`]s. Leaves are primitives; branches are
//! [`Object`]s (keyed) and [`Array`]s (ordered). Structure handles are
//! reference counted, so the same structure can appear in several places.
//!
//! ## Observation
//!
//! [`observe`] attaches an [`Observer`] to a structure and, recursively, to
//! everything inside it. From then on reads inside a running computation
//! are recorded and writes notify, without the caller doing anything
//! beyond using the normal accessors.
//!
//! ## Reshaping
//!
//! Properties that did not exist when a structure was observed are not
//! reactive. [`add_property`] and [`remove_property`] reshape a structure in
//! a way subscribers can see.

mod array;
mod object;
mod observer;
mod traverse;
mod value;

pub use array::Array;
pub use object::Object;
pub use observer::{add_property, observe, observe_root, remove_property, Observer, PropertyKey};
pub use traverse::traverse;
pub use value::Value;
