//! Keyed Structures
//!
//! An [`Object`] is an insertion-ordered map from string keys to [`Value`]s.
//! Until it is observed it behaves like a plain map. Observing it (see
//! [`observe`](super::observe)) turns every property present at that moment
//! into a reactive property with its own [`Tracker`]:
//!
//! - Reading a reactive property inside a running computation subscribes the
//!   computation to the property. If the property holds an observed
//!   structure, the computation is also subscribed to that structure's own
//!   tracker (and, for sequences, to every nested sequence element), so
//!   replacing or reshaping the nested value is visible to the reader.
//! - Writing a reactive property compares old and new values with
//!   [`Value::same_value`]; only a real change stores, observes the new
//!   value, and notifies.
//!
//! Properties added later with [`Object::set`] are plain: they are stored but
//! never notify. Use [`ReactiveGraph::add_property`](crate::ReactiveGraph::add_property)
//! to add a reactive one.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::ReactiveError;
use crate::reactive::{ReactiveGraph, Tracker};

use super::observer::{depend_array, observe, Observer};
use super::value::Value;

/// A keyed structure in an observed state tree.
///
/// Cloning an `Object` clones the handle; both handles refer to the same
/// structure.
#[derive(Clone)]
pub struct Object {
    cell: Rc<ObjectCell>,
}

struct ObjectCell {
    props: RefCell<IndexMap<String, Property>>,
    /// Hidden marker: the wrapper attached by `observe`, if any.
    observer: RefCell<Option<Rc<Observer>>>,
    extensible: Cell<bool>,
    internal: bool,
}

struct Property {
    value: Value,
    /// `None` for plain properties.
    slot: Option<ReactiveSlot>,
}

struct ReactiveSlot {
    tracker: Rc<Tracker>,
    /// Wrapper of the current value, when the value is an observed structure.
    child: Option<Rc<Observer>>,
}

/// What a write has to do once the property map is released.
enum WriteOutcome {
    Done,
    AddedToRoot(Rc<Observer>),
    Changed(Rc<Tracker>),
}

impl Object {
    /// Create an empty, extensible structure.
    pub fn new() -> Self {
        Self::with_flags(false)
    }

    /// Create a framework-internal structure. Internal structures are never
    /// observed and cannot be reshaped through `add_property`.
    pub fn internal() -> Self {
        Self::with_flags(true)
    }

    fn with_flags(internal: bool) -> Self {
        Self {
            cell: Rc::new(ObjectCell {
                props: RefCell::new(IndexMap::new()),
                observer: RefCell::new(None),
                extensible: Cell::new(true),
                internal,
            }),
        }
    }

    /// Whether both handles refer to the same structure.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as *const () as usize
    }

    pub fn is_extensible(&self) -> bool {
        self.cell.extensible.get()
    }

    /// Mark the structure as non-extensible. Non-extensible structures are
    /// never observed and are skipped by deep traversal.
    pub fn prevent_extensions(&self) {
        self.cell.extensible.set(false);
    }

    pub fn is_internal(&self) -> bool {
        self.cell.internal
    }

    /// The wrapper attached to this structure, if it has been observed.
    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.cell.observer.borrow().clone()
    }

    pub fn is_observed(&self) -> bool {
        self.cell.observer.borrow().is_some()
    }

    /// Read a property.
    ///
    /// Inside a running computation this records the property's tracker, and
    /// for observed nested structures their trackers too. Reading a missing
    /// key of an observed structure records the structure's own tracker, so
    /// adding the key later re-runs the reader.
    pub fn get(&self, key: &str) -> Value {
        let found = {
            let props = self.cell.props.borrow();
            props.get(key).map(|prop| {
                let slot = prop
                    .slot
                    .as_ref()
                    .map(|slot| (slot.tracker.clone(), slot.child.clone()));
                (prop.value.clone(), slot)
            })
        };

        match found {
            Some((value, Some((tracker, child)))) => {
                if tracker.depend() {
                    if let Some(child) = child {
                        child.tracker().depend();
                        if let Value::Array(array) = &value {
                            depend_array(array);
                        }
                    }
                }
                value
            }
            Some((value, None)) => value,
            None => {
                if let Some(observer) = self.observer() {
                    observer.tracker().depend();
                }
                Value::Undefined
            }
        }
    }

    /// Read a property without recording any dependency.
    pub fn get_untracked(&self, key: &str) -> Value {
        self.cell
            .props
            .borrow()
            .get(key)
            .map(|prop| prop.value.clone())
            .unwrap_or_default()
    }

    /// Write a property.
    ///
    /// Writing a reactive property notifies its subscribers when the value
    /// actually changed. Writing a missing key adds a plain, non-reactive
    /// property; on a root state container that also emits a warning.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        let outcome = {
            let mut props = self.cell.props.borrow_mut();
            match props.get_mut(&key) {
                None => {
                    props.insert(
                        key.clone(),
                        Property {
                            value: value.clone(),
                            slot: None,
                        },
                    );
                    match self.observer() {
                        Some(observer) if observer.is_root() => WriteOutcome::AddedToRoot(observer),
                        _ => WriteOutcome::Done,
                    }
                }
                Some(prop) => match &prop.slot {
                    None => {
                        prop.value = value.clone();
                        WriteOutcome::Done
                    }
                    Some(slot) => {
                        if prop.value.same_value(&value) {
                            return;
                        }
                        prop.value = value.clone();
                        WriteOutcome::Changed(slot.tracker.clone())
                    }
                },
            }
        };

        match outcome {
            WriteOutcome::Done => {}
            WriteOutcome::AddedToRoot(observer) => {
                if let Some(graph) = observer.graph() {
                    graph.warn(ReactiveError::ImplicitRootAssignment { key });
                }
            }
            WriteOutcome::Changed(tracker) => {
                let child = tracker.graph().and_then(|graph| observe(&graph, &value));
                if let Some(prop) = self.cell.props.borrow_mut().get_mut(&key) {
                    if let Some(slot) = prop.slot.as_mut() {
                        slot.child = child;
                    }
                }
                tracker.notify();
            }
        }
    }

    /// Whether the key exists. Records the structure's own tracker when
    /// observed, since only reshaping can change the answer.
    pub fn contains_key(&self, key: &str) -> bool {
        self.record_shape();
        self.cell.props.borrow().contains_key(key)
    }

    pub fn contains_key_untracked(&self, key: &str) -> bool {
        self.cell.props.borrow().contains_key(key)
    }

    /// Property names in insertion order. Records the structure's own tracker.
    pub fn keys(&self) -> Vec<String> {
        self.record_shape();
        self.keys_untracked()
    }

    pub fn keys_untracked(&self) -> Vec<String> {
        self.cell.props.borrow().keys().cloned().collect()
    }

    /// Number of properties. Records the structure's own tracker.
    pub fn len(&self) -> usize {
        self.record_shape();
        self.cell.props.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries without recording dependencies.
    pub fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.cell
            .props
            .borrow()
            .iter()
            .map(|(key, prop)| (key.clone(), prop.value.clone()))
            .collect()
    }

    /// Whether `key` is a reactive property (as opposed to a plain one).
    pub fn is_reactive_property(&self, key: &str) -> bool {
        self.cell
            .props
            .borrow()
            .get(key)
            .is_some_and(|prop| prop.slot.is_some())
    }

    /// The tracker behind a reactive property.
    pub fn property_tracker(&self, key: &str) -> Option<Rc<Tracker>> {
        self.cell
            .props
            .borrow()
            .get(key)
            .and_then(|prop| prop.slot.as_ref().map(|slot| slot.tracker.clone()))
    }

    fn record_shape(&self) {
        if let Some(observer) = self.observer() {
            observer.tracker().depend();
        }
    }

    // ------------------------------------------------------------------------
    // Crate-internal plumbing used by the observer
    // ------------------------------------------------------------------------

    pub(crate) fn attach_observer(&self, observer: Rc<Observer>) {
        *self.cell.observer.borrow_mut() = Some(observer);
    }

    /// Convert every current property into a reactive one.
    pub(crate) fn walk(&self, graph: &ReactiveGraph) {
        for (key, value) in self.entries_untracked() {
            self.define_reactive(graph, key, value);
        }
    }

    /// Install `key` as a reactive property holding `value`.
    pub(crate) fn define_reactive(&self, graph: &ReactiveGraph, key: String, value: Value) {
        let tracker = Tracker::new(graph);
        let child = observe(graph, &value);
        self.cell.props.borrow_mut().insert(
            key,
            Property {
                value,
                slot: Some(ReactiveSlot { tracker, child }),
            },
        );
    }

    pub(crate) fn insert_plain(&self, key: String, value: Value) {
        self.cell
            .props
            .borrow_mut()
            .insert(key, Property { value, slot: None });
    }

    /// Remove a property, returning its tracker if it was reactive.
    pub(crate) fn remove_entry(&self, key: &str) -> Option<Option<Rc<Tracker>>> {
        self.cell
            .props
            .borrow_mut()
            .shift_remove(key)
            .map(|prop| prop.slot.map(|slot| slot.tracker))
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let object = Object::new();
        for (key, value) in iter {
            object.insert_plain(key.into(), value);
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Object(self.clone()), f)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(json: serde_json::Value) -> Object {
        match Value::from(json) {
            Value::Object(object) => object,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn plain_object_get_and_set() {
        let obj = object(json!({ "a": 1 }));
        assert_eq!(obj.get("a").as_number(), Some(1.0));

        obj.set("a", 2);
        obj.set("b", "x");
        assert_eq!(obj.get("a").as_number(), Some(2.0));
        assert_eq!(obj.get("b").as_str(), Some("x"));
        assert!(obj.get("missing").is_undefined());
        assert!(!obj.is_reactive_property("a"));
    }

    #[test]
    fn keys_keep_insertion_order() {
        let obj = Object::new();
        obj.set("z", 1);
        obj.set("a", 2);
        obj.set("m", 3);
        assert_eq!(obj.keys(), vec!["z", "a", "m"]);
        assert_eq!(obj.len(), 3);
    }

    #[test]
    fn observing_makes_existing_properties_reactive() {
        let graph = ReactiveGraph::new();
        let obj = object(json!({ "a": 1, "b": { "c": 2 } }));
        graph.observe(&Value::Object(obj.clone()));

        assert!(obj.is_reactive_property("a"));
        assert!(obj.is_reactive_property("b"));
        let nested = obj.get_untracked("b");
        assert!(nested.as_object().is_some_and(Object::is_observed));
    }

    #[test]
    fn implicit_assignment_on_observed_object_stays_plain() {
        let graph = ReactiveGraph::new();
        let obj = object(json!({ "a": 1 }));
        graph.observe(&Value::Object(obj.clone()));

        obj.set("late", 5);
        assert_eq!(obj.get_untracked("late").as_number(), Some(5.0));
        assert!(!obj.is_reactive_property("late"));
    }

    #[test]
    fn writing_a_new_structure_observes_it() {
        let graph = ReactiveGraph::new();
        let obj = object(json!({ "b": { "c": 2 } }));
        graph.observe(&Value::Object(obj.clone()));

        obj.set("b", Value::from(json!({ "c": 10 })));
        let replaced = obj.get_untracked("b");
        let replaced = replaced.as_object().expect("object");
        assert!(replaced.is_observed());
        assert!(replaced.is_reactive_property("c"));
    }
}
