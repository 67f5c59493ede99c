//! Observable Wrapper
//!
//! Observing a structure attaches an [`Observer`] to it. The observer owns
//! the structure-level [`Tracker`] that fires when the structure is
//! reshaped (a property added or removed, a sequence mutated), and marks the
//! structure so observing it again returns the same wrapper.
//!
//! # Reshaping
//!
//! [`add_property`] and [`remove_property`] are the only ways to change the
//! shape of an observed keyed structure reactively. Both refuse to reshape a
//! root state container (a structure handed to a [`Scope`](crate::Scope) as
//! its state), since a computation reading a root key that does not exist yet
//! cannot be told apart from a typo.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::ReactiveError;
use crate::reactive::{ReactiveGraph, Tracker, WeakGraph};

use super::array::Array;
use super::value::Value;

/// The wrapper attached to an observed structure.
pub struct Observer {
    tracker: Rc<Tracker>,
    /// Number of scopes using this structure as their root state.
    root_count: Cell<usize>,
    graph: WeakGraph,
}

impl Observer {
    fn new(graph: &ReactiveGraph) -> Rc<Self> {
        Rc::new(Self {
            tracker: Tracker::new(graph),
            root_count: Cell::new(0),
            graph: graph.downgrade(),
        })
    }

    /// The structure-level tracker.
    pub fn tracker(&self) -> &Rc<Tracker> {
        &self.tracker
    }

    /// Whether the structure is currently a root state container.
    pub fn is_root(&self) -> bool {
        self.root_count.get() > 0
    }

    pub fn root_count(&self) -> usize {
        self.root_count.get()
    }

    pub(crate) fn release_root(&self) {
        self.root_count.set(self.root_count.get().saturating_sub(1));
    }

    pub(crate) fn graph(&self) -> Option<ReactiveGraph> {
        self.graph.upgrade()
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("tracker", &self.tracker.id())
            .field("root_count", &self.root_count.get())
            .finish()
    }
}

/// Wrap `value` if it is an observable structure.
///
/// Returns the existing wrapper when the structure was already observed.
/// Otherwise a wrapper is created only if the value is an extensible,
/// non-internal `Object` or `Array` and observation is enabled on the graph.
/// Nested structures are observed recursively.
pub fn observe(graph: &ReactiveGraph, value: &Value) -> Option<Rc<Observer>> {
    match value {
        Value::Object(object) => {
            if let Some(existing) = object.observer() {
                return Some(existing);
            }
            if !graph.is_observing() || !object.is_extensible() || object.is_internal() {
                return None;
            }
            let observer = Observer::new(graph);
            // Attached before walking so cycles resolve to this wrapper.
            object.attach_observer(observer.clone());
            object.walk(graph);
            Some(observer)
        }
        Value::Array(array) => {
            if let Some(existing) = array.observer() {
                return Some(existing);
            }
            if !graph.is_observing() || !array.is_extensible() || array.is_internal() {
                return None;
            }
            let observer = Observer::new(graph);
            array.attach_observer(observer.clone());
            for item in array.to_vec_untracked() {
                observe(graph, &item);
            }
            Some(observer)
        }
        _ => None,
    }
}

/// Observe `value` and designate it a root state container.
pub fn observe_root(graph: &ReactiveGraph, value: &Value) -> Option<Rc<Observer>> {
    let observer = observe(graph, value)?;
    observer.root_count.set(observer.root_count.get() + 1);
    Some(observer)
}

/// Record the trackers of every observed structure inside `array`, at any
/// depth of nested sequences.
pub(crate) fn depend_array(array: &Array) {
    for item in array.to_vec_untracked() {
        match &item {
            Value::Object(object) => {
                if let Some(observer) = object.observer() {
                    observer.tracker().depend();
                }
            }
            Value::Array(nested) => {
                if let Some(observer) = nested.observer() {
                    observer.tracker().depend();
                }
                depend_array(nested);
            }
            _ => {}
        }
    }
}

/// A property name or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    Name(String),
    Index(usize),
}

impl PropertyKey {
    /// The key as a sequence index, if it is one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PropertyKey::Index(index) => Some(*index),
            PropertyKey::Name(name) => name.parse().ok(),
        }
    }

    fn into_name(self) -> String {
        match self {
            PropertyKey::Name(name) => name,
            PropertyKey::Index(index) => index.to_string(),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(name)
    }
}

impl From<usize> for PropertyKey {
    fn from(index: usize) -> Self {
        PropertyKey::Index(index)
    }
}

/// Add (or overwrite) a property so that subscribers see it.
///
/// - Sequences: the value is spliced in at the index, padding with
///   `Undefined` past the end.
/// - Keyed structures: an existing key is written normally; a new key on an
///   observed structure becomes a reactive property and the structure
///   tracker fires; a new key on an unobserved structure is stored plainly.
///
/// Root state containers and non-structures are refused with a warning.
/// Returns the stored value.
pub fn add_property(
    graph: &ReactiveGraph,
    target: &Value,
    key: PropertyKey,
    value: Value,
) -> Result<Value, ReactiveError> {
    match target {
        Value::Array(array) => {
            let Some(index) = key.as_index() else {
                return Err(graph.warn(ReactiveError::InvalidKey {
                    action: "set",
                    key: key.into_name(),
                }));
            };
            if index > array.len_untracked() {
                array.set_untracked(index - 1, Value::Undefined);
            }
            array.splice(index, 1, vec![value.clone()]);
            Ok(value)
        }
        Value::Object(object) => {
            let key = key.into_name();
            if object.contains_key_untracked(&key) {
                object.set(key, value.clone());
                return Ok(value);
            }

            let observer = object.observer();
            if object.is_internal() || observer.as_ref().is_some_and(|ob| ob.is_root()) {
                return Err(graph.warn(ReactiveError::RootReshape { action: "adding" }));
            }
            match observer {
                None => object.insert_plain(key, value.clone()),
                Some(observer) => {
                    object.define_reactive(graph, key, value.clone());
                    observer.tracker().notify();
                }
            }
            Ok(value)
        }
        _ => Err(graph.warn(ReactiveError::InvalidTarget { action: "set" })),
    }
}

/// Remove a property so that subscribers see it.
///
/// Sequences splice the index out. On an observed keyed structure both the
/// structure tracker and the removed property's tracker fire. Removing a
/// missing key does nothing.
pub fn remove_property(
    graph: &ReactiveGraph,
    target: &Value,
    key: PropertyKey,
) -> Result<(), ReactiveError> {
    match target {
        Value::Array(array) => {
            let Some(index) = key.as_index() else {
                return Err(graph.warn(ReactiveError::InvalidKey {
                    action: "delete",
                    key: key.into_name(),
                }));
            };
            array.splice(index, 1, Vec::new());
            Ok(())
        }
        Value::Object(object) => {
            let observer = object.observer();
            if object.is_internal() || observer.as_ref().is_some_and(|ob| ob.is_root()) {
                return Err(graph.warn(ReactiveError::RootReshape { action: "deleting" }));
            }
            let key = key.into_name();
            let Some(property_tracker) = object.remove_entry(&key) else {
                return Ok(());
            };
            if let Some(observer) = observer {
                let mut trackers: Vec<&Tracker> = vec![&**observer.tracker()];
                if let Some(tracker) = property_tracker.as_deref() {
                    trackers.push(tracker);
                }
                Tracker::notify_all(&trackers);
            }
            Ok(())
        }
        _ => Err(graph.warn(ReactiveError::InvalidTarget { action: "delete" })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn collect_warnings(graph: &ReactiveGraph) -> Rc<RefCell<Vec<String>>> {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        graph.set_warn_handler(Rc::new(move |err: &ReactiveError| {
            sink.borrow_mut().push(err.to_string());
        }));
        warnings
    }

    #[test]
    fn observe_is_idempotent() {
        let graph = ReactiveGraph::new();
        let value = Value::from(json!({ "a": 1 }));

        let first = observe(&graph, &value).expect("observed");
        let second = observe(&graph, &value).expect("observed");
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn primitives_are_not_observed() {
        let graph = ReactiveGraph::new();
        assert!(observe(&graph, &Value::from(1)).is_none());
        assert!(observe(&graph, &Value::Null).is_none());
    }

    #[test]
    fn non_extensible_and_internal_structures_are_skipped() {
        let graph = ReactiveGraph::new();

        let frozen = Value::from(json!({ "a": 1 }));
        if let Value::Object(object) = &frozen {
            object.prevent_extensions();
        }
        assert!(observe(&graph, &frozen).is_none());

        let internal = Value::Object(crate::Object::internal());
        assert!(observe(&graph, &internal).is_none());
    }

    #[test]
    fn observing_can_be_disabled() {
        let graph = ReactiveGraph::new();
        graph.set_observing(false);
        assert!(observe(&graph, &Value::from(json!({ "a": 1 }))).is_none());

        graph.set_observing(true);
        assert!(observe(&graph, &Value::from(json!({ "a": 1 }))).is_some());
    }

    #[test]
    fn nested_sequence_elements_are_observed() {
        let graph = ReactiveGraph::new();
        let value = Value::from(json!({ "list": [{ "x": 1 }, [2]] }));
        observe(&graph, &value);

        let list = value.as_object().map(|o| o.get_untracked("list")).unwrap_or_default();
        let list = list.as_array().expect("array");
        assert!(list.is_observed());
        assert!(list.get_untracked(0).as_object().is_some_and(|o| o.is_observed()));
        assert!(list.get_untracked(1).as_array().is_some_and(|a| a.is_observed()));
    }

    #[test]
    fn cyclic_structures_reuse_the_wrapper() {
        let graph = ReactiveGraph::new();
        let object = crate::Object::new();
        object.set("self", Value::Object(object.clone()));

        let value = Value::Object(object.clone());
        let observer = observe(&graph, &value).expect("observed");
        assert!(object.is_reactive_property("self"));
        assert!(Rc::ptr_eq(&observer, &object.observer().expect("observer")));
    }

    #[test]
    fn add_property_defines_reactive_key() {
        let graph = ReactiveGraph::new();
        let value = Value::from(json!({ "a": 1 }));
        observe(&graph, &value);

        let stored = add_property(&graph, &value, "b".into(), Value::from(2)).unwrap();
        assert_eq!(stored.as_number(), Some(2.0));
        let object = value.as_object().expect("object");
        assert!(object.is_reactive_property("b"));
    }

    #[test]
    fn add_property_on_unobserved_object_is_plain() {
        let graph = ReactiveGraph::new();
        let value = Value::from(json!({}));
        add_property(&graph, &value, "k".into(), Value::from(1)).unwrap();

        let object = value.as_object().expect("object");
        assert_eq!(object.get_untracked("k").as_number(), Some(1.0));
        assert!(!object.is_reactive_property("k"));
    }

    #[test]
    fn add_property_pads_sequences() {
        let graph = ReactiveGraph::new();
        let value = Value::from(json!([1]));
        add_property(&graph, &value, 3.into(), Value::from("x")).unwrap();

        let array = value.as_array().expect("array");
        assert_eq!(array.len_untracked(), 4);
        assert!(array.get_untracked(2).is_undefined());
        assert_eq!(array.get_untracked(3).as_str(), Some("x"));

        add_property(&graph, &value, "0".into(), Value::from(9)).unwrap();
        assert_eq!(array.get_untracked(0).as_number(), Some(9.0));
        assert_eq!(array.len_untracked(), 4);
    }

    #[test]
    fn reshaping_roots_is_refused_with_warning() {
        let graph = ReactiveGraph::new();
        let warnings = collect_warnings(&graph);
        let value = Value::from(json!({ "a": 1 }));
        observe_root(&graph, &value);

        let err = add_property(&graph, &value, "b".into(), Value::from(1)).unwrap_err();
        assert!(matches!(err, ReactiveError::RootReshape { action: "adding" }));
        let err = remove_property(&graph, &value, "a".into()).unwrap_err();
        assert!(matches!(err, ReactiveError::RootReshape { action: "deleting" }));

        assert_eq!(warnings.borrow().len(), 2);
        let object = value.as_object().expect("object");
        assert!(object.contains_key_untracked("a"));
        assert!(!object.contains_key_untracked("b"));

        // Existing root keys can still be written.
        assert!(add_property(&graph, &value, "a".into(), Value::from(5)).is_ok());
    }

    #[test]
    fn reshaping_primitives_is_refused() {
        let graph = ReactiveGraph::new();
        let warnings = collect_warnings(&graph);

        let err = add_property(&graph, &Value::from(1), "x".into(), Value::Null).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidTarget { action: "set" }));
        let err = remove_property(&graph, &Value::Undefined, "x".into()).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidTarget { action: "delete" }));
        assert_eq!(warnings.borrow().len(), 2);
    }

    #[test]
    fn silent_config_suppresses_warnings() {
        let graph = ReactiveGraph::with_config(crate::Config::default().with_silent(true));
        let warnings = collect_warnings(&graph);

        assert!(add_property(&graph, &Value::Null, "x".into(), Value::Null).is_err());
        assert!(warnings.borrow().is_empty());
    }

    #[test]
    fn remove_property_deletes_keys_and_indices() {
        let graph = ReactiveGraph::new();
        let object = Value::from(json!({ "a": 1, "b": 2 }));
        let array = Value::from(json!([1, 2, 3]));
        observe(&graph, &object);
        observe(&graph, &array);

        remove_property(&graph, &object, "a".into()).unwrap();
        remove_property(&graph, &object, "missing".into()).unwrap();
        assert_eq!(object.as_object().map(|o| o.keys_untracked()), Some(vec!["b".to_string()]));

        remove_property(&graph, &array, 1.into()).unwrap();
        let items = array.as_array().map(|a| a.to_vec_untracked()).unwrap_or_default();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_number(), Some(3.0));
    }
}
