//! Ordered Sequences
//!
//! An [`Array`] is an explicit sequence container. Elements are not
//! individually reactive; the whole sequence shares one tracker (the one on
//! its [`Observer`]). Reads through the tracked accessors record that
//! tracker, and the seven mutating operations notify it:
//!
//! | Mutator   | Inserts            | Returns                   |
//! |-----------|--------------------|---------------------------|
//! | `push`    | the pushed item    | new length                |
//! | `unshift` | the prepended item | new length                |
//! | `pop`     | nothing            | removed last element      |
//! | `shift`   | nothing            | removed first element     |
//! | `splice`  | the given items    | removed elements          |
//! | `sort`    | nothing            | nothing                   |
//! | `reverse` | nothing            | nothing                   |
//!
//! Inserted items are observed before subscribers are notified.
//!
//! Direct index writes and truncation exist as [`Array::set_untracked`] and
//! [`Array::truncate_untracked`]. They change the contents without notifying
//! anyone; use [`ReactiveGraph::add_property`](crate::ReactiveGraph::add_property)
//! or `splice` when subscribers must see the change.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::observer::{observe, Observer};
use super::value::Value;

/// An ordered sequence in an observed state tree.
///
/// Cloning an `Array` clones the handle.
#[derive(Clone)]
pub struct Array {
    cell: Rc<ArrayCell>,
}

struct ArrayCell {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<Observer>>>,
    extensible: Cell<bool>,
    internal: bool,
}

impl Array {
    pub fn new() -> Self {
        Self::from_items(Vec::new(), false)
    }

    /// Create a framework-internal sequence that is never observed.
    pub fn internal() -> Self {
        Self::from_items(Vec::new(), true)
    }

    fn from_items(items: Vec<Value>, internal: bool) -> Self {
        Self {
            cell: Rc::new(ArrayCell {
                items: RefCell::new(items),
                observer: RefCell::new(None),
                extensible: Cell::new(true),
                internal,
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as *const () as usize
    }

    pub fn is_extensible(&self) -> bool {
        self.cell.extensible.get()
    }

    pub fn prevent_extensions(&self) {
        self.cell.extensible.set(false);
    }

    pub fn is_internal(&self) -> bool {
        self.cell.internal
    }

    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.cell.observer.borrow().clone()
    }

    pub fn is_observed(&self) -> bool {
        self.cell.observer.borrow().is_some()
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Element at `index`, or `Undefined` past the end.
    pub fn get(&self, index: usize) -> Value {
        self.record();
        self.get_untracked(index)
    }

    pub fn get_untracked(&self, index: usize) -> Value {
        self.cell
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.record();
        self.len_untracked()
    }

    pub fn len_untracked(&self) -> usize {
        self.cell.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.record();
        self.to_vec_untracked()
    }

    pub fn to_vec_untracked(&self) -> Vec<Value> {
        self.cell.items.borrow().clone()
    }

    fn record(&self) {
        if let Some(observer) = self.observer() {
            observer.tracker().depend();
        }
    }

    // ------------------------------------------------------------------------
    // Intercepted mutators
    // ------------------------------------------------------------------------

    /// Append an item. Returns the new length.
    pub fn push(&self, item: impl Into<Value>) -> usize {
        let item = item.into();
        self.mutate(|items| {
            items.push(item.clone());
            (items.len(), vec![item])
        })
    }

    /// Prepend an item. Returns the new length.
    pub fn unshift(&self, item: impl Into<Value>) -> usize {
        let item = item.into();
        self.mutate(|items| {
            items.insert(0, item.clone());
            (items.len(), vec![item])
        })
    }

    /// Remove the last element. Notifies even when the sequence was empty.
    pub fn pop(&self) -> Value {
        self.mutate(|items| (items.pop().unwrap_or_default(), Vec::new()))
    }

    /// Remove the first element. Notifies even when the sequence was empty.
    pub fn shift(&self) -> Value {
        self.mutate(|items| {
            let first = if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            };
            (first, Vec::new())
        })
    }

    /// Remove `delete_count` elements starting at `start` and insert `items`
    /// in their place. Out-of-range arguments are clamped.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        self.mutate(|current| {
            let start = start.min(current.len());
            let end = start + delete_count.min(current.len() - start);
            let removed = current
                .splice(start..end, items.iter().cloned())
                .collect::<Vec<_>>();
            (removed, items)
        })
    }

    /// Sort by display string, `Undefined` last. The sort is stable.
    ///
    /// Keys are computed before the sequence is borrowed for sorting, so an
    /// element that contains the sequence itself is safe to sort.
    pub fn sort(&self) {
        let keys: Vec<String> = self
            .to_vec_untracked()
            .iter()
            .map(|item| item.display_within(self.addr()))
            .collect();
        self.mutate(|items| {
            let mut keyed: Vec<(String, Value)> = keys.into_iter().zip(items.drain(..)).collect();
            keyed.sort_by(|(ka, a), (kb, b)| match (a.is_undefined(), b.is_undefined()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => ka.cmp(kb),
            });
            items.extend(keyed.into_iter().map(|(_, item)| item));
            ((), Vec::new())
        })
    }

    /// Sort with a comparator. `Undefined` elements always sort last and are
    /// never passed to the comparator.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        self.mutate(|items| {
            items.sort_by(|a, b| match (a.is_undefined(), b.is_undefined()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare(a, b),
            });
            ((), Vec::new())
        })
    }

    pub fn reverse(&self) {
        self.mutate(|items| {
            items.reverse();
            ((), Vec::new())
        })
    }

    /// Run a mutation, observe whatever it inserted, then notify.
    ///
    /// The item borrow is released before observing and notifying, so
    /// subscribers that run synchronously may read the sequence.
    fn mutate<R>(&self, op: impl FnOnce(&mut Vec<Value>) -> (R, Vec<Value>)) -> R {
        let (result, inserted) = {
            let mut items = self.cell.items.borrow_mut();
            op(&mut items)
        };

        if let Some(observer) = self.observer() {
            if let Some(graph) = observer.graph() {
                for item in &inserted {
                    observe(&graph, item);
                }
            }
            observer.tracker().notify();
        }
        result
    }

    // ------------------------------------------------------------------------
    // Non-notifying writes
    // ------------------------------------------------------------------------

    /// Write `index` directly, padding with `Undefined` past the end.
    ///
    /// Does not observe the value and does not notify.
    pub fn set_untracked(&self, index: usize, value: impl Into<Value>) {
        let mut items = self.cell.items.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value.into();
    }

    /// Shorten the sequence without notifying.
    pub fn truncate_untracked(&self, len: usize) {
        self.cell.items.borrow_mut().truncate(len);
    }

    // ------------------------------------------------------------------------
    // Crate-internal plumbing used by the observer
    // ------------------------------------------------------------------------

    pub(crate) fn attach_observer(&self, observer: Rc<Observer>) {
        *self.cell.observer.borrow_mut() = Some(observer);
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_items(iter.into_iter().collect(), false)
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self::from_items(items, false)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Array(self.clone()), f)
    }
}
