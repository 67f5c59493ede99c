//! Dynamic Values
//!
//! State observed by the reactive core is a dynamic tree: primitives at the
//! leaves, keyed structures ([`Object`]) and ordered sequences ([`Array`]) as
//! branches. The core has no structural type information about what it
//! observes, so everything flows through [`Value`].
//!
//! # Equality
//!
//! Primitives compare by value, structures by identity (two handles to the
//! same `Rc`). Two flavours are provided:
//!
//! - [`Value::strict_equals`]: `NaN` is not equal to itself. Used to decide
//!   whether a re-run produced a new value.
//! - [`Value::same_value`]: `NaN` equals `NaN`. Used by property writes, so
//!   writing `NaN` over `NaN` does not notify anyone.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::array::Array;
use super::object::Object;

/// A value in an observed state tree.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value; what reading a missing key yields.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
}

impl Value {
    /// Whether this value is a keyed structure or ordered sequence.
    pub fn is_structure(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Strict equality: primitives by value (`NaN != NaN`), structures by
    /// identity.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Strict equality that also treats `NaN` as equal to itself.
    pub fn same_value(&self, other: &Value) -> bool {
        self.strict_equals(other) || (self.is_nan() && other.is_nan())
    }

    /// String form used by the default sequence sort.
    ///
    /// Does not record any dependency. A sequence nested inside itself
    /// renders as an empty string.
    pub fn to_display_string(&self) -> String {
        self.display(&mut HashSet::new())
    }

    /// Display string of an element of the sequence at `container`.
    pub(crate) fn display_within(&self, container: usize) -> String {
        self.display(&mut HashSet::from([container]))
    }

    fn display(&self, seen: &mut HashSet<usize>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Array(array) => {
                if !seen.insert(array.addr()) {
                    return String::new();
                }
                let joined = array
                    .to_vec_untracked()
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.display(seen),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                seen.remove(&array.addr());
                joined
            }
        }
    }

    /// Snapshot this value as JSON without recording dependencies.
    ///
    /// `Undefined` and non-finite numbers become `null`. Cyclic structures are
    /// not supported.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Object(object) => serde_json::Value::Object(
                object
                    .entries_untracked()
                    .into_iter()
                    .map(|(key, value)| (key, value.to_json()))
                    .collect(),
            ),
            Value::Array(array) => serde_json::Value::Array(
                array
                    .to_vec_untracked()
                    .iter()
                    .map(Value::to_json)
                    .collect(),
            ),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = RefCell::new(HashSet::new());
        fmt::Debug::fmt(&CycleSafe { value: self, active: &active }, f)
    }
}

/// Debug view that prints `[Circular]` for a structure already being
/// formatted further up.
struct CycleSafe<'a> {
    value: &'a Value,
    active: &'a RefCell<HashSet<usize>>,
}

impl CycleSafe<'_> {
    fn nested<'b>(&'b self, value: &'b Value) -> CycleSafe<'b> {
        CycleSafe {
            value,
            active: self.active,
        }
    }
}

impl fmt::Debug for CycleSafe<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = match self.value {
            Value::Undefined => return f.write_str("undefined"),
            Value::Null => return f.write_str("null"),
            Value::Bool(b) => return write!(f, "{b}"),
            Value::Number(n) => return f.write_str(&format_number(*n)),
            Value::String(s) => return write!(f, "{s:?}"),
            Value::Object(object) => object.addr(),
            Value::Array(array) => array.addr(),
        };
        if !self.active.borrow_mut().insert(addr) {
            return f.write_str("[Circular]");
        }
        let result = match self.value {
            Value::Object(object) => {
                let entries = object.entries_untracked();
                f.debug_map()
                    .entries(entries.iter().map(|(key, value)| (key, self.nested(value))))
                    .finish()
            }
            Value::Array(array) => {
                let items = array.to_vec_untracked();
                f.debug_list()
                    .entries(items.iter().map(|item| self.nested(item)))
                    .finish()
            }
            _ => Ok(()),
        };
        self.active.borrow_mut().remove(&addr);
        result
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Object(object) => {
                let entries = object.entries_untracked();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Array(array) => {
                let items = array.to_vec_untracked();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Value::Array(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
