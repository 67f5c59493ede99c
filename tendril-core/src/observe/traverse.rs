//! Deep Traversal
//!
//! Deep computations read every nested property of their result so that a
//! change anywhere inside it re-runs them. Traversal goes through the
//! tracked accessors, which is what records the dependencies.

use std::collections::HashSet;

use super::value::Value;

/// Read every nested value reachable from `value` through tracked accessors.
///
/// Each structure is visited once, so cyclic trees terminate. Non-extensible
/// structures are not entered.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    visit(value, &mut seen);
}

fn visit(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(object) => {
            if !object.is_extensible() || !seen.insert(object.addr()) {
                return;
            }
            for key in object.keys() {
                visit(&object.get(&key), seen);
            }
        }
        Value::Array(array) => {
            if !array.is_extensible() || !seen.insert(array.addr()) {
                return;
            }
            for item in array.to_vec() {
                visit(&item, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Object;

    #[test]
    fn traversal_terminates_on_cycles() {
        let object = Object::new();
        object.set("me", Value::Object(object.clone()));
        object.set("n", 1);
        traverse(&Value::Object(object));
    }

    #[test]
    fn traversal_outside_a_computation_is_a_no_op() {
        let value = Value::from(serde_json::json!({ "a": [1, { "b": 2 }] }));
        traverse(&value);
        traverse(&Value::from(3));
    }
}
