//! Collection builtins shared by the dispatch loop.
//!
//! Arrays and tables are mutated through their shared handle, so every
//! change is visible through all aliases.

use std::collections::HashMap;

use crate::lang::value::Value;
use crate::runtime::arith::OpResult;
use crate::runtime::runtime_error::{expected_type, fault, index_out_of_bounds, missing_key};

/// Resolves a possibly negative index against `len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

fn integer_index(operation: &str, key: &Value) -> Result<i64, Value> {
    match key {
        Value::Integer(n) => Ok(*n),
        other => Err(expected_type(operation, "`Integer`", other)),
    }
}

fn string_key<'a>(operation: &str, key: &'a Value) -> Result<&'a str, Value> {
    match key {
        Value::String(s) => Ok(&**s),
        other => Err(expected_type(operation, "`String`", other)),
    }
}

/// `x[key]`
pub fn get_dynamic(object: &Value, key: &Value) -> OpResult {
    match object {
        Value::Array(items) => {
            let items = items.borrow();
            let index = integer_index("Get", key)?;
            resolve_index(index, items.len())
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| index_out_of_bounds(index, items.len()))
        }
        Value::String(s) => {
            let index = integer_index("Get", key)?;
            let chars: Vec<char> = s.chars().collect();
            resolve_index(index, chars.len())
                .map(|i| Value::from(chars[i].to_string()))
                .ok_or_else(|| index_out_of_bounds(index, chars.len()))
        }
        Value::Table(_) => get_property(object, string_key("Get", key)?),
        other => Err(expected_type("Get", "`Array` or `Table`", other)),
    }
}

/// `x[key] = value`. Writing one past the end of an array appends.
pub fn set_dynamic(object: &Value, key: &Value, value: Value) -> OpResult {
    match object {
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            let index = integer_index("Set", key)?;
            let len = items.len();
            if index == len as i64 {
                items.push(value.clone());
                return Ok(value);
            }
            let Some(position) = resolve_index(index, len) else {
                return Err(index_out_of_bounds(index, len));
            };
            items[position] = value.clone();
            Ok(value)
        }
        Value::Table(_) => set_property(object, string_key("Set", key)?, value),
        other => Err(expected_type("Set", "`Array` or `Table`", other)),
    }
}

/// `t.key`
pub fn get_property(object: &Value, key: &str) -> OpResult {
    match object {
        Value::Table(entries) => entries.borrow().get(key).cloned().ok_or_else(|| missing_key(key)),
        other => Err(expected_type("Get Property", "`Table`", other)),
    }
}

/// `t.key = value`
pub fn set_property(object: &Value, key: &str, value: Value) -> OpResult {
    match object {
        Value::Table(entries) => {
            entries.borrow_mut().insert(key.to_string(), value.clone());
            Ok(value)
        }
        other => Err(expected_type("Set Property", "`Table`", other)),
    }
}

pub fn push(array: &Value, value: Value) -> OpResult {
    match array {
        Value::Array(items) => {
            items.borrow_mut().push(value.clone());
            Ok(value)
        }
        other => Err(expected_type("Push", "`Array`", other)),
    }
}

/// Removes the last element, or yields `none` for an empty array.
pub fn pop(array: &Value) -> OpResult {
    match array {
        Value::Array(items) => Ok(items.borrow_mut().pop().unwrap_or(Value::None)),
        other => Err(expected_type("Pop", "`Array`", other)),
    }
}

pub fn insert(array: &Value, index: &Value, value: Value) -> OpResult {
    let Value::Array(items) = array else {
        return Err(expected_type("Insert", "`Array`", array));
    };
    let mut items = items.borrow_mut();
    let index = integer_index("Insert", index)?;
    let len = items.len();
    let position = if index == len as i64 {
        Some(len)
    } else {
        resolve_index(index, len)
    };
    match position {
        Some(position) => {
            items.insert(position, value.clone());
            Ok(value)
        }
        None => Err(index_out_of_bounds(index, len)),
    }
}

/// Removes and returns an array element or table entry.
pub fn delete(object: &Value, key: &Value) -> OpResult {
    match object {
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            let index = integer_index("Delete", key)?;
            let len = items.len();
            let position = resolve_index(index, len).ok_or_else(|| index_out_of_bounds(index, len))?;
            Ok(items.remove(position))
        }
        Value::Table(entries) => {
            let key = string_key("Delete", key)?;
            Ok(entries.borrow_mut().remove(key).unwrap_or(Value::None))
        }
        other => Err(expected_type("Delete", "`Array` or `Table`", other)),
    }
}

pub fn len(value: &Value) -> OpResult {
    let n = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        Value::Table(entries) => entries.borrow().len(),
        other => return Err(expected_type("Len", "`String`, `Array` or `Table`", other)),
    };
    Ok(Value::Integer(n as i64))
}

/// Sorted table keys.
pub fn keys(table: &Value) -> OpResult {
    match table {
        Value::Table(entries) => Ok(Value::new_array(sorted_keys(&entries.borrow()))),
        other => Err(expected_type("Keys", "`Table`", other)),
    }
}

pub fn sorted_keys(entries: &HashMap<String, Value>) -> Vec<Value> {
    let mut keys: Vec<&String> = entries.keys().collect();
    keys.sort();
    keys.into_iter().map(|k| Value::from(k.as_str())).collect()
}

pub fn exists(table: &Value, key: &Value) -> OpResult {
    match table {
        Value::Table(entries) => {
            let key = string_key("Exists", key)?;
            Ok(Value::Bool(entries.borrow().contains_key(key)))
        }
        other => Err(expected_type("Exists", "`Table`", other)),
    }
}

/// Position of a substring, array element or table value.
///
/// Yields `-1` for strings and arrays, and `none` for tables, when absent.
pub fn index(object: &Value, needle: &Value) -> OpResult {
    match object {
        Value::String(haystack) => {
            let needle = string_key("Index", needle)?;
            let found = haystack
                .find(needle)
                .map(|byte| haystack[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Integer(found))
        }
        Value::Array(items) => {
            let found = items
                .borrow()
                .iter()
                .position(|item| item == needle)
                .map(|i| i as i64)
                .unwrap_or(-1);
            Ok(Value::Integer(found))
        }
        Value::Table(entries) => {
            let entries = entries.borrow();
            let mut matching: Vec<&String> = entries
                .iter()
                .filter(|(_, value)| *value == needle)
                .map(|(key, _)| key)
                .collect();
            matching.sort();
            Ok(matching
                .first()
                .map(|key| Value::from(key.as_str()))
                .unwrap_or(Value::None))
        }
        other => Err(expected_type("Index", "`String`, `Array` or `Table`", other)),
    }
}

/// `x[start:end]`; `end` of `none` means the length.
pub fn slice(object: &Value, start: &Value, end: &Value) -> OpResult {
    let len = match object {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        other => return Err(expected_type("Slice", "`String` or `Array`", other)),
    };
    let clamp = |bound: i64| -> usize {
        let bound = if bound < 0 { bound + len as i64 } else { bound };
        bound.clamp(0, len as i64) as usize
    };
    let start = clamp(integer_index("Slice", start)?);
    let end = match end {
        Value::None => len,
        other => clamp(integer_index("Slice", other)?),
    };
    let end = end.max(start);

    match object {
        Value::String(s) => Ok(Value::from(s.chars().skip(start).take(end - start).collect::<String>())),
        Value::Array(items) => Ok(Value::new_array(
            items.borrow().get(start..end).map(<[Value]>::to_vec).unwrap_or_default(),
        )),
        other => Err(expected_type("Slice", "`String` or `Array`", other)),
    }
}

/// Empties a collection in place; scalars yield their zero value.
pub fn clear(value: &Value) -> OpResult {
    let cleared = match value {
        Value::Array(items) => {
            items.borrow_mut().clear();
            value.clone()
        }
        Value::Table(entries) => {
            entries.borrow_mut().clear();
            value.clone()
        }
        Value::Bool(_) => Value::Bool(false),
        Value::Integer(_) => Value::Integer(0),
        Value::Float(_) => Value::Float(0.0),
        Value::String(_) => Value::string(""),
        _ => Value::None,
    };
    Ok(cleared)
}

/// Shallow copy of arrays and tables.
pub fn copy(value: &Value) -> OpResult {
    Ok(match value {
        Value::Array(items) => Value::new_array(items.borrow().clone()),
        Value::Table(entries) => Value::new_table(entries.borrow().clone()),
        other => other.clone(),
    })
}

/// Truncates toward zero; `none` for NaN and values outside the `i64` range.
fn float_to_integer(n: f64) -> Value {
    // 2^63 is exact as an f64, so the upper bound is exclusive
    if n.is_finite() && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Value::Integer(n as i64)
    } else {
        Value::None
    }
}

pub fn to_integer(value: &Value) -> OpResult {
    Ok(match value {
        Value::Integer(_) => value.clone(),
        Value::Float(n) => float_to_integer(*n),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => Value::Integer(n),
            Err(_) => s.trim().parse::<f64>().map(float_to_integer).unwrap_or(Value::None),
        },
        other => return Err(fault(format!("Can't cast `{}` to an integer.", other.type_name()))),
    })
}

pub fn to_float(value: &Value) -> OpResult {
    Ok(match value {
        Value::Integer(n) => Value::Float(*n as f64),
        Value::Float(_) => value.clone(),
        Value::String(s) => s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::None),
        other => return Err(fault(format!("Can't cast `{}` to a float.", other.type_name()))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(items: &[i64]) -> Value {
        Value::new_array(items.iter().map(|n| Value::Integer(*n)).collect())
    }

    fn table(entries: &[(&str, i64)]) -> Value {
        Value::new_table(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), Value::Integer(*v)))
                .collect(),
        )
    }

    fn fault_text(result: OpResult) -> String {
        match result {
            Ok(v) => panic!("expected fault, got {:?}", v),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn test_negative_indices_count_from_end() {
        let a = array(&[1, 2, 3]);
        assert_eq!(get_dynamic(&a, &Value::Integer(-1)).unwrap(), Value::Integer(3));
        assert_eq!(
            fault_text(get_dynamic(&a, &Value::Integer(3))),
            "Index out of bounds: 3 for length 3."
        );
    }

    #[test]
    fn test_set_at_length_appends() {
        let a = array(&[1]);
        set_dynamic(&a, &Value::Integer(1), Value::Integer(2)).unwrap();
        assert_eq!(a.to_string(), "[1, 2]");
        assert!(set_dynamic(&a, &Value::Integer(5), Value::Integer(0)).is_err());
    }

    #[test]
    fn test_string_index_yields_character() {
        let s = Value::string("héllo");
        assert_eq!(get_dynamic(&s, &Value::Integer(1)).unwrap(), Value::string("é"));
        assert_eq!(len(&s).unwrap(), Value::Integer(5));
    }

    #[test]
    fn test_missing_table_key_is_a_fault() {
        let t = table(&[("a", 1)]);
        assert_eq!(get_property(&t, "a").unwrap(), Value::Integer(1));
        assert_eq!(fault_text(get_property(&t, "b")), "Key not found: `b`.");
        assert_eq!(exists(&t, &Value::string("b")).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_mutation_is_shared_between_aliases() {
        let a = array(&[1, 2]);
        let alias = a.clone();
        push(&alias, Value::Integer(3)).unwrap();
        insert(&alias, &Value::Integer(0), Value::Integer(0)).unwrap();
        assert_eq!(a.to_string(), "[0, 1, 2, 3]");
        assert_eq!(delete(&alias, &Value::Integer(1)).unwrap(), Value::Integer(1));
        assert_eq!(pop(&alias).unwrap(), Value::Integer(3));
        assert_eq!(a.to_string(), "[0, 2]");
    }

    #[test]
    fn test_copy_is_independent() {
        let a = array(&[1, 2]);
        let b = copy(&a).unwrap();
        push(&a, Value::Integer(3)).unwrap();
        assert_eq!(b.to_string(), "[1, 2]");
        assert_ne!(a, b);
    }

    #[test]
    fn test_clear_in_place() {
        let t = table(&[("a", 1)]);
        clear(&t).unwrap();
        assert_eq!(t.to_string(), "{}");
        assert_eq!(clear(&Value::Integer(7)).unwrap(), Value::Integer(0));
    }

    #[test]
    fn test_keys_are_sorted() {
        let t = table(&[("b", 1), ("a", 2), ("c", 3)]);
        assert_eq!(keys(&t).unwrap().to_string(), "[\"a\", \"b\", \"c\"]");
    }

    #[test]
    fn test_index() {
        assert_eq!(index(&Value::string("hello"), &Value::string("ll")).unwrap(), Value::Integer(2));
        assert_eq!(index(&array(&[4, 5]), &Value::Integer(6)).unwrap(), Value::Integer(-1));
        assert_eq!(index(&table(&[("k", 9)]), &Value::Integer(9)).unwrap(), Value::string("k"));
        assert_eq!(index(&table(&[]), &Value::Integer(9)).unwrap(), Value::None);
    }

    #[test]
    fn test_slice_bounds() {
        let a = array(&[1, 2, 3, 4]);
        assert_eq!(slice(&a, &Value::Integer(1), &Value::Integer(3)).unwrap().to_string(), "[2, 3]");
        assert_eq!(slice(&a, &Value::Integer(-2), &Value::None).unwrap().to_string(), "[3, 4]");
        assert_eq!(slice(&a, &Value::Integer(3), &Value::Integer(1)).unwrap().to_string(), "[]");
        let s = Value::string("hymn");
        assert_eq!(slice(&s, &Value::Integer(0), &Value::Integer(2)).unwrap(), Value::string("hy"));
    }

    #[test]
    fn test_casts() {
        assert_eq!(to_integer(&Value::string("42")).unwrap(), Value::Integer(42));
        assert_eq!(to_integer(&Value::Float(2.9)).unwrap(), Value::Integer(2));
        assert_eq!(to_integer(&Value::string("abc")).unwrap(), Value::None);
        assert_eq!(to_integer(&Value::Float(1e300)).unwrap(), Value::None);
        assert_eq!(to_integer(&Value::string("1e300")).unwrap(), Value::None);
        assert_eq!(to_integer(&Value::Float(f64::NAN)).unwrap(), Value::None);
        assert_eq!(to_integer(&Value::Float(-2.5)).unwrap(), Value::Integer(-2));
        assert_eq!(to_integer(&Value::string("9223372036854775807")).unwrap(), Value::Integer(i64::MAX));
        assert_eq!(to_float(&Value::string("1.5")).unwrap(), Value::Float(1.5));
        assert_eq!(fault_text(to_float(&Value::Bool(true))), "Can't cast `Bool` to a float.");
    }
}
