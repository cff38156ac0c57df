use crate::bytecode::ir::Function;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Shared, mutable array storage. Cloning the handle aliases the array.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Shared, mutable table storage. Cloning the handle aliases the table.
pub type TableRef = Rc<RefCell<HashMap<String, Value>>>;

/// A host function, resolved through the VM's native table by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFunction {
    pub name: String,
    pub id: usize,
}

/// Runtime value in the Hymn language.
///
/// Arrays and tables are reference counted and shared: assigning one to a
/// second variable aliases the same storage. Reference cycles are never
/// collected.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Table(TableRef),
    Function(Rc<Function>),
    NativeFunction(Rc<NativeFunction>),

    /// Opaque host object, compared by identity.
    Pointer(Rc<dyn Any>),
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn new_array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn new_table(entries: HashMap<String, Value>) -> Value {
        Value::Table(Rc::new(RefCell::new(entries)))
    }

    /// Name reported by `type(x)` and in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "Bool",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Table(_) => "Table",
            Value::Function(_) => "Function",
            Value::NativeFunction(_) => "Native",
            Value::Pointer(_) => "Pointer",
        }
    }

    pub fn is_falsy(&self) -> bool {
        match self {
            Value::None => true,
            Value::Bool(b) => !b,
            Value::Integer(n) => *n == 0,
            Value::Float(n) => *n == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.borrow().is_empty(),
            Value::Table(entries) => entries.borrow().is_empty(),
            Value::Function(_) | Value::NativeFunction(_) | Value::Pointer(_) => false,
        }
    }

    /// Numeric view used by comparisons and float promotion.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, nested: bool, seen: &mut Vec<*const ()>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::String(s) if nested => write!(f, "\"{}\"", s),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.contains(&ptr) {
                    return write!(f, "[..]");
                }
                seen.push(ptr);
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.write(f, true, seen)?;
                }
                seen.pop();
                write!(f, "]")
            }
            Value::Table(entries) => {
                let ptr = Rc::as_ptr(entries) as *const ();
                if seen.contains(&ptr) {
                    return write!(f, "{{ .. }}");
                }
                let entries = entries.borrow();
                if entries.is_empty() {
                    return write!(f, "{{}}");
                }
                seen.push(ptr);
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                write!(f, "{{ ")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    if let Some(value) = entries.get(key) {
                        value.write(f, true, seen)?;
                    }
                }
                seen.pop();
                write!(f, " }}")
            }
            Value::Function(function) => write!(f, "{}", function.display_name()),
            Value::NativeFunction(native) => write!(f, "{}", native.name),
            Value::Pointer(_) => write!(f, "<pointer>"),
        }
    }
}

/// Floats always show a fractional part so they read back as floats.
pub fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    /// Renders a value the way `echo` and `to_string` show it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, false, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Function(_) | Value::NativeFunction(_) | Value::Pointer(_) => {
                write!(f, "<{} {}>", self.type_name(), self)
            }
            _ => self.write(f, true, &mut Vec::new()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Integer(b)) => *a == (*b as f64),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => a.id == b.id,
            (Value::Pointer(a), Value::Pointer(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, Value)]) -> Value {
        Value::new_table(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_render_scalars() {
        assert_eq!(Value::None.to_string(), "none");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Integer(-7).to_string(), "-7");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(3.25).to_string(), "3.25");
        assert_eq!(Value::string("hi").to_string(), "hi");
    }

    #[test]
    fn test_render_collections() {
        let array = Value::new_array(vec![Value::Integer(1), Value::string("a"), Value::None]);
        assert_eq!(array.to_string(), "[1, \"a\", none]");

        let t = table(&[("b", Value::Integer(2)), ("a", Value::new_array(vec![]))]);
        assert_eq!(t.to_string(), "{ a: [], b: 2 }");
        assert_eq!(table(&[]).to_string(), "{}");
    }

    #[test]
    fn test_render_cycle() {
        let array = Value::new_array(vec![Value::Integer(1)]);
        if let Value::Array(items) = &array {
            items.borrow_mut().push(array.clone());
        }
        assert_eq!(array.to_string(), "[1, [..]]");
        // break the cycle so the test does not leak
        if let Value::Array(items) = &array {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_falsy_values() {
        for value in [
            Value::None,
            Value::Bool(false),
            Value::Integer(0),
            Value::Float(0.0),
            Value::string(""),
            Value::new_array(vec![]),
            table(&[]),
        ] {
            assert!(value.is_falsy(), "{:?} should be falsy", value);
        }
        assert!(!Value::Integer(3).is_falsy());
        assert!(!Value::string("x").is_falsy());
        assert!(!Value::new_array(vec![Value::None]).is_falsy());
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::Integer(2), Value::Float(2.0));
        assert_eq!(Value::string("a"), Value::string("a"));
        assert_ne!(Value::Integer(1), Value::string("1"));
        assert_ne!(Value::None, Value::Bool(false));

        let a = Value::new_array(vec![]);
        let b = Value::new_array(vec![]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Integer(1).type_name(), "Integer");
        assert_eq!(table(&[]).type_name(), "Table");
        assert_eq!(Value::Pointer(Rc::new(5u8)).type_name(), "Pointer");
    }
}
