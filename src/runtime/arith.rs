//! Operator semantics for arithmetic, bitwise and comparison instructions.
//!
//! Every function takes operands in source order (`a op b`) and returns the
//! value to push, or the fault to throw.

use std::cmp::Ordering;

use crate::bytecode::Op;
use crate::lang::value::Value;
use crate::runtime::runtime_error::{division_by_zero, expected_type, fault, type_error};

pub type OpResult = Result<Value, Value>;

pub fn add(a: &Value, b: &Value) -> OpResult {
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::from(format!("{}{}", a, b))),
        (Value::Integer(x), Value::Integer(y)) => Ok(Value::Integer(x.wrapping_add(*y))),
        _ => float_op("Add", a, b, |x, y| x + y),
    }
}

pub fn subtract(a: &Value, b: &Value) -> OpResult {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Value::Integer(x.wrapping_sub(*y))),
        _ => float_op("Subtract", a, b, |x, y| x - y),
    }
}

pub fn multiply(a: &Value, b: &Value) -> OpResult {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Value::Integer(x.wrapping_mul(*y))),
        _ => float_op("Multiply", a, b, |x, y| x * y),
    }
}

/// Always yields a float.
pub fn divide(a: &Value, b: &Value) -> OpResult {
    match (a.as_f64(), b.as_f64()) {
        (Some(_), Some(y)) if y == 0.0 => Err(division_by_zero("Divide")),
        (Some(x), Some(y)) => Ok(Value::Float(x / y)),
        _ => Err(type_error("Divide", a, b)),
    }
}

pub fn modulo(a: &Value, b: &Value) -> OpResult {
    match (a, b) {
        (Value::Integer(_), Value::Integer(0)) => Err(division_by_zero("Modulo")),
        (Value::Integer(x), Value::Integer(y)) => Ok(Value::Integer(x.wrapping_rem(*y))),
        _ => Err(type_error("Modulo", a, b)),
    }
}

fn float_op(name: &str, a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> OpResult {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(Value::Float(f(x, y))),
        _ => Err(type_error(name, a, b)),
    }
}

/// Integer-only binary operators.
pub fn bitwise(op: Op, a: &Value, b: &Value) -> OpResult {
    let (Value::Integer(x), Value::Integer(y)) = (a, b) else {
        return Err(type_error(op_label(op), a, b));
    };
    let result = match op {
        Op::BitAnd => x & y,
        Op::BitOr => x | y,
        Op::BitXor => x ^ y,
        Op::BitLeftShift => x.wrapping_shl(*y as u32),
        Op::BitRightShift => x.wrapping_shr(*y as u32),
        _ => return Err(type_error(op_label(op), a, b)),
    };
    Ok(Value::Integer(result))
}

pub fn negate(a: &Value) -> OpResult {
    match a {
        Value::Integer(n) => Ok(Value::Integer(n.wrapping_neg())),
        Value::Float(n) => Ok(Value::Float(-n)),
        _ => Err(fault(format!(
            "Negate: Expected `Integer` or `Float`, but was `{}`.",
            a.type_name()
        ))),
    }
}

pub fn bit_not(a: &Value) -> OpResult {
    match a {
        Value::Integer(n) => Ok(Value::Integer(!n)),
        _ => Err(expected_type("Bit Not", "`Integer`", a)),
    }
}

/// `< <= > >=` over numbers or two strings.
pub fn compare(op: Op, a: &Value, b: &Value) -> OpResult {
    let ordering = match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => return Err(type_error(op_label(op), a, b)),
        },
    };
    let result = match (op, ordering) {
        (_, None) => false,
        (Op::Less, Some(o)) => o == Ordering::Less,
        (Op::LessEqual, Some(o)) => o != Ordering::Greater,
        (Op::Greater, Some(o)) => o == Ordering::Greater,
        (Op::GreaterEqual, Some(o)) => o != Ordering::Less,
        _ => return Err(type_error(op_label(op), a, b)),
    };
    Ok(Value::Bool(result))
}

fn op_label(op: Op) -> &'static str {
    match op {
        Op::BitAnd => "Bit And",
        Op::BitOr => "Bit Or",
        Op::BitXor => "Bit Xor",
        Op::BitLeftShift => "Bit Left Shift",
        Op::BitRightShift => "Bit Right Shift",
        Op::Less => "Less",
        Op::LessEqual => "Less Equal",
        Op::Greater => "Greater",
        Op::GreaterEqual => "Greater Equal",
        _ => op.name(),
    }
}
