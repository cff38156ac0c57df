use crate::lang::value::Value;

/// An exception that unwound past every frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}{}", render_call_stack(.call_stack))]
pub struct RuntimeError {
    /// Rendering of the thrown value.
    pub message: String,
    /// Source line of the faulting instruction, 0 when unknown.
    pub line: usize,
    /// `at <function> <script>:<line>`, innermost first.
    pub call_stack: Vec<String>,
}

fn render_call_stack(call_stack: &[String]) -> String {
    call_stack.iter().map(|frame| format!("\n  {}", frame)).collect()
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            line: 0,
            call_stack: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.call_stack.push(context.into());
        self
    }
}

// Faults raised by the VM. Each becomes a thrown string so scripts can
// catch it with `try`/`except`.

pub fn fault(message: impl Into<String>) -> Value {
    Value::from(message.into())
}

pub fn type_error(operation: &str, a: &Value, b: &Value) -> Value {
    fault(format!(
        "{}: Operation not supported for `{}` and `{}`.",
        operation,
        a.type_name(),
        b.type_name()
    ))
}

pub fn expected_type(operation: &str, expected: &str, found: &Value) -> Value {
    fault(format!(
        "{}: Expected {}, but was `{}`.",
        operation,
        expected,
        found.type_name()
    ))
}

pub fn division_by_zero(operation: &str) -> Value {
    fault(format!("{}: Division by zero.", operation))
}

pub fn index_out_of_bounds(index: i64, len: usize) -> Value {
    fault(format!("Index out of bounds: {} for length {}.", index, len))
}

pub fn missing_key(key: &str) -> Value {
    fault(format!("Key not found: `{}`.", key))
}

pub fn undefined_variable(name: &str) -> Value {
    fault(format!("Undefined variable `{}`.", name))
}

pub fn stack_underflow() -> Value {
    fault("Stack underflow.")
}
