use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, trace};

use crate::bytecode::{Function, Op, compile::compile, disasm::disassemble};
use crate::error::HymnError;
use crate::lang::value::{NativeFunction, Value};
use crate::runtime::arith;
use crate::runtime::collections;
use crate::runtime::import::{self, IMPORTS, PATHS};
use crate::runtime::runtime_error::{RuntimeError, expected_type, fault, stack_underflow, undefined_variable};

/// Host function callable from scripts. Returning `Err` throws the value.
pub type NativeCall = fn(&[Value]) -> Result<Value, Value>;

type Sink = Box<dyn FnMut(&str)>;

/// Result of one instruction; `Err` carries a thrown value.
type Step<T = Flow> = Result<T, Value>;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_frames: usize,
    pub max_stack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_frames: 256,
            max_stack: 65_536,
        }
    }
}

struct Frame {
    function: Rc<Function>,
    ip: usize,
    /// Stack index of slot 0, which holds the callee.
    base: usize,
}

enum Flow {
    Next,
    Halt,
}

/// A Hymn virtual machine.
///
/// Globals and imported scripts persist across `interpret` calls; the
/// operand and frame stacks are emptied after every run.
pub struct Hymn {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: HashMap<String, Value>,
    natives: Vec<NativeCall>,
    config: VmConfig,
    error: Option<String>,
    print: Sink,
    print_error: Sink,
}

impl Default for Hymn {
    fn default() -> Self {
        Self::new()
    }
}

impl Hymn {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut globals = HashMap::new();
        globals.insert(PATHS.to_string(), import::default_paths());
        globals.insert(IMPORTS.to_string(), Value::new_array(Vec::new()));
        Hymn {
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
            natives: Vec::new(),
            config,
            error: None,
            print: Box::new(|text: &str| print!("{}", text)),
            print_error: Box::new(|text: &str| eprint!("{}", text)),
        }
    }

    pub fn set_print(&mut self, sink: impl FnMut(&str) + 'static) {
        self.print = Box::new(sink);
    }

    pub fn set_print_error(&mut self, sink: impl FnMut(&str) + 'static) {
        self.print_error = Box::new(sink);
    }

    /// Defines a global `name` bound to a host function.
    pub fn add_native(&mut self, name: &str, call: NativeCall) {
        let id = self.natives.len();
        self.natives.push(call);
        let native = NativeFunction {
            name: name.to_string(),
            id,
        };
        self.globals
            .insert(name.to_string(), Value::NativeFunction(Rc::new(native)));
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Message of the most recent failed run.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Writes an error to the error sink.
    pub fn report(&mut self, error: &HymnError) {
        (self.print_error)(&format!("{}\n", error));
    }

    pub fn interpret(&mut self, source: &str) -> Result<(), HymnError> {
        self.run_source(None, source, false)
    }

    pub fn interpret_script(&mut self, script: &str, source: &str) -> Result<(), HymnError> {
        self.run_source(Some(script), source, false)
    }

    /// Like `interpret`, printing the disassembly before running.
    pub fn debug_interpret(&mut self, source: &str) -> Result<(), HymnError> {
        self.run_source(None, source, true)
    }

    pub fn debug_interpret_script(&mut self, script: &str, source: &str) -> Result<(), HymnError> {
        self.run_source(Some(script), source, true)
    }

    /// Reads and runs a script file.
    pub fn interpret_file(&mut self, path: &Path, debug: bool) -> Result<(), HymnError> {
        let source = fs::read_to_string(path).map_err(|e| HymnError::io(path, e))?;
        let script = path.to_string_lossy().into_owned();
        self.run_source(Some(script.as_str()), &source, debug)
    }

    fn run_source(&mut self, script: Option<&str>, source: &str, debug: bool) -> Result<(), HymnError> {
        debug!("interpret {}", script.unwrap_or("<script>"));
        self.error = None;

        let result = compile(script, source)
            .map_err(HymnError::from)
            .and_then(|function| {
                if debug {
                    let listing = disassemble(&function);
                    (self.print)(&listing);
                }
                self.execute(function).map_err(HymnError::from)
            });

        if let Err(e) = &result {
            self.error = Some(e.to_string());
        }
        result
    }

    fn execute(&mut self, function: Function) -> Result<(), RuntimeError> {
        let function = Rc::new(function);
        self.stack.push(Value::Function(function.clone()));
        self.frames.push(Frame {
            function,
            ip: 0,
            base: self.stack.len() - 1,
        });
        self.run()
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(());
            };
            let ip = frame.ip;
            let op = frame.function.code.instructions.get(ip).copied();
            frame.ip += 1;

            let result = match op {
                Some(op) => {
                    trace!("{:04} {:<24} stack {}", ip, op.name(), self.stack.len());
                    self.step(op)
                }
                None => Err(fault("Instruction pointer out of bounds.")),
            };

            match result {
                Ok(Flow::Next) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(thrown) => self.unwind(thrown)?,
            }
        }
    }

    fn step(&mut self, op: Op) -> Step {
        match op {
            Op::Constant(k) => {
                let value = self.constant(k)?;
                self.push(value);
            }
            Op::None => self.push(Value::None),
            Op::True => self.push(Value::Bool(true)),
            Op::False => self.push(Value::Bool(false)),
            Op::Int(n) => self.push(Value::Integer(n)),
            Op::Float(n) => self.push(Value::Float(n)),

            Op::Pop => {
                self.pop()?;
            }
            Op::Duplicate => {
                let value = self.peek(0)?;
                self.push(value);
            }
            Op::DuplicatePair => {
                let a = self.peek(1)?;
                let b = self.peek(0)?;
                self.push(a);
                self.push(b);
            }

            Op::Add => self.binary(arith::add)?,
            Op::Subtract => self.binary(arith::subtract)?,
            Op::Multiply => self.binary(arith::multiply)?,
            Op::Divide => self.binary(arith::divide)?,
            Op::Modulo => self.binary(arith::modulo)?,
            Op::BitAnd | Op::BitOr | Op::BitXor | Op::BitLeftShift | Op::BitRightShift => {
                self.binary(|a, b| arith::bitwise(op, a, b))?
            }
            Op::Less | Op::LessEqual | Op::Greater | Op::GreaterEqual => {
                self.binary(|a, b| arith::compare(op, a, b))?
            }
            Op::Equal => self.binary(|a, b| Ok(Value::Bool(a == b)))?,
            Op::NotEqual => self.binary(|a, b| Ok(Value::Bool(a != b)))?,
            Op::Negate => self.unary(arith::negate)?,
            Op::BitNot => self.unary(arith::bit_not)?,
            Op::Not => self.unary(|a| Ok(Value::Bool(a.is_falsy())))?,

            Op::DefineGlobal(k) => {
                let name = self.constant_name(k)?;
                let value = self.pop()?;
                self.globals.insert(name, value);
            }
            Op::GetGlobal(k) => {
                let name = self.constant_name(k)?;
                let value = self.globals.get(&name).cloned().ok_or_else(|| undefined_variable(&name))?;
                self.push(value);
            }
            Op::SetGlobal(k) => {
                let name = self.constant_name(k)?;
                let value = self.peek(0)?;
                match self.globals.get_mut(&name) {
                    Some(slot) => *slot = value,
                    None => return Err(undefined_variable(&name)),
                }
            }
            Op::GetLocal(slot) => {
                let value = self.local(slot)?;
                self.push(value);
            }
            Op::SetLocal(slot) => {
                let value = self.peek(0)?;
                self.set_local(slot, value)?;
            }
            Op::IncrementLocalAndSet(slot, n) => {
                let value = arith::add(&self.local(slot)?, &Value::Integer(n))?;
                self.set_local(slot, value.clone())?;
                self.push(value);
            }
            Op::GetDynamic => {
                let key = self.pop()?;
                let object = self.pop()?;
                self.push(collections::get_dynamic(&object, &key)?);
            }
            Op::SetDynamic => {
                let value = self.pop()?;
                let key = self.pop()?;
                let object = self.pop()?;
                self.push(collections::set_dynamic(&object, &key, value)?);
            }
            Op::GetProperty(k) => {
                let key = self.constant_name(k)?;
                let object = self.pop()?;
                self.push(collections::get_property(&object, &key)?);
            }
            Op::SetProperty(k) => {
                let key = self.constant_name(k)?;
                let value = self.pop()?;
                let object = self.pop()?;
                self.push(collections::set_property(&object, &key, value)?);
            }

            Op::NewArray(n) => {
                let items = self.pop_many(n)?;
                self.push(Value::new_array(items));
            }
            Op::NewTable(n) => {
                let items = self.pop_many(n * 2)?;
                let mut entries = HashMap::with_capacity(n);
                let mut pairs = items.into_iter();
                while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                    match key {
                        Value::String(key) => {
                            entries.insert(key.to_string(), value);
                        }
                        other => return Err(expected_type("Table", "`String` keys", &other)),
                    }
                }
                self.push(Value::new_table(entries));
            }
            Op::ArrayPush => self.binary(|a, v| collections::push(a, v.clone()))?,
            Op::ArrayPop => self.unary(collections::pop)?,
            Op::ArrayInsert => {
                let value = self.pop()?;
                let index = self.pop()?;
                let array = self.pop()?;
                self.push(collections::insert(&array, &index, value)?);
            }
            Op::Delete => self.binary(collections::delete)?,
            Op::Len => self.unary(collections::len)?,
            Op::Keys => self.unary(collections::keys)?,
            Op::Exists => self.binary(collections::exists)?,
            Op::Index => self.binary(collections::index)?,
            Op::Slice => {
                let end = self.pop()?;
                let start = self.pop()?;
                let object = self.pop()?;
                self.push(collections::slice(&object, &start, &end)?);
            }
            Op::Clear => self.unary(collections::clear)?,
            Op::Copy => self.unary(collections::copy)?,

            Op::Jump(offset) => self.frame_mut()?.ip += offset,
            Op::JumpIfFalse(offset) => {
                if self.peek(0)?.is_falsy() {
                    self.frame_mut()?.ip += offset;
                }
            }
            Op::JumpIfTrue(offset) => {
                if !self.peek(0)?.is_falsy() {
                    self.frame_mut()?.ip += offset;
                }
            }
            Op::Loop(offset) => self.jump_back(offset)?,
            Op::For { slot, vars, jump } => self.for_begin(slot, vars, jump)?,
            Op::ForLoop { slot, vars, jump } => self.for_next(slot, vars, jump)?,

            Op::Call(count) => self.call_value(count)?,
            Op::Return => {
                let result = self.pop()?;
                let frame = self.frames.pop().ok_or_else(stack_underflow)?;
                self.stack.truncate(frame.base);
                if self.frames.is_empty() {
                    return Ok(Flow::Halt);
                }
                self.push(result);
            }
            Op::Throw => return Err(self.pop()?),

            Op::Print => {
                let value = self.pop()?;
                (self.print)(&value.to_string());
            }
            Op::Echo => {
                let value = self.pop()?;
                (self.print)(&format!("{}\n", value));
            }
            Op::Type => self.unary(|a| Ok(Value::string(a.type_name())))?,
            Op::ToInteger => self.unary(collections::to_integer)?,
            Op::ToFloat => self.unary(collections::to_float)?,
            Op::ToString => self.unary(|a| Ok(Value::from(a.to_string())))?,
            Op::Use => self.use_script()?,
        }
        Ok(Flow::Next)
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Step<Value> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    fn peek(&self, distance: usize) -> Step<Value> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|i| self.stack.get(i))
            .cloned()
            .ok_or_else(stack_underflow)
    }

    fn pop_many(&mut self, n: usize) -> Step<Vec<Value>> {
        let start = self.stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        Ok(self.stack.split_off(start))
    }

    fn unary(&mut self, f: impl FnOnce(&Value) -> Result<Value, Value>) -> Step<()> {
        let a = self.pop()?;
        let result = f(&a)?;
        self.push(result);
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(&Value, &Value) -> Result<Value, Value>) -> Step<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = f(&a, &b)?;
        self.push(result);
        Ok(())
    }

    fn frame(&self) -> Step<&Frame> {
        self.frames.last().ok_or_else(|| fault("No active frame."))
    }

    fn frame_mut(&mut self) -> Step<&mut Frame> {
        self.frames.last_mut().ok_or_else(|| fault("No active frame."))
    }

    fn jump_back(&mut self, offset: usize) -> Step<()> {
        let frame = self.frame_mut()?;
        frame.ip = frame
            .ip
            .checked_sub(offset)
            .ok_or_else(|| fault("Jump before start of function."))?;
        Ok(())
    }

    fn constant(&self, index: usize) -> Step<Value> {
        self.frame()?
            .function
            .code
            .constants
            .get(index)
            .cloned()
            .ok_or_else(|| fault(format!("Constant {} out of range.", index)))
    }

    fn constant_name(&self, index: usize) -> Step<String> {
        match self.constant(index)? {
            Value::String(s) => Ok(s.to_string()),
            other => Err(expected_type("Name", "`String`", &other)),
        }
    }

    fn local(&self, slot: usize) -> Step<Value> {
        let base = self.frame()?.base;
        self.stack.get(base + slot).cloned().ok_or_else(stack_underflow)
    }

    fn set_local(&mut self, slot: usize, value: Value) -> Step<()> {
        let base = self.frame()?.base;
        let target = self.stack.get_mut(base + slot).ok_or_else(stack_underflow)?;
        *target = value;
        Ok(())
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Pushes the key snapshot, index and first loop variables.
    fn for_begin(&mut self, slot: usize, vars: usize, jump: usize) -> Step<()> {
        let object = self.local(slot)?;
        let keys = match &object {
            Value::Array(_) => Value::None,
            Value::Table(entries) => Value::new_array(collections::sorted_keys(&entries.borrow())),
            Value::String(s) => Value::new_array(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => {
                return Err(expected_type("Iterator", "`Array`, `Table` or `String`", other));
            }
        };
        let item = iteration(&object, &keys, 0);
        self.push(keys);
        self.push(Value::Integer(0));
        match item {
            Some(item) => {
                for value in loop_variables(&object, item, vars) {
                    self.push(value);
                }
            }
            None => {
                for _ in 0..vars {
                    self.push(Value::None);
                }
                self.frame_mut()?.ip += jump;
            }
        }
        Ok(())
    }

    /// Advances the loop, jumping back to the body while items remain.
    fn for_next(&mut self, slot: usize, vars: usize, jump: usize) -> Step<()> {
        let object = self.local(slot)?;
        let keys = self.local(slot + 1)?;
        let index = match self.local(slot + 2)? {
            Value::Integer(n) => n as usize + 1,
            other => return Err(expected_type("Iterator", "`Integer` index", &other)),
        };
        self.set_local(slot + 2, Value::Integer(index as i64))?;

        if let Some(item) = iteration(&object, &keys, index) {
            for (i, value) in loop_variables(&object, item, vars).into_iter().enumerate() {
                self.set_local(slot + 3 + i, value)?;
            }
            self.jump_back(jump)?;
        }
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, count: usize) -> Step<()> {
        let callee = self.peek(count)?;
        match callee {
            Value::Function(function) => self.call_function(function, count),
            Value::NativeFunction(native) => {
                let call = self
                    .natives
                    .get(native.id)
                    .copied()
                    .ok_or_else(|| fault(format!("Unknown native function `{}`.", native.name)))?;
                let args = self.pop_many(count)?;
                self.pop()?;
                let result = call(&args)?;
                self.push(result);
                Ok(())
            }
            other => Err(fault(format!(
                "Call: Requires Function, but was {}.",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: Rc<Function>, count: usize) -> Step<()> {
        if function.arity != count {
            return Err(fault(format!(
                "Expected {} function arguments but found {}.",
                function.arity, count
            )));
        }
        if self.frames.len() >= self.config.max_frames || self.stack.len() >= self.config.max_stack {
            return Err(fault("Stack overflow."));
        }
        let base = self.stack.len() - count - 1;
        self.frames.push(Frame { function, ip: 0, base });
        Ok(())
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Transfers control to the innermost handler covering the faulting
    /// instruction, or fails the run when no frame has one.
    fn unwind(&mut self, thrown: Value) -> Result<(), RuntimeError> {
        let line = self
            .frames
            .last()
            .map(|frame| frame.function.code.line(frame.ip.saturating_sub(1)))
            .unwrap_or(0);
        let call_stack = self.call_stack();

        while let Some(frame) = self.frames.last_mut() {
            let faulting = frame.ip.saturating_sub(1);
            if let Some(range) = frame.function.find_except(faulting).copied() {
                debug!("caught {:?} at {:04}", thrown, faulting);
                frame.ip = range.end;
                let depth = frame.base + range.stack;
                self.stack.truncate(depth);
                self.push(thrown);
                return Ok(());
            }
            self.frames.pop();
        }

        self.reset();
        let error = call_stack
            .into_iter()
            .fold(RuntimeError::new(thrown.to_string()).with_line(line), |error, frame| {
                error.with_context(frame)
            });
        Err(error)
    }

    fn call_stack(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function = &frame.function;
                format!(
                    "at {} {}:{}",
                    function.name.as_deref().unwrap_or("<script>"),
                    function.script.as_deref().unwrap_or("<script>"),
                    function.code.line(frame.ip.saturating_sub(1))
                )
            })
            .collect()
    }

    // =========================================================================
    // Imports
    // =========================================================================

    fn script_parent(&self) -> Option<PathBuf> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.function.script.as_deref())
            .and_then(|script| Path::new(script).parent().map(Path::to_path_buf))
    }

    /// Runs an imported script as a new frame unless it already ran.
    fn use_script(&mut self) -> Step<()> {
        let target = match self.pop()? {
            Value::String(s) => s,
            other => return Err(expected_type("Use", "`String`", &other)),
        };
        let paths = self.globals.get(PATHS).cloned().unwrap_or_else(import::default_paths);
        let parent = self.script_parent();
        let path = import::resolve(&paths, parent.as_deref(), &target).map_err(|tried| {
            fault(format!("Import not found: {}\n  {}", target, tried.join("\n  ")))
        })?;
        let key = path.to_string_lossy().into_owned();

        let imports = match self.globals.get(IMPORTS) {
            Some(imports @ Value::Array(_)) => imports.clone(),
            _ => {
                let imports = Value::new_array(Vec::new());
                self.globals.insert(IMPORTS.to_string(), imports.clone());
                imports
            }
        };
        if import::already_imported(&imports, &key) {
            self.push(Value::None);
            return Ok(());
        }
        collections::push(&imports, Value::from(key.as_str()))?;

        debug!("import {}", key);
        let source = fs::read_to_string(&path).map_err(|e| fault(format!("Import failed: {}: {}", key, e)))?;
        let function = Rc::new(compile(Some(&key), &source).map_err(|e| fault(e.to_string()))?);
        self.push(Value::Function(function.clone()));
        self.call_function(function, 0)
    }
}

/// Key and value at `index` of a `for .. in` loop, `None` once exhausted.
fn iteration(object: &Value, keys: &Value, index: usize) -> Option<(Value, Value)> {
    match (object, keys) {
        (Value::Array(items), _) => items
            .borrow()
            .get(index)
            .map(|value| (Value::Integer(index as i64), value.clone())),
        (Value::Table(entries), Value::Array(keys)) => {
            let key = keys.borrow().get(index).cloned()?;
            let value = match &key {
                Value::String(k) => entries.borrow().get(&**k).cloned().unwrap_or(Value::None),
                _ => Value::None,
            };
            Some((key, value))
        }
        (Value::String(_), Value::Array(chars)) => chars
            .borrow()
            .get(index)
            .map(|c| (Value::Integer(index as i64), c.clone())),
        _ => None,
    }
}

/// `for v in array` binds the element, `for k in table` binds the key.
fn loop_variables(object: &Value, (key, value): (Value, Value), vars: usize) -> Vec<Value> {
    match (vars, object) {
        (1, Value::Table(_)) => vec![key],
        (1, _) => vec![value],
        _ => vec![key, value],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    // =========================================================================
    // Test helpers
    // =========================================================================

    /// Runs `source` in a fresh VM, returning captured output and the result.
    fn run(source: &str) -> (String, Result<(), HymnError>) {
        let mut vm = Hymn::new();
        let out = capture(&mut vm);
        let result = vm.interpret(source);
        let text = out.borrow().clone();
        (text, result)
    }

    fn capture(vm: &mut Hymn) -> Rc<RefCell<String>> {
        let out = Rc::new(RefCell::new(String::new()));
        let sink = out.clone();
        vm.set_print(move |text| sink.borrow_mut().push_str(text));
        out
    }

    fn assert_output(source: &str, expected: &str) {
        let (out, result) = run(source);
        if let Err(e) = result {
            panic!("script failed: {}\noutput so far:\n{}", e, out);
        }
        assert_eq!(out, expected);
    }

    fn assert_error(source: &str, error_contains: &str) {
        match run(source) {
            (out, Ok(())) => panic!(
                "expected error containing '{}', got output:\n{}",
                error_contains, out
            ),
            (_, Err(e)) => assert!(
                e.to_string().contains(error_contains),
                "expected error containing '{}', got: {}",
                error_contains,
                e
            ),
        }
    }

    // =========================================================================
    // Basics
    // =========================================================================

    #[test]
    fn test_echo_sum() {
        assert_output("let x = 1 + 2; echo x;", "3\n");
    }

    #[test]
    fn test_push_and_len() {
        assert_output("let a = [1,2,3]; push(a, 4); echo len(a);", "4\n");
    }

    #[test]
    fn test_print_has_no_newline() {
        assert_output("print 1 print \"a\"", "1a");
    }

    #[test]
    fn test_rendering() {
        assert_output(
            "echo 6 / 3\necho [1, \"a\", none]\necho { b: 2, a: [] }\necho {}",
            "2.0\n[1, \"a\", none]\n{ a: [], b: 2 }\n{}\n",
        );
    }

    #[test]
    fn test_string_interpolation() {
        assert_output("let n = 3\necho \"n = {n}, twice {n * 2}\"", "n = 3, twice 6\n");
        assert_output("let t = { k: \"v\" }\necho \"{t.k}!\"", "v!\n");
    }

    #[test]
    fn test_truthiness_and_logic() {
        assert_output(
            "echo not 0\necho not []\necho none or \"x\"\necho 1 and 0\necho !true",
            "true\ntrue\nx\n0\nfalse\n",
        );
    }

    #[test]
    fn test_equality_is_numeric_across_types() {
        assert_output("echo 1 == 1.0\necho [] == []\nlet a = []\necho a == a", "true\nfalse\ntrue\n");
    }

    #[test]
    fn test_type_and_casts() {
        assert_output(
            "echo type(1.5)\necho to_integer(\"12\") + 1\necho to_float(2)\necho to_string([1]) + \"!\"",
            "Float\n13\n2.0\n[1]!\n",
        );
    }

    // =========================================================================
    // Variables and scope
    // =========================================================================

    #[test]
    fn test_global_assignment() {
        assert_output("let a = 1\na = a + 1\na += 3\necho a", "5\n");
    }

    #[test]
    fn test_undefined_global() {
        assert_error("echo missing", "Undefined variable `missing`.");
        assert_error("missing = 1", "Undefined variable `missing`.");
    }

    #[test]
    fn test_block_shadowing() {
        assert_output(
            "function f() { let a = 1; if true { let a = 2; echo a } echo a }\nf()",
            "2\n1\n",
        );
    }

    #[test]
    fn test_block_locals_end_with_block() {
        assert_error(
            "function f() { if true { let inner = 1 } return inner }\nf()",
            "Undefined variable `inner`.",
        );
        assert_error("for let i = 0; i < 1; i += 1 { }\necho i", "Undefined variable `i`.");
    }

    #[test]
    fn test_globals_persist_between_runs() {
        let mut vm = Hymn::new();
        let out = capture(&mut vm);
        vm.interpret("let counter = 41").unwrap();
        vm.interpret("counter += 1\necho counter").unwrap();
        assert_eq!(out.borrow().as_str(), "42\n");
        assert_eq!(vm.get_global("counter"), Some(Value::Integer(42)));
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn test_if_elif_else() {
        assert_output(
            "function f(n) { if n < 0 { return \"neg\" } elif n == 0 { return \"zero\" } else { return \"pos\" } }\necho f(-1)\necho f(0)\necho f(5)",
            "neg\nzero\npos\n",
        );
    }

    #[test]
    fn test_while_with_break_and_continue() {
        assert_output(
            "let i = 0\nlet s = 0\nwhile true { i += 1\nif i > 10 { break }\nif i % 2 == 0 { continue }\ns += i }\necho s",
            "25\n",
        );
    }

    #[test]
    fn test_c_style_for() {
        assert_output(
            "let s = []\nfor let i = 0; i < 5; i += 1 { if i == 2 { continue } push(s, i) }\necho s",
            "[0, 1, 3, 4]\n",
        );
    }

    #[test]
    fn test_for_in_array_and_table() {
        assert_output(
            "for v in [1, 2] { echo v }\nfor i, v in [\"a\"] { echo \"{i}={v}\" }\nfor k in { b: 1, a: 2 } { echo k }\nfor k, v in { x: 9 } { echo \"{k}:{v}\" }",
            "1\n2\n0=a\na\nb\nx:9\n",
        );
    }

    #[test]
    fn test_for_in_break_and_empty() {
        assert_output(
            "for v in [] { echo v }\nfor v in [1, 2, 3] { if v == 2 { break } echo v }\necho \"done\"",
            "1\ndone\n",
        );
    }

    #[test]
    fn test_for_in_string() {
        assert_output("for c in \"hi\" { print c }", "hi");
    }

    #[test]
    fn test_for_in_rejects_numbers() {
        assert_error("for v in 5 { }", "Iterator: Expected `Array`, `Table` or `String`, but was `Integer`.");
    }

    #[test]
    fn test_nested_loops_in_function() {
        assert_output(
            "function f() { let total = 0; for a in [1, 2] { for b in [10, 20] { if b == 20 { break } total += a * b } } return total }\necho f()",
            "30\n",
        );
    }

    // =========================================================================
    // Functions
    // =========================================================================

    #[test]
    fn test_recursion() {
        assert_output(
            "function fib(n) { if n < 2 { return n } return fib(n - 1) + fib(n - 2) }\necho fib(15)",
            "610\n",
        );
    }

    #[test]
    fn test_anonymous_function_value() {
        assert_output("let twice = function(x) { return x * 2 }\necho twice(4)\necho twice", "8\n<function>\n");
    }

    #[test]
    fn test_implicit_return_is_none() {
        assert_output("function f() { }\necho f()", "none\n");
    }

    #[test]
    fn test_arity_mismatch() {
        assert_error("function f(a) { }\nf(1, 2)", "Expected 1 function arguments but found 2.");
    }

    #[test]
    fn test_calling_a_non_function() {
        assert_error("let x = 3\nx()", "Call: Requires Function, but was Integer.");
    }

    #[test]
    fn test_stack_overflow() {
        assert_error("function f() { return f() }\nf()", "Stack overflow.");
    }

    #[test]
    fn test_native_function() {
        fn sum(args: &[Value]) -> Result<Value, Value> {
            let mut total = 0;
            for arg in args {
                match arg {
                    Value::Integer(n) => total += n,
                    other => return Err(Value::from(format!("sum: bad argument {}", other))),
                }
            }
            Ok(Value::Integer(total))
        }

        let mut vm = Hymn::new();
        let out = capture(&mut vm);
        vm.add_native("sum", sum);
        vm.interpret("echo sum(1, 2, 3)\ntry { sum(\"x\") } except e { echo e }").unwrap();
        assert_eq!(out.borrow().as_str(), "6\nsum: bad argument x\n");
    }

    // =========================================================================
    // Collections
    // =========================================================================

    #[test]
    fn test_aliasing_and_copy() {
        assert_output(
            "let a = [1]\nlet b = a\npush(b, 2)\nlet c = copy(a)\npush(c, 3)\necho a\necho c",
            "[1, 2]\n[1, 2, 3]\n",
        );
    }

    #[test]
    fn test_table_properties() {
        assert_output(
            "let t = {}\nt.x = 1\nt[\"y\"] = 2\nt.x += 10\necho t\necho exists(t, \"z\")\necho keys(t)",
            "{ x: 11, y: 2 }\nfalse\n[\"x\", \"y\"]\n",
        );
    }

    #[test]
    fn test_index_compound_assignment() {
        assert_output("let a = [1, 2]\na[1] *= 5\na[-1] += 1\necho a", "[1, 11]\n");
    }

    #[test]
    fn test_missing_key() {
        assert_error("let t = { a: 1 }\necho t.b", "Key not found: `b`.");
    }

    #[test]
    fn test_collection_builtins() {
        assert_output(
            "let a = [3, 4]\ninsert(a, 0, 2)\necho a\necho pop(a)\necho delete(a, 0)\necho index(a, 3)\nclear(a)\necho a\necho \"hymn\"[1:3]\necho [1, 2, 3][:-1]",
            "[2, 3, 4]\n4\n2\n0\n[]\nym\n[1, 2]\n",
        );
    }

    #[test]
    fn test_self_referencing_array_renders() {
        assert_output("let a = [1]\npush(a, a)\necho a", "[1, [..]]\n");
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    #[test]
    fn test_try_throw() {
        assert_output("try { throw \"boom\"; } except (e) { echo e; }", "boom\n");
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let (out, result) = run("echo 1/0;");
        assert_eq!(out, "");
        match result {
            Err(HymnError::Runtime(e)) => {
                assert_eq!(e.message, "Divide: Division by zero.");
                assert_eq!(e.line, 1);
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_faults_are_catchable() {
        assert_output("try { echo 1 % 0 } except e { echo \"caught: \" + e }", "caught: Modulo: Division by zero.\n");
    }

    #[test]
    fn test_innermost_handler_wins() {
        assert_output(
            "try { try { throw 1 } except e { echo \"inner \" + e\nthrow 2 } } except e { echo \"outer \" + e }",
            "inner 1\nouter 2\n",
        );
    }

    #[test]
    fn test_throw_unwinds_through_calls() {
        assert_output(
            "function a() { throw \"deep\" }\nfunction b() { let x = 1; a() }\ntry { b() } except e { echo e }\necho \"after\"",
            "deep\nafter\n",
        );
    }

    #[test]
    fn test_catch_restores_stack_depth() {
        // The throw leaves `1, 2, 3` and a call frame mid-expression; the
        // handler's locals must still land in their compiled slots.
        assert_output(
            "function g() { throw \"x\" }\nfunction f() { let a = \"a\"; try { let b = \"b\"; let c = [1, 2, 3 + g()] } except e { let after = \"after\"; return [a, e, after] } }\necho f()\necho f()",
            "[\"a\", \"x\", \"after\"]\n[\"a\", \"x\", \"after\"]\n",
        );
    }

    #[test]
    fn test_uncaught_throw_reports_call_stack() {
        let mut vm = Hymn::new();
        capture(&mut vm);
        let result = vm.interpret_script("main.hm", "function boom() {\n  throw { code: 7 }\n}\nboom()");
        let Err(HymnError::Runtime(e)) = result else {
            panic!("expected runtime error");
        };
        assert_eq!(e.message, "{ code: 7 }");
        assert_eq!(e.line, 2);
        assert_eq!(e.call_stack, vec!["at boom main.hm:2".to_string(), "at <script> main.hm:4".to_string()]);
        assert_eq!(vm.error(), Some(e.to_string().as_str()));
        assert_eq!(vm.stack_depth(), 0);

        // the machine accepts another run after a failure
        vm.interpret("let ok = true").unwrap();
        assert_eq!(vm.get_global("ok"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_compile_error_runs_nothing() {
        let (out, result) = run("echo 1\necho )");
        assert_eq!(out, "");
        assert!(matches!(result, Err(HymnError::Compile(_))));
    }

    // =========================================================================
    // Imports
    // =========================================================================

    #[test]
    fn test_use_runs_script_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.hm"), "echo \"loading\"\nlet shared = 5").unwrap();
        let main = dir.path().join("main.hm");
        std::fs::write(&main, "use \"lib\"\nuse \"lib\"\necho shared\necho len(__imports)").unwrap();

        let mut vm = Hymn::new();
        let out = capture(&mut vm);
        vm.interpret_file(&main, false).unwrap();
        assert_eq!(out.borrow().as_str(), "loading\n5\n1\n");
    }

    #[test]
    fn test_use_missing_script() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.hm");
        std::fs::write(&main, "try { use \"nowhere\" } except e { echo e }").unwrap();

        let mut vm = Hymn::new();
        let out = capture(&mut vm);
        vm.interpret_file(&main, false).unwrap();
        let out = out.borrow();
        assert!(out.starts_with("Import not found: nowhere\n"));
        assert!(out.contains("./modules/nowhere.hm"));
    }

    #[test]
    fn test_use_with_compile_error_is_catchable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.hm"), "let = 1").unwrap();
        let main = dir.path().join("main.hm");
        std::fs::write(&main, "try { use \"bad\" } except e { echo \"caught\" }").unwrap();

        let mut vm = Hymn::new();
        let out = capture(&mut vm);
        vm.interpret_file(&main, false).unwrap();
        assert_eq!(out.borrow().as_str(), "caught\n");
    }

    #[test]
    fn test_debug_interpret_prints_listing_first() {
        let mut vm = Hymn::new();
        let out = capture(&mut vm);
        vm.debug_interpret("echo 7").unwrap();
        let out = out.borrow();
        assert!(out.contains("ECHO"));
        assert!(out.ends_with("7\n"));
    }

    #[test]
    fn test_report_uses_error_sink() {
        let mut vm = Hymn::new();
        let errors = Rc::new(RefCell::new(String::new()));
        let sink = errors.clone();
        vm.set_print_error(move |text| sink.borrow_mut().push_str(text));
        let err = vm.interpret("throw \"bad\"").unwrap_err();
        vm.report(&err);
        assert!(errors.borrow().starts_with("bad\n"));
    }
}
