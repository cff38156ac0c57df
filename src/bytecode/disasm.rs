use std::fmt;

use crate::bytecode::{Function, Op};
use crate::lang::value::Value;

/// Disassembly of a function and every function in its constant pool.
pub fn disassemble(function: &Function) -> String {
    Listing(function).to_string()
}

struct Listing<'a>(&'a Function);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_function(f, self.0)
    }
}

fn write_function(out: &mut fmt::Formatter<'_>, function: &Function) -> fmt::Result {
    let code = &function.code;
    let encoded = code.encode().map(|bytes| bytes.len()).unwrap_or(0);

    writeln!(out, "════════════════════════════════════════")?;
    writeln!(out, " {}", function.display_name())?;
    writeln!(
        out,
        " {} instructions, {} constants, {} bytes encoded",
        code.len(),
        code.constants.len(),
        encoded
    )?;
    writeln!(out, "════════════════════════════════════════")?;

    let targets = jump_targets(&code.instructions);
    let mut last_line = 0;
    for (ip, op) in code.instructions.iter().enumerate() {
        let line = code.line(ip);
        let line_column = if line == last_line {
            "   |".to_string()
        } else {
            format!("{:4}", line)
        };
        last_line = line;

        let marker = if targets.contains(&ip) { "►" } else { " " };
        writeln!(out, "{:04} {} {} {}", ip, line_column, marker, describe(function, op, ip))?;
    }

    for range in &function.excepts {
        writeln!(
            out,
            "  except {:04}..{:04} handler {:04} stack {}",
            range.start, range.end, range.end, range.stack
        )?;
    }
    writeln!(out)?;

    for constant in &code.constants {
        if let Value::Function(inner) = constant {
            write_function(out, inner)?;
        }
    }
    Ok(())
}

fn jump_targets(ops: &[Op]) -> Vec<usize> {
    let mut targets = Vec::new();
    for (ip, op) in ops.iter().enumerate() {
        if let Some(target) = op.jump_target(ip) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}

fn describe(function: &Function, op: &Op, ip: usize) -> String {
    let name = op.name();
    let constant = |index: &usize| match function.code.constants.get(*index) {
        Some(Value::String(s)) => format!("{:<24}[{}] {:?}", name, index, s.as_ref()),
        Some(value) => format!("{:<24}[{}] {}", name, index, value),
        None => format!("{:<24}[{}] ?", name, index),
    };

    match op {
        Op::Constant(k)
        | Op::DefineGlobal(k)
        | Op::GetGlobal(k)
        | Op::SetGlobal(k)
        | Op::GetProperty(k)
        | Op::SetProperty(k) => constant(k),
        Op::Int(n) => format!("{:<24}{}", name, n),
        Op::Float(n) => format!("{:<24}{}", name, n),
        Op::GetLocal(slot) | Op::SetLocal(slot) => format!("{:<24}${}", name, slot),
        Op::IncrementLocalAndSet(slot, n) => format!("{:<24}${} {:+}", name, slot, n),
        Op::NewArray(n) | Op::NewTable(n) | Op::Call(n) => format!("{:<24}{}", name, n),
        Op::Jump(offset) | Op::JumpIfFalse(offset) | Op::JumpIfTrue(offset) => {
            format!("{:<24}{} ↓ (→ {:04})", name, offset, ip + 1 + offset)
        }
        Op::Loop(offset) => match op.jump_target(ip) {
            Some(target) => format!("{:<24}{} ↑ (→ {:04})", name, offset, target),
            None => format!("{:<24}{} ↑ (→ ?)", name, offset),
        },
        Op::For { slot, vars, jump } => format!(
            "{:<24}${} vars {} {} ↓ (→ {:04})",
            name,
            slot,
            vars,
            jump,
            ip + 1 + jump
        ),
        Op::ForLoop { slot, vars, jump } => match op.jump_target(ip) {
            Some(target) => format!("{:<24}${} vars {} {} ↑ (→ {:04})", name, slot, vars, jump, target),
            None => format!("{:<24}${} vars {} {} ↑ (→ ?)", name, slot, vars, jump),
        },
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::compile;

    fn disasm(source: &str) -> String {
        disassemble(&compile(Some("test.hm"), source).unwrap())
    }

    #[test]
    fn test_header_names_script() {
        let out = disasm("echo 1");
        let count = compile(Some("test.hm"), "echo 1").unwrap().code.len();
        assert_eq!(count, 4);
        assert!(out.contains(" test.hm\n"));
        assert!(out.contains(" 4 instructions, "));
        assert!(out.contains("bytes encoded"));
    }

    #[test]
    fn test_constants_are_resolved() {
        let out = disasm("let greeting = \"hi\"");
        assert!(out.contains("DEFINE_GLOBAL"));
        assert!(out.contains("[0] \"greeting\""));
        assert!(out.contains("[1] \"hi\""));
    }

    #[test]
    fn test_jump_targets_are_marked() {
        let out = disasm("while false { echo 1 }");
        assert!(out.contains("0000    1 ► FALSE"));
        assert!(out.contains("LOOP"));
        assert!(out.contains("↑ (→ 0000)"));
    }

    #[test]
    fn test_nested_functions_follow_script() {
        let out = disasm("function double(n) { return n * 2 }");
        let script = out.find(" test.hm\n").unwrap();
        let function = out.find(" double\n").unwrap();
        assert!(script < function);
        assert!(out.contains("GET_LOCAL               $1"));
    }

    #[test]
    fn test_except_ranges_are_listed() {
        let out = disasm("try { throw 1 } except { }");
        assert!(out.contains("except 0000..0003"));
    }
}
