use std::rc::Rc;

use log::debug;

use crate::{
    bytecode::{
        Op,
        compile_error::CompileError,
        ir::{ExceptRange, Function},
        rules::{self, Infix, Precedence, Prefix},
    },
    frontend::{
        lexer::{Lexer, Span, Spanned},
        token::{StringStatus, Token},
    },
    lang::value::Value,
};

type CompileResult<T = ()> = Result<T, CompileError>;

/// Compiles a whole script into its top-level function.
pub fn compile(script: Option<&str>, source: &str) -> CompileResult<Function> {
    let mut compiler = Compiler::new(script, source);
    compiler.advance()?;
    while !compiler.check(&Token::Eof) {
        compiler.declaration()?;
    }
    compiler.emit(Op::None);
    compiler.emit(Op::Return);

    let function = compiler.scope.function;
    debug!(
        "compiled {}: {} instructions, {} constants",
        function.display_name(),
        function.code.len(),
        function.code.constants.len()
    );
    Ok(function)
}

// =============================================================================
// Compile-time bookkeeping
// =============================================================================

#[derive(Debug, Clone)]
struct Local {
    name: String,
    /// `None` while the initializer is still being compiled.
    depth: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Script,
    Function,
}

/// Per-function compile state. Slot 0 holds the callee.
struct Scope {
    function: Function,
    kind: ScopeKind,
    locals: Vec<Local>,
    depth: usize,
    /// Innermost loop of this function, an index into `Compiler::loops`.
    loop_head: Option<usize>,
    /// Pending `break` jumps, an index into `Compiler::jumps`.
    jump_head: Option<usize>,
}

impl Scope {
    fn new(function: Function, kind: ScopeKind) -> Self {
        Scope {
            function,
            kind,
            locals: vec![Local {
                name: String::new(),
                depth: Some(0),
            }],
            depth: match kind {
                ScopeKind::Script => 0,
                ScopeKind::Function => 1,
            },
            loop_head: None,
            jump_head: None,
        }
    }
}

/// A forward jump waiting for its target. `next` chains entries of one list.
#[derive(Debug, Clone, Copy)]
struct JumpEntry {
    jump: usize,
    depth: usize,
    next: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct LoopContext {
    /// Condition (or first body instruction) the loop returns to.
    start: usize,
    /// Increment step of a `for` loop, when it precedes the body.
    step: Option<usize>,
    depth: usize,
    /// `continue` targets the step instead of the condition.
    is_for: bool,
    /// Pending `continue` jumps when the step follows the body.
    continues: Option<usize>,
    enclosing: Option<usize>,
}

// =============================================================================
// Compiler
// =============================================================================

/// Single-pass Pratt compiler. Pulls tokens from the lexer and writes
/// instructions straight into the function being compiled.
pub struct Compiler<'a> {
    source: &'a str,
    script: Option<String>,
    lexer: Lexer,
    previous: Spanned,
    current: Spanned,
    scope: Scope,
    enclosing: Vec<Scope>,
    jumps: Vec<JumpEntry>,
    loops: Vec<LoopContext>,
}

impl<'a> Compiler<'a> {
    pub fn new(script: Option<&str>, source: &'a str) -> Self {
        let script = script.map(str::to_string);
        let eof = Spanned {
            token: Token::Eof,
            span: Span::default(),
        };
        Compiler {
            source,
            lexer: Lexer::new(source),
            previous: eof.clone(),
            current: eof,
            scope: Scope::new(Function::new(None, script.clone()), ScopeKind::Script),
            script,
            enclosing: Vec::new(),
            jumps: Vec::new(),
            loops: Vec::new(),
        }
    }

    // =========================================================================
    // Token cursor
    // =========================================================================

    fn advance(&mut self) -> CompileResult {
        let next = self.lexer.next_token()?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(())
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.current.token) == std::mem::discriminant(token)
    }

    fn matches(&mut self, token: &Token) -> CompileResult<bool> {
        if !self.check(token) {
            return Ok(false);
        }
        self.advance()?;
        Ok(true)
    }

    fn consume(&mut self, token: Token, message: &str) -> CompileResult {
        if self.check(&token) {
            return self.advance();
        }
        Err(self.error_current(format!("{}, found `{}`.", message, self.current.token)))
    }

    fn consume_ident(&mut self, message: &str) -> CompileResult<String> {
        match &self.current.token {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            other => Err(self.error_current(format!("{}, found `{}`.", message, other))),
        }
    }

    fn error_at(&self, span: Span, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, span, self.script.as_deref(), self.source)
    }

    fn error_current(&self, message: impl Into<String>) -> CompileError {
        self.error_at(self.current.span, message)
    }

    fn error_previous(&self, message: impl Into<String>) -> CompileError {
        self.error_at(self.previous.span, message)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn code_len(&self) -> usize {
        self.scope.function.code.len()
    }

    fn emit(&mut self, op: Op) -> usize {
        let line = self.previous.span.row + 1;
        self.scope.function.code.write(op, line)
    }

    fn make_constant(&mut self, value: Value) -> usize {
        self.scope.function.code.add_constant(value)
    }

    fn emitted_since(&self, mark: usize) -> &[Op] {
        self.scope
            .function
            .code
            .instructions
            .get(mark..)
            .unwrap_or(&[])
    }

    /// Points the jump at `index` to the next instruction to be emitted.
    fn patch_jump(&mut self, index: usize) {
        let offset = self.code_len() - index - 1;
        if let Some(op) = self.scope.function.code.instructions.get_mut(index) {
            *op = match *op {
                Op::Jump(_) => Op::Jump(offset),
                Op::JumpIfFalse(_) => Op::JumpIfFalse(offset),
                Op::JumpIfTrue(_) => Op::JumpIfTrue(offset),
                Op::For { slot, vars, .. } => Op::For {
                    slot,
                    vars,
                    jump: offset,
                },
                other => other,
            };
        }
    }

    fn emit_loop(&mut self, start: usize) {
        let offset = self.code_len() + 1 - start;
        self.emit(Op::Loop(offset));
    }

    fn push_jump(&mut self, jump: usize, depth: usize, next: Option<usize>) -> Option<usize> {
        self.jumps.push(JumpEntry { jump, depth, next });
        Some(self.jumps.len() - 1)
    }

    fn patch_chain(&mut self, mut head: Option<usize>) {
        while let Some(entry) = head.and_then(|i| self.jumps.get(i).copied()) {
            self.patch_jump(entry.jump);
            head = entry.next;
        }
    }

    /// Patches every pending `break` registered at `depth` or deeper.
    fn patch_breaks(&mut self, depth: usize) {
        while let Some(entry) = self.scope.jump_head.and_then(|i| self.jumps.get(i).copied()) {
            if entry.depth < depth {
                break;
            }
            self.patch_jump(entry.jump);
            self.scope.jump_head = entry.next;
        }
    }

    // =========================================================================
    // Scopes and locals
    // =========================================================================

    fn begin_scope(&mut self) {
        self.scope.depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope.depth -= 1;
        let depth = self.scope.depth;
        while self
            .scope
            .locals
            .last()
            .is_some_and(|local| local.depth.is_none_or(|d| d > depth))
        {
            self.scope.locals.pop();
            self.emit(Op::Pop);
        }
    }

    /// Emits pops for locals deeper than `depth` without forgetting them.
    fn pop_locals_above(&mut self, depth: usize) {
        let count = self
            .scope
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth.is_none_or(|d| d > depth))
            .count();
        for _ in 0..count {
            self.emit(Op::Pop);
        }
    }

    fn declare_local(&mut self, name: String) -> CompileResult<usize> {
        let depth = self.scope.depth;
        for local in self.scope.locals.iter().rev() {
            if local.depth.is_some_and(|d| d < depth) {
                break;
            }
            if local.name == name {
                return Err(self.error_previous(format!(
                    "Scope Error: Variable `{}` already exists in this scope.",
                    name
                )));
            }
        }
        self.scope.locals.push(Local { name, depth: None });
        Ok(self.scope.locals.len() - 1)
    }

    fn mark_initialized(&mut self) {
        let depth = self.scope.depth;
        if let Some(local) = self.scope.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    /// A compiler-generated local whose value the VM pushes itself.
    fn add_hidden_local(&mut self, name: &str) -> usize {
        self.scope.locals.push(Local {
            name: name.to_string(),
            depth: Some(self.scope.depth),
        });
        self.scope.locals.len() - 1
    }

    fn resolve_local(&self, name: &str) -> CompileResult<Option<usize>> {
        for (slot, local) in self.scope.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth.is_none() {
                    return Err(self.error_previous(format!(
                        "Reference Error: Local variable `{}` referenced before assignment.",
                        name
                    )));
                }
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn begin_loop(&mut self, start: usize, step: Option<usize>, is_for: bool) -> usize {
        self.loops.push(LoopContext {
            start,
            step,
            depth: self.scope.depth,
            is_for,
            continues: None,
            enclosing: self.scope.loop_head,
        });
        let index = self.loops.len() - 1;
        self.scope.loop_head = Some(index);
        index
    }

    fn end_loop(&mut self, index: usize) {
        if let Some(context) = self.loops.get(index).copied() {
            self.scope.loop_head = context.enclosing;
            self.patch_breaks(context.depth);
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression(&mut self) -> CompileResult {
        self.compile_with_precedence(Precedence::Assign)
    }

    fn compile_with_precedence(&mut self, precedence: Precedence) -> CompileResult {
        self.advance()?;
        let Some(prefix) = rules::rule(&self.previous.token).prefix else {
            return Err(self.error_previous(format!(
                "Expected expression but found `{}`.",
                self.previous.token
            )));
        };
        let can_assign = precedence <= Precedence::Assign;
        self.run_prefix(prefix, can_assign)?;

        while precedence <= rules::rule(&self.current.token).precedence {
            self.advance()?;
            if let Some(infix) = rules::rule(&self.previous.token).infix {
                self.run_infix(infix, can_assign)?;
            }
        }

        if can_assign && (self.check(&Token::Assign) || self.current.token.compound_operator().is_some()) {
            return Err(self.error_current("Invalid assignment target."));
        }
        Ok(())
    }

    fn run_prefix(&mut self, prefix: Prefix, can_assign: bool) -> CompileResult {
        match prefix {
            Prefix::Group => self.group(),
            Prefix::Array => self.array(),
            Prefix::Table => self.table(),
            Prefix::Unary => self.unary(),
            Prefix::Literal => self.literal(),
            Prefix::String => self.string(),
            Prefix::Variable => self.variable(can_assign),
            Prefix::Function => self.function("<function>".to_string()),
            Prefix::Builtin => self.builtin_call(),
        }
    }

    fn run_infix(&mut self, infix: Infix, can_assign: bool) -> CompileResult {
        match infix {
            Infix::Binary => self.binary(),
            Infix::And => self.and(),
            Infix::Or => self.or(),
            Infix::Call => self.call(),
            Infix::Dot => self.dot(can_assign),
            Infix::Square => self.square(can_assign),
        }
    }

    /// Consumes a compound assignment operator, returning the op it applies.
    fn compound_assignment(&mut self, can_assign: bool) -> CompileResult<Option<Op>> {
        if !can_assign {
            return Ok(None);
        }
        let op = self
            .current
            .token
            .compound_operator()
            .and_then(|token| rules::binary_op(&token));
        if op.is_some() {
            self.advance()?;
        }
        Ok(op)
    }

    fn group(&mut self) -> CompileResult {
        self.expression()?;
        self.consume(Token::RightParen, "Expected `)` after expression")
    }

    fn literal(&mut self) -> CompileResult {
        let op = match self.previous.token {
            Token::Integer(n) => Op::Int(n),
            Token::Float(n) => Op::Float(n),
            Token::True => Op::True,
            Token::False => Op::False,
            _ => Op::None,
        };
        self.emit(op);
        Ok(())
    }

    /// String literal, including interpolated segments.
    fn string(&mut self) -> CompileResult {
        let (text, status) = match &self.previous.token {
            Token::String(text, status) => (text.clone(), *status),
            other => return Err(self.error_previous(format!("Expected string but found `{}`.", other))),
        };
        let k = self.make_constant(Value::from(text));
        self.emit(Op::Constant(k));
        if status != StringStatus::Begin {
            return Ok(());
        }

        loop {
            self.expression()?;
            self.emit(Op::Add);

            let (text, status) = match &self.current.token {
                Token::String(text, status @ (StringStatus::Continue | StringStatus::Close)) => {
                    (text.clone(), *status)
                }
                _ => return Err(self.error_current("Expected `}` to close string interpolation.")),
            };
            self.advance()?;
            if !text.is_empty() {
                let k = self.make_constant(Value::from(text));
                self.emit(Op::Constant(k));
                self.emit(Op::Add);
            }
            if status == StringStatus::Close {
                return Ok(());
            }
        }
    }

    fn array(&mut self) -> CompileResult {
        let mut count = 0;
        while !self.check(&Token::RightSquare) {
            self.expression()?;
            count += 1;
            if !self.matches(&Token::Comma)? {
                break;
            }
        }
        self.consume(Token::RightSquare, "Expected `]` to close array")?;
        self.emit(Op::NewArray(count));
        Ok(())
    }

    fn table(&mut self) -> CompileResult {
        let mut count = 0;
        while !self.check(&Token::RightCurly) {
            let key = match &self.current.token {
                Token::Ident(name) | Token::String(name, StringStatus::None) => name.clone(),
                other => {
                    return Err(self.error_current(format!("Expected table key but found `{}`.", other)));
                }
            };
            self.advance()?;
            let k = self.make_constant(Value::from(key));
            self.emit(Op::Constant(k));
            self.consume(Token::Colon, "Expected `:` after table key")?;
            self.expression()?;
            count += 1;
            if !self.matches(&Token::Comma)? {
                break;
            }
        }
        self.consume(Token::RightCurly, "Expected `}` to close table")?;
        self.emit(Op::NewTable(count));
        Ok(())
    }

    fn unary(&mut self) -> CompileResult {
        let operator = self.previous.token.clone();
        self.compile_with_precedence(Precedence::Unary)?;
        let op = match operator {
            Token::Minus => Op::Negate,
            Token::BitNot => Op::BitNot,
            _ => Op::Not,
        };
        self.emit(op);
        Ok(())
    }

    fn variable(&mut self, can_assign: bool) -> CompileResult {
        let name = match &self.previous.token {
            Token::Ident(name) => name.clone(),
            other => return Err(self.error_previous(format!("Expected name but found `{}`.", other))),
        };
        self.named_variable(name, can_assign)
    }

    fn named_variable(&mut self, name: String, can_assign: bool) -> CompileResult {
        let (get, set) = match self.resolve_local(&name)? {
            Some(slot) => (Op::GetLocal(slot), Op::SetLocal(slot)),
            None => {
                let k = self.make_constant(Value::from(name));
                (Op::GetGlobal(k), Op::SetGlobal(k))
            }
        };

        if can_assign && self.matches(&Token::Assign)? {
            self.expression()?;
            self.emit(set);
        } else if let Some(operator) = self.compound_assignment(can_assign)? {
            self.emit(get);
            let mark = self.code_len();
            self.expression()?;
            let increment = match (set, operator, self.emitted_since(mark)) {
                (Op::SetLocal(slot), Op::Add, [Op::Int(n)]) => Some((slot, *n)),
                _ => None,
            };
            match increment {
                Some((slot, n)) => {
                    self.scope.function.code.truncate(mark - 1);
                    self.emit(Op::IncrementLocalAndSet(slot, n));
                }
                None => {
                    self.emit(operator);
                    self.emit(set);
                }
            }
        } else {
            self.emit(get);
        }
        Ok(())
    }

    fn builtin_call(&mut self) -> CompileResult {
        let token = self.previous.token.clone();
        let Some((op, arity)) = rules::builtin(&token) else {
            return Err(self.error_previous(format!("`{}` is not a builtin.", token)));
        };
        self.consume(Token::LeftParen, &format!("Expected `(` after `{}`", token))?;
        for i in 0..arity {
            if i > 0 {
                self.consume(Token::Comma, &format!("`{}` expects {} arguments", token, arity))?;
            }
            self.expression()?;
        }
        self.consume(Token::RightParen, &format!("Expected `)` after arguments to `{}`", token))?;
        self.emit(op);
        Ok(())
    }

    fn binary(&mut self) -> CompileResult {
        let operator = self.previous.token.clone();
        let precedence = rules::rule(&operator).precedence;
        self.compile_with_precedence(precedence.next())?;
        if let Some(op) = rules::binary_op(&operator) {
            self.emit(op);
        }
        Ok(())
    }

    fn and(&mut self) -> CompileResult {
        let jump = self.emit(Op::JumpIfFalse(0));
        self.emit(Op::Pop);
        self.compile_with_precedence(Precedence::And)?;
        self.patch_jump(jump);
        Ok(())
    }

    fn or(&mut self) -> CompileResult {
        let jump = self.emit(Op::JumpIfTrue(0));
        self.emit(Op::Pop);
        self.compile_with_precedence(Precedence::Or)?;
        self.patch_jump(jump);
        Ok(())
    }

    fn call(&mut self) -> CompileResult {
        let mut count = 0;
        while !self.check(&Token::RightParen) {
            self.expression()?;
            count += 1;
            if !self.matches(&Token::Comma)? {
                break;
            }
        }
        self.consume(Token::RightParen, "Expected `)` after function arguments")?;
        self.emit(Op::Call(count));
        Ok(())
    }

    fn dot(&mut self, can_assign: bool) -> CompileResult {
        let name = self.consume_ident("Expected property name after `.`")?;
        let k = self.make_constant(Value::from(name));
        if can_assign && self.matches(&Token::Assign)? {
            self.expression()?;
            self.emit(Op::SetProperty(k));
        } else if let Some(operator) = self.compound_assignment(can_assign)? {
            self.emit(Op::Duplicate);
            self.emit(Op::GetProperty(k));
            self.expression()?;
            self.emit(operator);
            self.emit(Op::SetProperty(k));
        } else {
            self.emit(Op::GetProperty(k));
        }
        Ok(())
    }

    /// `x[i]`, `x[i] = v` and the slice forms `x[a:b]`, `x[:b]`, `x[a:]`.
    fn square(&mut self, can_assign: bool) -> CompileResult {
        if self.matches(&Token::Colon)? {
            self.emit(Op::Int(0));
            return self.slice_end();
        }
        self.expression()?;
        if self.matches(&Token::Colon)? {
            return self.slice_end();
        }
        self.consume(Token::RightSquare, "Expected `]` after index")?;

        if can_assign && self.matches(&Token::Assign)? {
            self.expression()?;
            self.emit(Op::SetDynamic);
        } else if let Some(operator) = self.compound_assignment(can_assign)? {
            self.emit(Op::DuplicatePair);
            self.emit(Op::GetDynamic);
            self.expression()?;
            self.emit(operator);
            self.emit(Op::SetDynamic);
        } else {
            self.emit(Op::GetDynamic);
        }
        Ok(())
    }

    fn slice_end(&mut self) -> CompileResult {
        if self.check(&Token::RightSquare) {
            self.emit(Op::None);
        } else {
            self.expression()?;
        }
        self.consume(Token::RightSquare, "Expected `]` after slice")?;
        self.emit(Op::Slice);
        Ok(())
    }

    /// Compiles a parameter list and body, then pushes the function as a constant.
    fn function(&mut self, name: String) -> CompileResult {
        let function = Function::new(Some(name), self.script.clone());
        let outer = std::mem::replace(&mut self.scope, Scope::new(function, ScopeKind::Function));
        self.enclosing.push(outer);

        self.consume(Token::LeftParen, "Expected `(` before parameters")?;
        while !self.check(&Token::RightParen) {
            let param = self.consume_ident("Expected parameter name")?;
            self.declare_local(param)?;
            self.mark_initialized();
            self.scope.function.arity += 1;
            if !self.matches(&Token::Comma)? {
                break;
            }
        }
        self.consume(Token::RightParen, "Expected `)` after parameters")?;
        self.consume(Token::LeftCurly, "Expected `{` before function body")?;
        while !self.check(&Token::RightCurly) && !self.check(&Token::Eof) {
            self.declaration()?;
        }
        self.consume(Token::RightCurly, "Expected `}` after function body")?;
        self.emit(Op::None);
        self.emit(Op::Return);

        let Some(outer) = self.enclosing.pop() else {
            return Err(self.error_previous("Function ended outside of any scope."));
        };
        let inner = std::mem::replace(&mut self.scope, outer);
        debug!(
            "compiled function {} ({} parameters, {} instructions)",
            inner.function.display_name(),
            inner.function.arity,
            inner.function.code.len()
        );
        let k = self.make_constant(Value::Function(Rc::new(inner.function)));
        self.emit(Op::Constant(k));
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn declaration(&mut self) -> CompileResult {
        if self.matches(&Token::Let)? {
            self.let_declaration()?;
        } else if self.matches(&Token::Function)? {
            if matches!(self.current.token, Token::Ident(_)) {
                self.function_declaration()?;
            } else {
                self.function("<function>".to_string())?;
                self.emit(Op::Pop);
            }
        } else {
            self.statement()?;
        }
        self.matches(&Token::Semicolon)?;
        Ok(())
    }

    fn let_declaration(&mut self) -> CompileResult {
        let name = self.consume_ident("Expected variable name after `let`")?;
        if self.scope.depth == 0 {
            let k = self.make_constant(Value::from(name));
            self.consume(Token::Assign, "Expected `=` after variable name")?;
            self.expression()?;
            self.emit(Op::DefineGlobal(k));
        } else {
            self.declare_local(name)?;
            self.consume(Token::Assign, "Expected `=` after variable name")?;
            self.expression()?;
            self.mark_initialized();
        }
        Ok(())
    }

    fn function_declaration(&mut self) -> CompileResult {
        let name = self.consume_ident("Expected function name")?;
        if self.scope.depth == 0 {
            let k = self.make_constant(Value::from(name.clone()));
            self.function(name)?;
            self.emit(Op::DefineGlobal(k));
        } else {
            self.declare_local(name.clone())?;
            self.mark_initialized();
            self.function(name)?;
        }
        Ok(())
    }

    fn statement(&mut self) -> CompileResult {
        let token = self.current.token.clone();
        match token {
            Token::Echo | Token::Print | Token::Throw | Token::Use => {
                self.advance()?;
                self.expression()?;
                match token {
                    Token::Echo => {
                        self.emit(Op::Echo);
                    }
                    Token::Print => {
                        self.emit(Op::Print);
                    }
                    Token::Throw => {
                        self.emit(Op::Throw);
                    }
                    _ => {
                        self.emit(Op::Use);
                        self.emit(Op::Pop);
                    }
                }
                Ok(())
            }
            Token::If => {
                self.advance()?;
                self.if_statement()
            }
            Token::While => {
                self.advance()?;
                self.while_statement()
            }
            Token::For => {
                self.advance()?;
                self.for_statement()
            }
            Token::Try => {
                self.advance()?;
                self.try_statement()
            }
            Token::Return => {
                self.advance()?;
                self.return_statement()
            }
            Token::Break => {
                self.advance()?;
                self.break_statement()
            }
            Token::Continue => {
                self.advance()?;
                self.continue_statement()
            }
            _ => {
                self.expression()?;
                self.emit(Op::Pop);
                Ok(())
            }
        }
    }

    fn block(&mut self) -> CompileResult {
        self.consume(Token::LeftCurly, "Expected `{` to begin block")?;
        self.begin_scope();
        while !self.check(&Token::RightCurly) && !self.check(&Token::Eof) {
            self.declaration()?;
        }
        self.consume(Token::RightCurly, "Expected `}` to close block")?;
        self.end_scope();
        Ok(())
    }

    fn if_statement(&mut self) -> CompileResult {
        let depth = self.scope.depth;
        self.expression()?;
        let mut jump = self.emit(Op::JumpIfFalse(0));
        self.emit(Op::Pop);
        self.block()?;

        let exit = self.emit(Op::Jump(0));
        let mut ends = self.push_jump(exit, depth, None);
        self.patch_jump(jump);
        self.emit(Op::Pop);

        while self.matches(&Token::Elif)? {
            self.expression()?;
            jump = self.emit(Op::JumpIfFalse(0));
            self.emit(Op::Pop);
            self.block()?;
            let exit = self.emit(Op::Jump(0));
            ends = self.push_jump(exit, depth, ends);
            self.patch_jump(jump);
            self.emit(Op::Pop);
        }

        if self.matches(&Token::Else)? {
            self.block()?;
        }
        self.patch_chain(ends);
        Ok(())
    }

    fn while_statement(&mut self) -> CompileResult {
        let start = self.code_len();
        self.expression()?;
        let exit = self.emit(Op::JumpIfFalse(0));
        self.emit(Op::Pop);

        let index = self.begin_loop(start, None, false);
        self.block()?;
        self.emit_loop(start);

        self.patch_jump(exit);
        self.emit(Op::Pop);
        self.end_loop(index);
        Ok(())
    }

    fn for_statement(&mut self) -> CompileResult {
        self.begin_scope();
        if self.matches(&Token::Let)? {
            self.for_condition_loop()?;
        } else {
            self.for_in_loop()?;
        }
        self.end_scope();
        Ok(())
    }

    /// `for let i = 0; i < n; i += 1 { }`
    fn for_condition_loop(&mut self) -> CompileResult {
        self.let_declaration()?;
        self.consume(Token::Semicolon, "Expected `;` after loop initializer")?;

        let condition = self.code_len();
        self.expression()?;
        let exit = self.emit(Op::JumpIfFalse(0));
        self.emit(Op::Pop);
        self.consume(Token::Semicolon, "Expected `;` after loop condition")?;

        let body = self.emit(Op::Jump(0));
        let step = self.code_len();
        self.expression()?;
        self.emit(Op::Pop);
        self.emit_loop(condition);
        self.patch_jump(body);

        let index = self.begin_loop(condition, Some(step), true);
        self.block()?;
        self.emit_loop(step);

        self.patch_jump(exit);
        self.emit(Op::Pop);
        self.end_loop(index);
        Ok(())
    }

    /// `for v in xs { }`, `for k, v in xs { }`
    fn for_in_loop(&mut self) -> CompileResult {
        let first = self.consume_ident("Expected loop variable after `for`")?;
        let second = if self.matches(&Token::Comma)? {
            Some(self.consume_ident("Expected second loop variable after `,`")?)
        } else {
            None
        };
        self.consume(Token::In, "Expected `in` after loop variables")?;
        self.expression()?;

        let slot = self.add_hidden_local("<iterable>");
        self.add_hidden_local("<keys>");
        self.add_hidden_local("<index>");
        let mut vars = 0;
        for name in std::iter::once(first).chain(second) {
            self.declare_local(name)?;
            self.mark_initialized();
            vars += 1;
        }

        let setup = self.emit(Op::For { slot, vars, jump: 0 });
        let body = self.code_len();
        let index = self.begin_loop(body, None, true);
        self.block()?;

        if let Some(context) = self.loops.get(index).copied() {
            self.patch_chain(context.continues);
        }
        let offset = self.code_len() + 1 - body;
        self.emit(Op::ForLoop { slot, vars, jump: offset });

        self.patch_jump(setup);
        self.end_loop(index);
        Ok(())
    }

    fn try_statement(&mut self) -> CompileResult {
        let index = self.scope.function.excepts.len();
        self.scope.function.excepts.push(ExceptRange {
            start: self.code_len(),
            end: 0,
            stack: self.scope.locals.len(),
            next: self.scope.function.except,
        });
        self.scope.function.except = Some(index);

        self.block()?;
        let jump = self.emit(Op::Jump(0));
        self.consume(Token::Except, "Expected `except` after `try` block")?;

        let end = self.code_len();
        if let Some(range) = self.scope.function.excepts.get_mut(index) {
            range.end = end;
        }

        self.begin_scope();
        let name = if self.matches(&Token::LeftParen)? {
            let name = self.consume_ident("Expected exception variable")?;
            self.consume(Token::RightParen, "Expected `)` after exception variable")?;
            Some(name)
        } else if matches!(self.current.token, Token::Ident(_)) {
            Some(self.consume_ident("Expected exception variable")?)
        } else {
            None
        };
        match name {
            Some(name) => {
                self.declare_local(name)?;
                self.mark_initialized();
            }
            None => {
                self.emit(Op::Pop);
            }
        }
        self.block()?;
        self.end_scope();

        self.patch_jump(jump);
        Ok(())
    }

    fn return_statement(&mut self) -> CompileResult {
        if self.scope.kind == ScopeKind::Script {
            return Err(self.error_previous("Return Error: Outside of function."));
        }
        if self.check(&Token::RightCurly) || self.check(&Token::Semicolon) || self.check(&Token::Eof) {
            self.emit(Op::None);
        } else {
            self.expression()?;
        }
        self.emit(Op::Return);
        Ok(())
    }

    fn break_statement(&mut self) -> CompileResult {
        let Some(context) = self.scope.loop_head.and_then(|i| self.loops.get(i).copied()) else {
            return Err(self.error_previous("Break Error: Outside of loop."));
        };
        self.pop_locals_above(context.depth);
        let jump = self.emit(Op::Jump(0));
        self.scope.jump_head = self.push_jump(jump, context.depth, self.scope.jump_head);
        Ok(())
    }

    fn continue_statement(&mut self) -> CompileResult {
        let Some(index) = self.scope.loop_head else {
            return Err(self.error_previous("Continue Error: Outside of loop."));
        };
        let Some(context) = self.loops.get(index).copied() else {
            return Err(self.error_previous("Continue Error: Outside of loop."));
        };
        self.pop_locals_above(context.depth);
        match (context.is_for, context.step) {
            (true, Some(step)) => self.emit_loop(step),
            (true, None) => {
                let jump = self.emit(Op::Jump(0));
                let head = self.push_jump(jump, context.depth, context.continues);
                if let Some(context) = self.loops.get_mut(index) {
                    context.continues = head;
                }
            }
            (false, _) => self.emit_loop(context.start),
        }
        Ok(())
    }
}
