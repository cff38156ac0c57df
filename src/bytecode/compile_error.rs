use crate::frontend::lexer::{LexError, Span};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// The lexer rejected a character or literal.
    #[error("{0}")]
    Lex(#[from] LexError),

    /// A syntax or scoping violation found by the compiler.
    #[error("{message}\n\n{context}\nat {script}:{}", .row + 1)]
    Syntax {
        message: String,
        row: usize,
        column: usize,
        script: String,
        /// The offending source line with a caret under the column.
        context: String,
    },
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, span: Span, script: Option<&str>, source: &str) -> Self {
        CompileError::Syntax {
            message: message.into(),
            row: span.row,
            column: span.column,
            script: script.unwrap_or("<script>").to_string(),
            context: source_context(source, span),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Lex(e) => &e.message,
            CompileError::Syntax { message, .. } => message,
        }
    }

    /// 0-based row and column of the error.
    pub fn position(&self) -> (usize, usize) {
        match self {
            CompileError::Lex(e) => (e.row, e.column),
            CompileError::Syntax { row, column, .. } => (*row, *column),
        }
    }
}

fn source_context(source: &str, span: Span) -> String {
    match source.lines().nth(span.row) {
        Some(line) => format!("{}\n{}^\n", line, " ".repeat(span.column)),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let span = Span { row: 1, column: 4, start: 0, end: 0 };
        let err = CompileError::syntax("Expected expression.", span, Some("main.hm"), "let a = 1\necho )\n");
        assert_eq!(err.to_string(), "Expected expression.\n\necho )\n    ^\n\nat main.hm:2");
        assert_eq!(err.position(), (1, 4));
    }

    #[test]
    fn test_lex_error_is_wrapped() {
        let err: CompileError = LexError {
            message: "Unknown character: `@`".to_string(),
            row: 0,
            column: 3,
        }
        .into();
        assert_eq!(err.message(), "Unknown character: `@`");
        assert_eq!(err.to_string(), "1:4: Unknown character: `@`");
    }
}
