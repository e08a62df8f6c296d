//! Domain errors raised by the lexer, parser, and evaluator.

use std::fmt;
use thiserror::Error;

/// A single point of failure anywhere in the lexer, parser, or evaluator.
///
/// Every variant mirrors one of the exception classes of the original
/// implementation; the payload carries whatever that exception's
/// constructor took.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // -- Lexical / parse --
    #[error("Unknown token type '{token_type}' for token '{token}'")]
    UnknownTokenType { token: String, token_type: char },

    #[error("Unexpected token type '{token_type}'{where_} for token '{token}'")]
    UnexpectedTokenType {
        token: String,
        token_type: char,
        where_: WhereSuffix,
    },

    #[error("Missing {0} from expression")]
    ExpectedParenthesis(char),

    #[error("Too many/few forms in {0}")]
    TooManyOrFewForms(String),

    #[error("Invalid expression - {msg}{var}", var = .var.as_deref().map(|v| format!(" '{v}'")).unwrap_or_default())]
    InvalidExpression { msg: String, var: Option<String> },

    #[error("Incomplete expression: {0}")]
    IncompleteExpression(String),

    #[error("Unexpected expression {actual}, expecting {expected}")]
    UnexpectedExpression { expected: String, actual: String },

    // -- Semantic --
    #[error("Unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("Duplicate variable/function definition - '{0}'")]
    DuplicateDef(String),

    #[error("Unknown member '{type_name}:{member}'")]
    UnknownMember { type_name: String, member: String },

    #[error("Unknown file '{0}'")]
    UnknownFile(String),

    #[error("Module error '{name}': {msg}")]
    ModuleError { name: String, msg: String },

    // -- Type / runtime --
    #[error("Invalid operand type, expected={expected} actual={actual}")]
    InvalidOperandType { expected: String, actual: String },

    #[error("Invalid expression type, expected={expected} actual={actual}")]
    InvalidExpressionType { expected: String, actual: String },

    #[error("Incompatible types, type1={type1} type2={type2}")]
    IncompatibleTypes { type1: String, type2: String },

    #[error("Invalid astype from '{from}' to '{to}'")]
    InvalidAsType { from: String, to: String },

    #[error("Invalid arguments list - params size({params_size}) is not equal to args size({args_size})")]
    InvalidArgsSize { params_size: usize, args_size: usize },

    #[error("Division by zero")]
    DivByZero,

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("File IO error: {0}")]
    FileIOError(String),

    #[error("Null Environment")]
    NullEnvironment,

    #[error("{msg}{var}", var = .var.as_deref().map(|v| format!(" '{v}'")).unwrap_or_default())]
    General { msg: String, var: Option<String> },

    /// An error that originated while parsing or evaluating a file,
    /// annotated with the file name and line number it occurred on.
    #[error("{filename}:{line}: {source}")]
    InFile {
        filename: String,
        line: u32,
        #[source]
        source: Box<Error>,
    },
}

/// Suffix used by [`Error::UnexpectedTokenType`], e.g. `" in paramList"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WhereSuffix(pub Option<String>);

impl fmt::Display for WhereSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(w) if !w.is_empty() => write!(f, " in {w}"),
            _ => Ok(()),
        }
    }
}

impl Error {
    pub fn invalid_expression(msg: impl Into<String>) -> Self {
        Error::InvalidExpression { msg: msg.into(), var: None }
    }

    pub fn invalid_expression_with(msg: impl Into<String>, var: impl Into<String>) -> Self {
        Error::InvalidExpression { msg: msg.into(), var: Some(var.into()) }
    }

    pub fn unexpected_token_type(token: impl Into<String>, token_type: char) -> Self {
        Error::UnexpectedTokenType { token: token.into(), token_type, where_: WhereSuffix(None) }
    }

    pub fn unexpected_token_type_in(token: impl Into<String>, token_type: char, where_: impl Into<String>) -> Self {
        Error::UnexpectedTokenType { token: token.into(), token_type, where_: WhereSuffix(Some(where_.into())) }
    }

    /// Attaches file/line context to this error, as the module loader does
    /// when a parse or eval error escapes a file-backed read.
    pub fn in_file(self, filename: impl Into<String>, line: u32) -> Self {
        Error::InFile { filename: filename.into(), line, source: Box::new(self) }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An evaluation outcome that may also be a `break` unwinding to the
/// nearest enclosing loop. Modeled as a signal distinct from [`Error`] so
/// it can never be mistaken for (or silently swallowed as) a real domain
/// error; only [`crate::code_node::CodeNode::Loop`]'s evaluator matches it
/// out.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Error(Error),
    Break,
}

impl From<Error> for Signal {
    fn from(e: Error) -> Self {
        Signal::Error(e)
    }
}

/// Result type threaded through the evaluator; `?` on an [`Error`]-returning
/// expression promotes it to [`Signal::Error`] automatically.
pub type EvalResult<T> = std::result::Result<T, Signal>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_original_format() {
        let e = Error::InvalidOperandType { expected: "Integer".into(), actual: "String".into() };
        assert_eq!(e.to_string(), "Invalid operand type, expected=Integer actual=String");
    }

    #[test]
    fn in_file_wraps_and_displays_context() {
        let e = Error::DivByZero.in_file("foo.ish", 12);
        assert_eq!(e.to_string(), "foo.ish:12: Division by zero");
    }

    #[test]
    fn signal_from_error_converts() {
        let s: Signal = Error::DivByZero.into();
        assert_matches::assert_matches!(s, Signal::Error(Error::DivByZero));
    }
}
