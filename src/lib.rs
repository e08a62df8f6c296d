//! Ishlang: a small dynamically-typed, S-expression-based programming
//! language. This crate is the core — lexer, parser, tree-walking
//! evaluator, value model, lexical environment, and module loader. The
//! REPL, CLI argument parsing, and test-file tooling are thin shells built
//! on top of it (see `src/bin/ishlang.rs`).
//!
//! The core's external surface is small: [`Parser::read_multi`] /
//! [`Parser::read_file`] turn source text into [`code_node::CodeNode`]s one
//! top-level form at a time, invoking a caller-supplied callback with each;
//! [`code_node::CodeNode::eval`] walks a node against an [`environment::Env`]
//! to produce a [`value::Value`].

pub mod code_node;
pub mod environment;
pub mod error;
pub mod file_io;
pub mod hashtable;
pub mod instance;
pub mod integer_range;
pub mod lambda;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod sequence;
pub mod struct_type;
pub mod util;
pub mod value;
pub mod value_pair;

pub use code_node::CodeNode;
pub use environment::Env;
pub use error::{Error, EvalResult, Result, Signal};
pub use parser::Parser;
pub use value::Value;

/// Parses and evaluates every top-level form in `source` against `env`,
/// returning the last form's value (or [`Value::Null`] if `source` is
/// empty). Convenience wrapper over [`Parser::read_multi`] +
/// [`CodeNode::eval`] for callers that don't need incremental control, such
/// as the REPL and the test-file driver.
pub fn eval_source(source: &str, env: &Env) -> Result<Value> {
    let mut parser = Parser::new();
    let mut result = Value::Null;
    parser.read_multi(source, &mut |code| {
        result = code.eval(env).map_err(|sig| match sig {
            Signal::Error(e) => e,
            Signal::Break => Error::invalid_expression("break outside loop"),
        })?;
        Ok(())
    })?;
    if parser.has_incomplete_expr() {
        parser.clear_incomplete_expr();
        return Err(Error::IncompleteExpression(source.to_string()));
    }
    Ok(result)
}

/// Parses and evaluates an entire `.ish` file against `env`, returning the
/// last top-level form's value.
pub fn eval_file(path: &str, env: &Env) -> Result<Value> {
    let mut parser = Parser::new();
    let mut result = Value::Null;
    parser.read_file(path, &mut |code| {
        result = code.eval(env).map_err(|sig| match sig {
            Signal::Error(e) => e,
            Signal::Break => Error::invalid_expression("break outside loop"),
        })?;
        Ok(())
    })?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_source_returns_last_form() {
        let env = Env::new();
        let v = eval_source("(+ 1 2) (+ 3 4)", &env).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn eval_source_empty_is_null() {
        let env = Env::new();
        assert_eq!(eval_source("", &env).unwrap(), Value::Null);
    }

    #[test]
    fn eval_source_incomplete_form_errors() {
        let env = Env::new();
        assert_matches::assert_matches!(eval_source("(+ 1 2", &env), Err(Error::IncompleteExpression(_)));
    }
}
