//! Recursive-descent parser: turns a token stream into [`CodeNode`]s.
//!
//! Mirrors the original's structure closely: a single dispatch point keyed
//! on the head symbol of each parenthesized form, with small helper readers
//! for the repeated shapes (an expr list, a fixed-arity expr list, a
//! name/expr pair list, a name-and-`as` list).

use std::cell::RefCell;

use crate::code_node::{ApplicationCallee, ArithOp, CharCheck, CharTransform, CodeNode, CompOp, LogicOp};
use crate::error::{Error, Result};
use crate::lexer::{Lexer, Token, TokenType};
use crate::value::{Type, Value};

/// A callback invoked once per top-level form read from a multi-expression
/// chunk of source, used by [`Parser::read_multi`] and [`Parser::read_file`].
pub type ReadCallback<'a> = dyn FnMut(CodeNode) -> Result<()> + 'a;

#[derive(Debug, Default)]
pub struct Parser {
    lexer: Lexer,
}

impl Parser {
    pub fn new() -> Self {
        Parser { lexer: Lexer::new() }
    }

    /// Parses a single expression out of `expr`, returning `None` if it was
    /// empty or just a stray closing paren.
    pub fn read(&mut self, expr: &str) -> Result<Option<CodeNode>> {
        self.lexer.read(expr)?;
        self.read_expr()
    }

    /// Parses a standalone literal read back from input (e.g. by the `read`
    /// builtin), without going through the full expression grammar.
    pub fn read_literal(expr: &str) -> Result<Value> {
        if expr.is_empty() {
            return Ok(Value::str(expr));
        }
        match crate::lexer::classify(expr) {
            Some(TokenType::Char) => Ok(Value::Char(expr.as_bytes()[1])),
            Some(TokenType::String) => Ok(Value::str(&expr[1..expr.len() - 1])),
            Some(TokenType::Int) => Ok(Value::Int(expr.parse().expect("lexer validated int literal"))),
            Some(TokenType::Real) => Ok(Value::Real(expr.parse().expect("lexer validated real literal"))),
            Some(TokenType::Bool) => Ok(Value::Bool(expr == "true")),
            Some(TokenType::Null) => Ok(Value::Null),
            _ => Ok(Value::str(expr)),
        }
    }

    /// Reads every complete top-level form out of `expr`, invoking
    /// `callback` for each. Leaves any trailing incomplete form buffered for
    /// a subsequent call (used by the REPL to accumulate multi-line input).
    pub fn read_multi(&mut self, expr: &str, callback: &mut ReadCallback) -> Result<()> {
        self.lexer.read(expr)?;
        while !self.lexer.is_empty() {
            if !self.have_s_expression() {
                return Ok(());
            }
            if let Some(code) = self.read_expr()? {
                callback(code)?;
            }
        }
        Ok(())
    }

    /// Reads an entire file, line by line, wrapping any parse or evaluation
    /// error raised by `callback` with the file name and line number it
    /// occurred on.
    pub fn read_file(&mut self, path: &str, callback: &mut ReadCallback) -> Result<()> {
        use std::io::BufRead as _;

        let file = std::fs::File::open(path).map_err(|_| Error::UnknownFile(path.to_string()))?;
        let reader = std::io::BufReader::new(file);
        let mut line_no: u32 = 0;
        for line in reader.lines() {
            line_no += 1;
            let line = line.map_err(|e| Error::FileIOError(e.to_string()))?;
            self.read_multi(&line, callback).map_err(|e| e.in_file(path, line_no))?;
        }

        if self.has_incomplete_expr() {
            self.clear_incomplete_expr();
            return Err(Error::IncompleteExpression(format!("Incomplete code at end of file {path}")).in_file(path, line_no));
        }
        Ok(())
    }

    pub fn has_incomplete_expr(&self) -> bool {
        !self.lexer.is_empty()
    }

    pub fn clear_incomplete_expr(&mut self) {
        self.lexer.clear();
    }

    /// Non-destructively scans the buffered tokens for a balanced run of
    /// parens, so a caller accumulating multi-line input knows whether it
    /// has a complete form yet.
    fn have_s_expression(&self) -> bool {
        let mut depth: i64 = 0;
        let mut saw_any = false;
        for tok in self.lexer.iter() {
            saw_any = true;
            match tok.token_type {
                TokenType::LeftP => depth += 1,
                TokenType::RightP => {
                    if depth > 0 {
                        depth -= 1;
                    }
                }
                _ => {}
            }
            if depth == 0 {
                return true;
            }
        }
        !saw_any
    }

    fn read_expr(&mut self) -> Result<Option<CodeNode>> {
        while !self.lexer.is_empty() {
            if !self.have_s_expression() {
                return Ok(None);
            }
            let token = self.lexer.next()?;
            if token.text.is_empty() {
                continue;
            }
            return Ok(Some(match token.token_type {
                TokenType::LeftP => self.read_app()?,
                TokenType::RightP => return Ok(None),
                TokenType::Char | TokenType::String | TokenType::Int | TokenType::Real | TokenType::Bool | TokenType::Null => {
                    make_literal(token.token_type, &token.text)?
                }
                TokenType::Symbol => CodeNode::Variable(token.text),
            }));
        }
        Ok(Some(CodeNode::Literal(Value::Null)))
    }

    fn require_expr(&mut self) -> Result<CodeNode> {
        self.read_expr()?.ok_or_else(|| Error::invalid_expression("expected an expression"))
    }

    /// Dispatches on the head symbol of a parenthesized form. The leading
    /// `(` has already been consumed by the caller.
    fn read_app(&mut self) -> Result<CodeNode> {
        if self.lexer.is_empty() {
            return Ok(CodeNode::Literal(Value::Null));
        }
        let token = self.lexer.next()?;
        if token.text.is_empty() {
            return Ok(CodeNode::Literal(Value::Null));
        }

        if token.token_type == TokenType::LeftP {
            // A form whose head is itself parenthesized, e.g.
            // `((lambda (x) x) 5)` or `((pick-fn) 5)` - parse the inner
            // expression as the callee and whatever follows as its args.
            let callee = self.read_app()?;
            let args = self.read_expr_list()?;
            return Ok(CodeNode::Application { callee: ApplicationCallee::Direct(Box::new(callee), RefCell::new(None)), args });
        }

        match token.text.as_str() {
            "import" => self.parse_import(),
            "from" => self.parse_from_import(),

            "var" => self.parse_define(),
            "=" => self.parse_assign(),
            "+=" => self.parse_compound_assign(ArithOp::Add),
            "-=" => self.parse_compound_assign(ArithOp::Sub),
            "*=" => self.parse_compound_assign(ArithOp::Mul),
            "/=" => self.parse_compound_assign(ArithOp::Div),
            "%=" => self.parse_compound_assign(ArithOp::Mod),
            "^=" => self.parse_compound_assign(ArithOp::Pow),
            "?" => self.parse_exists(),
            "clone" => Ok(CodeNode::CloneOf(Box::new(self.read_and_check_expr_list("clone", 1)?.remove(0)))),

            "+" => self.parse_arith(ArithOp::Add),
            "-" => self.parse_arith(ArithOp::Sub),
            "*" => self.parse_arith(ArithOp::Mul),
            "/" => self.parse_arith(ArithOp::Div),
            "%" => self.parse_arith(ArithOp::Mod),
            "^" => self.parse_arith(ArithOp::Pow),

            "==" => self.parse_comp(CompOp::Eq, "=="),
            "!=" => self.parse_comp(CompOp::Ne, "!="),
            "<" => self.parse_comp(CompOp::Lt, "<"),
            // The original dispatch table names this case "<" too (a
            // copy-paste slip carried over rather than silently fixed).
            ">" => self.parse_comp(CompOp::Gt, "<"),
            "<=" => self.parse_comp(CompOp::Le, "<="),
            ">=" => self.parse_comp(CompOp::Ge, ">="),

            "and" => self.parse_logic(LogicOp::And),
            "or" => self.parse_logic(LogicOp::Or),
            "not" => Ok(CodeNode::Not(Box::new(self.read_and_check_expr_list("not", 1)?.remove(0)))),
            "neg" => Ok(CodeNode::Negative(Box::new(self.read_and_check_expr_list("neg", 1)?.remove(0)))),

            "progn" => Ok(CodeNode::ProgN(self.read_expr_list()?)),
            "block" => Ok(CodeNode::Block(self.read_expr_list()?)),
            "if" => self.parse_if(),
            "when" => {
                let mut e = self.read_and_check_expr_list("when", 2)?;
                let then_branch = Box::new(e.remove(1));
                Ok(CodeNode::If { pred: Box::new(e.remove(0)), then_branch, else_branch: None })
            }
            "unless" => {
                let mut e = self.read_and_check_expr_list("unless", 2)?;
                let then_branch = Box::new(e.remove(1));
                let pred = Box::new(CodeNode::Not(Box::new(e.remove(0))));
                Ok(CodeNode::If { pred, then_branch, else_branch: None })
            }
            "cond" => Ok(CodeNode::Cond(self.read_expr_pairs()?)),
            "break" => {
                self.ignore_right_p()?;
                Ok(CodeNode::Break)
            }
            "loop" => self.parse_loop(),
            "foreach" => {
                let var = self.read_name()?;
                let mut e = self.read_and_check_expr_list("foreach", 2)?;
                let body = Box::new(e.remove(1));
                Ok(CodeNode::Foreach { var, iterable: Box::new(e.remove(0)), body })
            }

            "lambda" => self.parse_lambda(),
            "defun" => self.parse_defun(),
            "apply" => {
                let mut e = self.read_and_check_expr_list("apply", 2)?;
                let closure = Box::new(e.remove(1));
                Ok(CodeNode::GenericApply { obj: Box::new(e.remove(0)), closure })
            }

            "istypeof" => self.parse_istypeof(),
            "typename" => Ok(CodeNode::TypeName(Box::new(self.read_and_check_expr_list("typename", 1)?.remove(0)))),
            "astype" => self.parse_astype(),
            "assert" => self.parse_assert(),

            "print" => Ok(CodeNode::Print { newline: false, args: self.read_and_check_range_expr_list("print", 1, None)? }),
            "println" => Ok(CodeNode::Print { newline: true, args: self.read_and_check_range_expr_list("println", 1, None)? }),
            "read" => {
                self.ignore_right_p()?;
                Ok(CodeNode::Read)
            }

            "struct" => self.parse_struct(),
            "isstructname" => self.parse_isstructname(),
            "structname" => Ok(CodeNode::StructName(Box::new(self.read_and_check_expr_list("structname", 1)?.remove(0)))),
            "makeinstance" => self.parse_makeinstance(),
            "isinstanceof" => self.parse_isinstanceof(),
            "memget" => self.parse_memget(),
            "memset" => self.parse_memset(),

            "strlen" => Ok(CodeNode::StringLen(Box::new(self.read_and_check_expr_list("strlen", 1)?.remove(0)))),
            "strget" => {
                let mut e = self.read_and_check_expr_list("strget", 2)?;
                let pos = Box::new(e.remove(1));
                Ok(CodeNode::StringGet { s: Box::new(e.remove(0)), pos })
            }
            "strset" => {
                let mut e = self.read_and_check_expr_list("strset", 3)?;
                let (value, pos) = (Box::new(e.remove(2)), Box::new(e.remove(1)));
                Ok(CodeNode::StringSet { s: Box::new(e.remove(0)), pos, value })
            }
            "strcat" => {
                let mut e = self.read_and_check_expr_list("strcat", 2)?;
                let other = Box::new(e.remove(1));
                Ok(CodeNode::StringCat { s: Box::new(e.remove(0)), other })
            }
            "substr" => {
                let mut e = self.read_and_check_range_expr_list("substr", 2, Some(3))?;
                let len = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
                let pos = Box::new(e.remove(1));
                Ok(CodeNode::SubString { s: Box::new(e.remove(0)), pos, len })
            }
            "strfind" => {
                let mut e = self.read_and_check_range_expr_list("strfind", 2, Some(3))?;
                let pos = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
                let target = Box::new(e.remove(1));
                Ok(CodeNode::StringFind { s: Box::new(e.remove(0)), target, pos })
            }
            "strcount" => {
                let mut e = self.read_and_check_expr_list("strcount", 2)?;
                let target = Box::new(e.remove(1));
                Ok(CodeNode::StringCount { s: Box::new(e.remove(0)), target })
            }
            "strcmp" => {
                let mut e = self.read_and_check_expr_list("strcmp", 2)?;
                let rhs = Box::new(e.remove(1));
                Ok(CodeNode::StringCompare { lhs: Box::new(e.remove(0)), rhs })
            }
            "strsort" => {
                let mut e = self.read_and_check_range_expr_list("strsort", 1, Some(2))?;
                let desc = if e.len() == 2 { Some(Box::new(e.remove(1))) } else { None };
                Ok(CodeNode::StringSort { s: Box::new(e.remove(0)), desc })
            }
            "strrev" => Ok(CodeNode::StringReverse(Box::new(self.read_and_check_expr_list("strrev", 1)?.remove(0)))),
            "strsplit" => {
                let mut e = self.read_and_check_expr_list("strsplit", 2)?;
                let delim = Box::new(e.remove(1));
                Ok(CodeNode::StringSplit { s: Box::new(e.remove(0)), delim })
            }
            "isupper" => self.parse_char_check(CharCheck::Upper, "isupper"),
            "islower" => self.parse_char_check(CharCheck::Lower, "islower"),
            "isalpha" => self.parse_char_check(CharCheck::Alpha, "isalpha"),
            "isnumer" => self.parse_char_check(CharCheck::Digit, "isnumer"),
            "isalnum" => self.parse_char_check(CharCheck::Alnum, "isalnum"),
            "ispunct" => self.parse_char_check(CharCheck::Punct, "ispunct"),
            "isspace" => self.parse_char_check(CharCheck::Space, "isspace"),
            "toupper" => self.parse_char_transform(CharTransform::Upper, "toupper"),
            "tolower" => self.parse_char_transform(CharTransform::Lower, "tolower"),

            "array" => Ok(CodeNode::MakeArray(self.read_expr_list()?)),
            "arraysv" => self.parse_arraysv(),
            "arraysg" => {
                let mut e = self.read_and_check_expr_list("arraysg", 2)?;
                let gen = Box::new(e.remove(1));
                Ok(CodeNode::MakeArrayGenerated { size: Box::new(e.remove(0)), gen })
            }
            "arrlen" => Ok(CodeNode::ArrayLen(Box::new(self.read_and_check_expr_list("arrlen", 1)?.remove(0)))),
            "arrget" => {
                let mut e = self.read_and_check_expr_list("arrget", 2)?;
                let pos = Box::new(e.remove(1));
                Ok(CodeNode::ArrayGet { arr: Box::new(e.remove(0)), pos })
            }
            "arrset" => {
                let mut e = self.read_and_check_expr_list("arrset", 3)?;
                let (value, pos) = (Box::new(e.remove(2)), Box::new(e.remove(1)));
                Ok(CodeNode::ArraySet { arr: Box::new(e.remove(0)), pos, value })
            }
            "arrpush" => {
                let mut e = self.read_and_check_expr_list("arrpush", 2)?;
                let value = Box::new(e.remove(1));
                Ok(CodeNode::ArrayPush { arr: Box::new(e.remove(0)), value })
            }
            "arrpop" => Ok(CodeNode::ArrayPop(Box::new(self.read_and_check_expr_list("arrpop", 1)?.remove(0)))),
            "arrfind" => {
                let mut e = self.read_and_check_range_expr_list("arrfind", 2, Some(3))?;
                let pos = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
                let value = Box::new(e.remove(1));
                Ok(CodeNode::ArrayFind { arr: Box::new(e.remove(0)), value, pos })
            }
            "arrcount" => {
                let mut e = self.read_and_check_expr_list("arrcount", 2)?;
                let value = Box::new(e.remove(1));
                Ok(CodeNode::ArrayCount { arr: Box::new(e.remove(0)), value })
            }
            "arrsort" => {
                let mut e = self.read_and_check_range_expr_list("arrsort", 1, Some(2))?;
                let desc = if e.len() == 2 { Some(Box::new(e.remove(1))) } else { None };
                Ok(CodeNode::ArraySort { arr: Box::new(e.remove(0)), desc })
            }
            "arrrev" => Ok(CodeNode::ArrayReverse(Box::new(self.read_and_check_expr_list("arrrev", 1)?.remove(0)))),
            "arrclr" => Ok(CodeNode::ArrayClear(Box::new(self.read_and_check_expr_list("arrclr", 1)?.remove(0)))),
            "arrins" => {
                let mut e = self.read_and_check_expr_list("arrins", 3)?;
                let (value, pos) = (Box::new(e.remove(2)), Box::new(e.remove(1)));
                Ok(CodeNode::ArrayInsert { arr: Box::new(e.remove(0)), pos, value })
            }
            "arrrem" => {
                let mut e = self.read_and_check_expr_list("arrrem", 2)?;
                let pos = Box::new(e.remove(1));
                Ok(CodeNode::ArrayRemove { arr: Box::new(e.remove(0)), pos })
            }

            "rand" => {
                let mut e = self.read_and_check_range_expr_list("rand", 0, Some(1))?;
                Ok(CodeNode::Random(if e.is_empty() { None } else { Some(Box::new(e.remove(0))) }))
            }
            "hash" => Ok(CodeNode::HashOf(Box::new(self.read_and_check_expr_list("hash", 1)?.remove(0)))),

            "hashmap" => Ok(CodeNode::MakeHashMap(self.read_expr_list()?)),
            "hmlen" => Ok(CodeNode::HashMapLen(Box::new(self.read_and_check_expr_list("hmlen", 1)?.remove(0)))),
            "hmhas" => {
                let mut e = self.read_and_check_expr_list("hmhas", 2)?;
                let key = Box::new(e.remove(1));
                Ok(CodeNode::HashMapContains { h: Box::new(e.remove(0)), key })
            }
            "hmget" => {
                let mut e = self.read_and_check_range_expr_list("hmget", 2, Some(3))?;
                let default = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
                let key = Box::new(e.remove(1));
                Ok(CodeNode::HashMapGet { h: Box::new(e.remove(0)), key, default })
            }
            "hmset" => {
                let mut e = self.read_and_check_expr_list("hmset", 3)?;
                let (value, key) = (Box::new(e.remove(2)), Box::new(e.remove(1)));
                Ok(CodeNode::HashMapSet { h: Box::new(e.remove(0)), key, value })
            }
            "hmrem" => {
                let mut e = self.read_and_check_expr_list("hmrem", 2)?;
                let key = Box::new(e.remove(1));
                Ok(CodeNode::HashMapRemove { h: Box::new(e.remove(0)), key })
            }
            "hmclr" => Ok(CodeNode::HashMapClear(Box::new(self.read_and_check_expr_list("hmclr", 1)?.remove(0)))),
            "hmfind" => {
                let mut e = self.read_and_check_expr_list("hmfind", 2)?;
                let value = Box::new(e.remove(1));
                Ok(CodeNode::HashMapFind { h: Box::new(e.remove(0)), value })
            }
            "hmcount" => {
                let mut e = self.read_and_check_expr_list("hmcount", 2)?;
                let value = Box::new(e.remove(1));
                Ok(CodeNode::HashMapCount { h: Box::new(e.remove(0)), value })
            }
            "hmkeys" => Ok(CodeNode::HashMapKeys(Box::new(self.read_and_check_expr_list("hmkeys", 1)?.remove(0)))),
            "hmvals" => Ok(CodeNode::HashMapValues(Box::new(self.read_and_check_expr_list("hmvals", 1)?.remove(0)))),
            "hmitems" => Ok(CodeNode::HashMapItems(Box::new(self.read_and_check_expr_list("hmitems", 1)?.remove(0)))),

            "pair" => {
                let mut e = self.read_and_check_expr_list("pair", 2)?;
                let second = Box::new(e.remove(1));
                Ok(CodeNode::MakePair { first: Box::new(e.remove(0)), second })
            }
            "first" => Ok(CodeNode::PairFirst(Box::new(self.read_and_check_expr_list("first", 1)?.remove(0)))),
            "second" => Ok(CodeNode::PairSecond(Box::new(self.read_and_check_expr_list("second", 1)?.remove(0)))),

            "range" => self.parse_range(),
            "rngbegin" => Ok(CodeNode::RangeBegin(Box::new(self.read_and_check_expr_list("rngbegin", 1)?.remove(0)))),
            "rngend" => Ok(CodeNode::RangeEnd(Box::new(self.read_and_check_expr_list("rngend", 1)?.remove(0)))),
            "rngstep" => Ok(CodeNode::RangeStep(Box::new(self.read_and_check_expr_list("rngstep", 1)?.remove(0)))),
            "rnglen" => Ok(CodeNode::RangeLen(Box::new(self.read_and_check_expr_list("rnglen", 1)?.remove(0)))),
            "expand" => Ok(CodeNode::Expand(Box::new(self.read_and_check_expr_list("expand", 1)?.remove(0)))),

            "len" => Ok(CodeNode::GenericLen(Box::new(self.read_and_check_expr_list("len", 1)?.remove(0)))),
            "empty" => Ok(CodeNode::GenericEmpty(Box::new(self.read_and_check_expr_list("empty", 1)?.remove(0)))),
            "get" => {
                let mut e = self.read_and_check_range_expr_list("get", 2, Some(3))?;
                let default = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
                let key = Box::new(e.remove(1));
                Ok(CodeNode::GenericGet { obj: Box::new(e.remove(0)), key, default })
            }
            "set" => {
                let mut e = self.read_and_check_expr_list("set", 3)?;
                let (value, key) = (Box::new(e.remove(2)), Box::new(e.remove(1)));
                Ok(CodeNode::GenericSet { obj: Box::new(e.remove(0)), key, value })
            }
            "clear" => Ok(CodeNode::GenericClear(Box::new(self.read_and_check_expr_list("clear", 1)?.remove(0)))),
            "find" => {
                let mut e = self.read_and_check_range_expr_list("find", 2, Some(3))?;
                let pos = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
                let value = Box::new(e.remove(1));
                Ok(CodeNode::GenericFind { obj: Box::new(e.remove(0)), value, pos })
            }
            "count" => {
                let mut e = self.read_and_check_expr_list("count", 2)?;
                let value = Box::new(e.remove(1));
                Ok(CodeNode::GenericCount { obj: Box::new(e.remove(0)), value })
            }
            "sort" => {
                let mut e = self.read_and_check_range_expr_list("sort", 1, Some(2))?;
                let desc = if e.len() == 2 { Some(Box::new(e.remove(1))) } else { None };
                Ok(CodeNode::GenericSort { obj: Box::new(e.remove(0)), desc })
            }
            "reverse" => Ok(CodeNode::GenericReverse(Box::new(self.read_and_check_expr_list("reverse", 1)?.remove(0)))),
            "sum" => Ok(CodeNode::GenericSum(Box::new(self.read_and_check_expr_list("sum", 1)?.remove(0)))),

            "timeit" => self.parse_timeit(),

            "fopen" => {
                let mut e = self.read_and_check_expr_list("fopen", 2)?;
                let mode = Box::new(e.remove(1));
                Ok(CodeNode::FileOpen { path: Box::new(e.remove(0)), mode })
            }
            "fclose" => Ok(CodeNode::FileClose(Box::new(self.read_and_check_expr_list("fclose", 1)?.remove(0)))),
            "fflush" => Ok(CodeNode::FileFlush(Box::new(self.read_and_check_expr_list("fflush", 1)?.remove(0)))),
            "fisopen" => Ok(CodeNode::FileIsOpen(Box::new(self.read_and_check_expr_list("fisopen", 1)?.remove(0)))),
            "fname" => Ok(CodeNode::FileName(Box::new(self.read_and_check_expr_list("fname", 1)?.remove(0)))),
            "fmode" => Ok(CodeNode::FileModeOf(Box::new(self.read_and_check_expr_list("fmode", 1)?.remove(0)))),
            "fread" => Ok(CodeNode::FileRead(Box::new(self.read_and_check_expr_list("fread", 1)?.remove(0)))),
            "freadln" => Ok(CodeNode::FileReadLn(Box::new(self.read_and_check_expr_list("freadln", 1)?.remove(0)))),
            "fwrite" => {
                let mut e = self.read_and_check_expr_list("fwrite", 2)?;
                let value = Box::new(e.remove(1));
                Ok(CodeNode::FileWrite { file: Box::new(e.remove(0)), value })
            }
            "fwriteln" => {
                let mut e = self.read_and_check_expr_list("fwriteln", 2)?;
                let value = Box::new(e.remove(1));
                Ok(CodeNode::FileWriteLn { file: Box::new(e.remove(0)), value })
            }
            "fexists" => Ok(CodeNode::FileExists(Box::new(self.read_and_check_expr_list("fexists", 1)?.remove(0)))),
            "fremove" => Ok(CodeNode::FileRemove(Box::new(self.read_and_check_expr_list("fremove", 1)?.remove(0)))),

            _ => {
                if token.token_type == TokenType::Symbol {
                    let args = self.read_expr_list()?;
                    Ok(CodeNode::Application { callee: ApplicationCallee::Name(token.text), args })
                } else {
                    Err(Error::UnknownSymbol(token.text))
                }
            }
        }
    }

    fn parse_import(&mut self) -> Result<CodeNode> {
        let names = self.read_name_and_as_list()?;
        if names.len() == 1 {
            let (name, as_name) = names.into_iter().next().unwrap();
            Ok(CodeNode::ImportModule { name, as_name })
        } else {
            Err(Error::invalid_expression("Misformed import"))
        }
    }

    fn parse_from_import(&mut self) -> Result<CodeNode> {
        let name = self.read_name()?;
        let import = self.read_name()?;
        if import != "import" {
            return Err(Error::invalid_expression("Misformed from/import"));
        }
        let names = self.read_name_and_as_list()?;
        if names.is_empty() {
            return Err(Error::invalid_expression("Misformed from/import"));
        }
        Ok(CodeNode::FromModuleImport { name, names })
    }

    fn parse_define(&mut self) -> Result<CodeNode> {
        let name = self.read_name()?;
        let expr = Box::new(self.read_and_check_expr_list("var", 1)?.remove(0));
        Ok(CodeNode::Define { name, expr })
    }

    fn parse_assign(&mut self) -> Result<CodeNode> {
        let name = self.read_name()?;
        let expr = Box::new(self.read_and_check_expr_list("=", 1)?.remove(0));
        Ok(CodeNode::Assign { name, expr })
    }

    /// Desugars `(+= x 1)` to `(= x (+ x 1))` at parse time; no dedicated
    /// AST node is needed since evaluation is identical to the expansion.
    fn parse_compound_assign(&mut self, op: ArithOp) -> Result<CodeNode> {
        let name = self.read_name()?;
        let rhs = self.read_and_check_expr_list("compound assignment", 1)?.remove(0);
        let args = vec![CodeNode::Variable(name.clone()), rhs];
        Ok(CodeNode::Assign { name, expr: Box::new(CodeNode::ArithOp { op, args }) })
    }

    fn parse_exists(&mut self) -> Result<CodeNode> {
        let name = self.read_name()?;
        self.ignore_right_p()?;
        Ok(CodeNode::Exists(name))
    }

    fn parse_arith(&mut self, op: ArithOp) -> Result<CodeNode> {
        Ok(CodeNode::ArithOp { op, args: self.read_expr_list()? })
    }

    fn parse_comp(&mut self, op: CompOp, name: &str) -> Result<CodeNode> {
        let mut e = self.read_and_check_expr_list(name, 2)?;
        let rhs = Box::new(e.remove(1));
        Ok(CodeNode::CompOp { op, lhs: Box::new(e.remove(0)), rhs })
    }

    fn parse_logic(&mut self, op: LogicOp) -> Result<CodeNode> {
        Ok(CodeNode::LogicOp { op, args: self.read_expr_list()? })
    }

    fn parse_if(&mut self) -> Result<CodeNode> {
        let mut e = self.read_expr_list()?;
        match e.len() {
            2 => {
                let then_branch = Box::new(e.remove(1));
                Ok(CodeNode::If { pred: Box::new(e.remove(0)), then_branch, else_branch: None })
            }
            3 => {
                let else_branch = Some(Box::new(e.remove(2)));
                let then_branch = Box::new(e.remove(1));
                Ok(CodeNode::If { pred: Box::new(e.remove(0)), then_branch, else_branch })
            }
            _ => Err(Error::TooManyOrFewForms("if".into())),
        }
    }

    fn parse_loop(&mut self) -> Result<CodeNode> {
        let mut forms = self.read_expr_list()?;
        match forms.len() {
            4 => {
                let body = Box::new(forms.remove(3));
                let next = Some(Box::new(forms.remove(2)));
                let cond = Box::new(forms.remove(1));
                Ok(CodeNode::Loop { decl: Some(Box::new(forms.remove(0))), cond, next, body })
            }
            2 => {
                let body = Box::new(forms.remove(1));
                Ok(CodeNode::Loop { decl: None, cond: Box::new(forms.remove(0)), next: None, body })
            }
            _ => Err(Error::TooManyOrFewForms("loop".into())),
        }
    }

    fn parse_lambda(&mut self) -> Result<CodeNode> {
        let params = self.read_params()?;
        let body = std::rc::Rc::new(self.read_body()?);
        Ok(CodeNode::LambdaExpr { params, body })
    }

    fn parse_defun(&mut self) -> Result<CodeNode> {
        let name = self.read_name()?;
        let params = self.read_params()?;
        let body = std::rc::Rc::new(self.read_body()?);
        Ok(CodeNode::FunctionExpr { name, params, body })
    }

    /// Reads the (possibly multi-form) body of a `lambda`/`defun`, wrapping
    /// more than one form in an implicit `progn`.
    fn read_body(&mut self) -> Result<CodeNode> {
        let mut exprs = self.read_expr_list()?;
        Ok(if exprs.len() == 1 { exprs.remove(0) } else { CodeNode::ProgN(exprs) })
    }

    fn parse_istypeof(&mut self) -> Result<CodeNode> {
        let expr = Box::new(self.require_expr()?);
        let names = self.read_names("istypeof", 1)?;
        let types = names.iter().map(|n| Type::from_name(n)).collect::<Result<Vec<_>>>()?;
        Ok(CodeNode::IsType { expr, types })
    }

    fn parse_astype(&mut self) -> Result<CodeNode> {
        let expr = Box::new(self.require_expr()?);
        let ty = Type::from_name(&self.read_name()?)?;
        self.ignore_right_p()?;
        Ok(CodeNode::AsType { expr, ty })
    }

    fn parse_assert(&mut self) -> Result<CodeNode> {
        let tag = self.read_name()?;
        let expr = Box::new(self.read_and_check_expr_list("assert", 1)?.remove(0));
        Ok(CodeNode::Assert { tag, expr })
    }

    fn parse_struct(&mut self) -> Result<CodeNode> {
        let name = self.read_name()?;
        let members = self.read_params()?;
        self.ignore_right_p()?;
        Ok(CodeNode::StructExpr { name, members })
    }

    fn parse_isstructname(&mut self) -> Result<CodeNode> {
        let expr = Box::new(self.require_expr()?);
        let name = self.read_name()?;
        self.ignore_right_p()?;
        Ok(CodeNode::IsStructName { expr, name })
    }

    fn parse_makeinstance(&mut self) -> Result<CodeNode> {
        let name = self.read_name()?;
        let init = self.read_name_expr_pairs()?;
        Ok(CodeNode::MakeInstance { name, init })
    }

    fn parse_isinstanceof(&mut self) -> Result<CodeNode> {
        let expr = Box::new(self.require_expr()?);
        let name = self.read_name()?;
        self.ignore_right_p()?;
        Ok(CodeNode::IsInstanceOf { expr, name })
    }

    fn parse_memget(&mut self) -> Result<CodeNode> {
        let expr = Box::new(self.require_expr()?);
        let member = self.read_name()?;
        self.ignore_right_p()?;
        Ok(CodeNode::GetMember { expr, member })
    }

    fn parse_memset(&mut self) -> Result<CodeNode> {
        let expr = Box::new(self.require_expr()?);
        let member = self.read_name()?;
        let value = Box::new(self.require_expr()?);
        self.ignore_right_p()?;
        Ok(CodeNode::SetMember { expr, member, value })
    }

    fn parse_char_check(&mut self, kind: CharCheck, name: &str) -> Result<CodeNode> {
        let expr = Box::new(self.read_and_check_expr_list(name, 1)?.remove(0));
        Ok(CodeNode::CharCheckOp { kind, expr })
    }

    fn parse_char_transform(&mut self, kind: CharTransform, name: &str) -> Result<CodeNode> {
        let expr = Box::new(self.read_and_check_expr_list(name, 1)?.remove(0));
        Ok(CodeNode::CharTransformOp { kind, expr })
    }

    fn parse_arraysv(&mut self) -> Result<CodeNode> {
        let mut e = self.read_and_check_range_expr_list("arraysv", 1, Some(2))?;
        let init = if e.len() == 2 { Some(Box::new(e.remove(1))) } else { None };
        Ok(CodeNode::MakeArraySized { size: Box::new(e.remove(0)), init })
    }

    fn parse_range(&mut self) -> Result<CodeNode> {
        let mut e = self.read_and_check_range_expr_list("range", 1, Some(3))?;
        if e.len() == 1 {
            return Ok(CodeNode::MakeRange { begin: None, end: Box::new(e.remove(0)), step: None });
        }
        let step = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
        let end = Box::new(e.remove(1));
        Ok(CodeNode::MakeRange { begin: Some(Box::new(e.remove(0))), end, step })
    }

    fn parse_timeit(&mut self) -> Result<CodeNode> {
        let mut e = self.read_and_check_range_expr_list("timeit", 1, Some(3))?;
        let summary = if e.len() == 3 { Some(Box::new(e.remove(2))) } else { None };
        let count = if e.len() >= 2 { Some(Box::new(e.remove(1))) } else { None };
        Ok(CodeNode::TimeIt { expr: Box::new(e.remove(0)), count, summary })
    }

    fn read_expr_list(&mut self) -> Result<Vec<CodeNode>> {
        let mut forms = Vec::new();
        while let Some(form) = self.read_expr()? {
            forms.push(form);
        }
        Ok(forms)
    }

    fn read_and_check_expr_list(&mut self, name: &str, n: usize) -> Result<Vec<CodeNode>> {
        let exprs = self.read_expr_list()?;
        if exprs.len() != n {
            return Err(Error::TooManyOrFewForms(name.to_string()));
        }
        Ok(exprs)
    }

    fn read_and_check_range_expr_list(&mut self, name: &str, lo: usize, hi: Option<usize>) -> Result<Vec<CodeNode>> {
        let exprs = self.read_expr_list()?;
        if exprs.len() < lo || hi.is_some_and(|h| exprs.len() > h) {
            return Err(Error::TooManyOrFewForms(name.to_string()));
        }
        Ok(exprs)
    }

    /// Reads zero or more `(pred body)` pairs until a closing paren. Matches
    /// the original's quirk of only keeping a pair once both halves parsed
    /// (well-formed `cond` forms always supply both).
    fn read_expr_pairs(&mut self) -> Result<Vec<(CodeNode, Option<CodeNode>)>> {
        let mut pairs = Vec::new();
        self.ignore_left_p(false)?;
        let mut first = self.read_expr()?;
        let mut second = self.read_expr()?;
        self.ignore_right_p()?;
        while first.is_some() && second.is_some() {
            pairs.push((first.take().unwrap(), second.take()));
            if self.ignore_left_p(true)? {
                break;
            }
            first = self.read_expr()?;
            second = self.read_expr()?;
            self.ignore_right_p()?;
        }
        Ok(pairs)
    }

    /// Reads `makeinstance`'s optional `(name expr)*` init list. The type
    /// name may be followed directly by a closing paren with no init list
    /// at all.
    fn read_name_expr_pairs(&mut self) -> Result<Vec<(String, CodeNode)>> {
        let mut pairs = Vec::new();
        let mut rp_seen = false;
        if self.lexer.peek()?.token_type == TokenType::LeftP {
            self.ignore_left_p(false)?;
            let mut name = self.read_name()?;
            let mut expr = self.read_expr()?;
            self.ignore_right_p()?;
            while let Some(e) = expr.take() {
                pairs.push((std::mem::take(&mut name), e));
                if self.ignore_left_p(true)? {
                    rp_seen = true;
                    break;
                }
                name = self.read_name()?;
                expr = self.read_expr()?;
                self.ignore_right_p()?;
            }
        }
        if !rp_seen && self.lexer.peek()?.token_type == TokenType::RightP {
            self.ignore_right_p()?;
        }
        Ok(pairs)
    }

    fn read_name(&mut self) -> Result<String> {
        let token = self.lexer.next()?;
        if token.token_type != TokenType::Symbol {
            return Err(Error::UnexpectedExpression { expected: "name".into(), actual: token.text });
        }
        Ok(token.text)
    }

    /// Reads `minExpectedSize` or more bare names up to (and consuming) a
    /// closing paren - used for `istypeof`'s variadic type list, which has
    /// no wrapping parens of its own.
    fn read_names(&mut self, list_name: &str, min_size: usize) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut token = self.lexer.next()?;
        while token.token_type != TokenType::RightP {
            if token.token_type != TokenType::Symbol {
                return Err(Error::UnexpectedExpression { expected: "name".into(), actual: token.text });
            }
            names.push(token.text);
            token = self.lexer.next()?;
        }
        if names.len() < min_size {
            return Err(Error::TooManyOrFewForms(list_name.to_string()));
        }
        Ok(names)
    }

    /// Reads `import`/`from ... import`'s `name [as alias]` list, terminated
    /// by a closing paren.
    fn read_name_and_as_list(&mut self) -> Result<Vec<(String, Option<String>)>> {
        let mut result = Vec::new();
        let mut name = self.get_next_symbol()?;
        while name.token_type != TokenType::RightP {
            if name.text == "as" {
                return Err(Error::invalid_expression("Misformed name/as list"));
            }
            let maybe_as = self.lexer.next()?;
            if maybe_as.text == "as" {
                let as_name = self.get_next_symbol()?;
                result.push((name.text, Some(as_name.text)));
                name = self.lexer.next()?;
            } else {
                result.push((name.text, None));
                name = maybe_as;
            }
        }
        Ok(result)
    }

    fn get_next_symbol(&mut self) -> Result<Token> {
        let token = self.lexer.next()?;
        if token.token_type != TokenType::Symbol {
            return Err(Error::unexpected_token_type_in(token.text, token.token_type.code(), "name/as list"));
        }
        Ok(token)
    }

    fn read_params(&mut self) -> Result<Vec<String>> {
        let open = self.lexer.next()?;
        if open.token_type != TokenType::LeftP {
            return Err(Error::ExpectedParenthesis('('));
        }
        let mut params = Vec::new();
        let mut token = self.lexer.next()?;
        while token.token_type != TokenType::RightP {
            if token.token_type != TokenType::Symbol {
                return Err(Error::unexpected_token_type_in(token.text, token.token_type.code(), "paramList"));
            }
            params.push(token.text);
            token = self.lexer.next()?;
        }
        Ok(params)
    }

    fn ignore_left_p(&mut self, allow_right_p: bool) -> Result<bool> {
        let token = self.lexer.next()?;
        if allow_right_p && token.token_type == TokenType::RightP {
            return Ok(true);
        }
        if token.token_type != TokenType::LeftP {
            return Err(Error::ExpectedParenthesis('('));
        }
        Ok(false)
    }

    fn ignore_right_p(&mut self) -> Result<()> {
        let token = self.lexer.next()?;
        if token.token_type != TokenType::RightP {
            return Err(Error::ExpectedParenthesis(')'));
        }
        Ok(())
    }
}

fn make_literal(token_type: TokenType, text: &str) -> Result<CodeNode> {
    Ok(CodeNode::Literal(match token_type {
        TokenType::Char => Value::Char(text.as_bytes()[1]),
        TokenType::String => Value::str(&text[1..text.len() - 1]),
        TokenType::Int => Value::Int(text.parse().expect("lexer validated int literal")),
        TokenType::Real => Value::Real(text.parse().expect("lexer validated real literal")),
        TokenType::Bool => Value::Bool(text == "true"),
        TokenType::Null => Value::Null,
        _ => unreachable!("make_literal only called with literal token types"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Env;

    fn parse_one(src: &str) -> CodeNode {
        Parser::new().read(src).unwrap().unwrap()
    }

    fn eval_src(src: &str) -> Value {
        let env = Env::new();
        parse_one(src).eval(&env).unwrap()
    }

    #[test]
    fn parses_literals() {
        assert!(matches!(parse_one("5"), CodeNode::Literal(Value::Int(5))));
        assert!(matches!(parse_one("3.5"), CodeNode::Literal(Value::Real(_))));
        assert!(matches!(parse_one("'a'"), CodeNode::Literal(Value::Char(b'a'))));
        assert!(matches!(parse_one("true"), CodeNode::Literal(Value::Bool(true))));
        assert!(matches!(parse_one("null"), CodeNode::Literal(Value::Null)));
    }

    #[test]
    fn parses_string_literal_without_quotes() {
        match parse_one("\"hello\"") {
            CodeNode::Literal(Value::String(s)) => assert_eq!(*s.borrow(), "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arith_and_var_roundtrip() {
        assert_eq!(eval_src("(+ 1 2 3)"), Value::Int(6));
        let env = Env::new();
        Parser::new().read("(var x 5)").unwrap().unwrap().eval(&env).unwrap();
        assert_eq!(env.get("x").unwrap(), Value::Int(5));
    }

    #[test]
    fn compound_assign_desugars() {
        let env = Env::new();
        Parser::new().read("(var x 5)").unwrap().unwrap().eval(&env).unwrap();
        Parser::new().read("(+= x 3)").unwrap().unwrap().eval(&env).unwrap();
        assert_eq!(env.get("x").unwrap(), Value::Int(8));
    }

    #[test]
    fn if_with_and_without_else() {
        assert_eq!(eval_src("(if true 1 2)"), Value::Int(1));
        assert_eq!(eval_src("(if false 1 2)"), Value::Int(2));
        assert_eq!(eval_src("(if false 1)"), Value::Null);
    }

    #[test]
    fn lambda_application_direct_and_by_name() {
        assert_eq!(eval_src("((lambda (x) (+ x 1)) 4)"), Value::Int(5));
        let env = Env::new();
        Parser::new().read("(defun inc (x) (+ x 1))").unwrap().unwrap().eval(&env).unwrap();
        assert_eq!(Parser::new().read("(inc 9)").unwrap().unwrap().eval(&env).unwrap(), Value::Int(10));
    }

    #[test]
    fn istypeof_parses_variadic_type_list() {
        assert_eq!(eval_src("(istypeof 5 int real)"), Value::Bool(true));
    }

    #[test]
    fn makeinstance_with_and_without_init_list() {
        let env = Env::new();
        Parser::new().read("(struct Point (x y))").unwrap().unwrap().eval(&env).unwrap();
        let with_init = Parser::new().read("(makeinstance Point (x 1) (y 2))").unwrap().unwrap().eval(&env).unwrap();
        assert!(matches!(with_init, Value::UserObject(_)));
        let without_init = Parser::new().read("(makeinstance Point)").unwrap().unwrap().eval(&env).unwrap();
        assert!(matches!(without_init, Value::UserObject(_)));
    }

    #[test]
    fn cond_evaluates_first_matching_branch() {
        assert_eq!(eval_src("(cond ((== 1 2) 10) ((== 1 1) 20) (true 30))"), Value::Int(20));
    }

    #[test]
    fn have_s_expression_buffers_incomplete_multiline_input() {
        let mut parser = Parser::new();
        let mut forms = Vec::new();
        parser.read_multi("(+ 1", &mut |c| { forms.push(c); Ok(()) }).unwrap();
        assert!(forms.is_empty());
        assert!(parser.has_incomplete_expr());
        parser.read_multi(" 2)", &mut |c| { forms.push(c); Ok(()) }).unwrap();
        assert_eq!(forms.len(), 1);
        assert!(!parser.has_incomplete_expr());
    }

    #[test]
    fn unknown_head_symbol_errors() {
        assert_matches::assert_matches!(Parser::new().read("(5 1 2)"), Err(Error::UnknownSymbol(_)));
    }

    #[test]
    fn nested_parens_as_direct_callee() {
        assert_eq!(eval_src("((lambda (x) (lambda (y) (+ x y))) 3)").type_name(), "closure");
    }
}
