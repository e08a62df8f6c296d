//! The AST: one variant per surface form, each evaluating to a [`Value`]
//! given an [`Env`]. Built by the parser, shared by closures and the module
//! cache.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, Error, Signal};
use crate::environment::Env;
use crate::file_io::{FileHandle, FileMode};
use crate::hashtable::Hashtable;
use crate::instance::Instance;
use crate::integer_range::IntegerRange;
use crate::lambda::Closure;
use crate::module::ModuleStore;
use crate::sequence::Sequence;
use crate::struct_type::StructType;
use crate::value::{Type, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharCheck {
    Upper,
    Lower,
    Alpha,
    Digit,
    Alnum,
    Punct,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharTransform {
    Upper,
    Lower,
}

#[derive(Debug)]
pub enum ApplicationCallee {
    Name(String),
    Direct(Box<CodeNode>, RefCell<Option<Value>>),
}

/// A parsed program node. Every variant owns its sub-expressions; evaluating
/// one recursively evaluates its children against the given environment.
#[derive(Debug)]
pub enum CodeNode {
    Literal(Value),
    Variable(String),
    Define { name: String, expr: Box<CodeNode> },
    Assign { name: String, expr: Box<CodeNode> },
    Exists(String),
    CloneOf(Box<CodeNode>),

    ArithOp { op: ArithOp, args: Vec<CodeNode> },
    CompOp { op: CompOp, lhs: Box<CodeNode>, rhs: Box<CodeNode> },
    LogicOp { op: LogicOp, args: Vec<CodeNode> },
    Not(Box<CodeNode>),
    Negative(Box<CodeNode>),

    IsType { expr: Box<CodeNode>, types: Vec<Type> },
    TypeName(Box<CodeNode>),
    AsType { expr: Box<CodeNode>, ty: Type },
    Assert { tag: String, expr: Box<CodeNode> },

    ProgN(Vec<CodeNode>),
    Block(Vec<CodeNode>),
    If { pred: Box<CodeNode>, then_branch: Box<CodeNode>, else_branch: Option<Box<CodeNode>> },
    Cond(Vec<(CodeNode, Option<CodeNode>)>),
    Loop { decl: Option<Box<CodeNode>>, cond: Box<CodeNode>, next: Option<Box<CodeNode>>, body: Box<CodeNode> },
    Foreach { var: String, iterable: Box<CodeNode>, body: Box<CodeNode> },
    Break,

    LambdaExpr { params: Vec<String>, body: Rc<CodeNode> },
    FunctionExpr { name: String, params: Vec<String>, body: Rc<CodeNode> },
    Application { callee: ApplicationCallee, args: Vec<CodeNode> },

    Print { newline: bool, args: Vec<CodeNode> },
    Read,

    StructExpr { name: String, members: Vec<String> },
    MakeInstance { name: String, init: Vec<(String, CodeNode)> },
    IsStructName { expr: Box<CodeNode>, name: String },
    IsInstanceOf { expr: Box<CodeNode>, name: String },
    StructName(Box<CodeNode>),
    GetMember { expr: Box<CodeNode>, member: String },
    SetMember { expr: Box<CodeNode>, member: String, value: Box<CodeNode> },

    StringLen(Box<CodeNode>),
    StringGet { s: Box<CodeNode>, pos: Box<CodeNode> },
    StringSet { s: Box<CodeNode>, pos: Box<CodeNode>, value: Box<CodeNode> },
    StringCat { s: Box<CodeNode>, other: Box<CodeNode> },
    SubString { s: Box<CodeNode>, pos: Box<CodeNode>, len: Option<Box<CodeNode>> },
    StringFind { s: Box<CodeNode>, target: Box<CodeNode>, pos: Option<Box<CodeNode>> },
    StringCount { s: Box<CodeNode>, target: Box<CodeNode> },
    StringCompare { lhs: Box<CodeNode>, rhs: Box<CodeNode> },
    StringSort { s: Box<CodeNode>, desc: Option<Box<CodeNode>> },
    StringReverse(Box<CodeNode>),
    StringSplit { s: Box<CodeNode>, delim: Box<CodeNode> },
    CharCheckOp { kind: CharCheck, expr: Box<CodeNode> },
    CharTransformOp { kind: CharTransform, expr: Box<CodeNode> },

    MakeArray(Vec<CodeNode>),
    MakeArraySized { size: Box<CodeNode>, init: Option<Box<CodeNode>> },
    MakeArrayGenerated { size: Box<CodeNode>, gen: Box<CodeNode> },
    ArrayLen(Box<CodeNode>),
    ArrayGet { arr: Box<CodeNode>, pos: Box<CodeNode> },
    ArraySet { arr: Box<CodeNode>, pos: Box<CodeNode>, value: Box<CodeNode> },
    ArrayPush { arr: Box<CodeNode>, value: Box<CodeNode> },
    ArrayPop(Box<CodeNode>),
    ArrayFind { arr: Box<CodeNode>, value: Box<CodeNode>, pos: Option<Box<CodeNode>> },
    ArrayCount { arr: Box<CodeNode>, value: Box<CodeNode> },
    ArraySort { arr: Box<CodeNode>, desc: Option<Box<CodeNode>> },
    ArrayReverse(Box<CodeNode>),
    ArrayInsert { arr: Box<CodeNode>, pos: Box<CodeNode>, value: Box<CodeNode> },
    ArrayRemove { arr: Box<CodeNode>, pos: Box<CodeNode> },
    ArrayClear(Box<CodeNode>),

    MakeHashMap(Vec<CodeNode>),
    HashMapLen(Box<CodeNode>),
    HashMapContains { h: Box<CodeNode>, key: Box<CodeNode> },
    HashMapGet { h: Box<CodeNode>, key: Box<CodeNode>, default: Option<Box<CodeNode>> },
    HashMapSet { h: Box<CodeNode>, key: Box<CodeNode>, value: Box<CodeNode> },
    HashMapRemove { h: Box<CodeNode>, key: Box<CodeNode> },
    HashMapClear(Box<CodeNode>),
    HashMapFind { h: Box<CodeNode>, value: Box<CodeNode> },
    HashMapCount { h: Box<CodeNode>, value: Box<CodeNode> },
    HashMapKeys(Box<CodeNode>),
    HashMapValues(Box<CodeNode>),
    HashMapItems(Box<CodeNode>),

    MakePair { first: Box<CodeNode>, second: Box<CodeNode> },
    PairFirst(Box<CodeNode>),
    PairSecond(Box<CodeNode>),

    MakeRange { begin: Option<Box<CodeNode>>, end: Box<CodeNode>, step: Option<Box<CodeNode>> },
    RangeBegin(Box<CodeNode>),
    RangeEnd(Box<CodeNode>),
    RangeStep(Box<CodeNode>),
    RangeLen(Box<CodeNode>),
    Expand(Box<CodeNode>),

    GenericLen(Box<CodeNode>),
    GenericEmpty(Box<CodeNode>),
    GenericGet { obj: Box<CodeNode>, key: Box<CodeNode>, default: Option<Box<CodeNode>> },
    GenericSet { obj: Box<CodeNode>, key: Box<CodeNode>, value: Box<CodeNode> },
    GenericClear(Box<CodeNode>),
    GenericFind { obj: Box<CodeNode>, value: Box<CodeNode>, pos: Option<Box<CodeNode>> },
    GenericCount { obj: Box<CodeNode>, value: Box<CodeNode> },
    GenericSort { obj: Box<CodeNode>, desc: Option<Box<CodeNode>> },
    GenericReverse(Box<CodeNode>),
    GenericSum(Box<CodeNode>),
    GenericApply { obj: Box<CodeNode>, closure: Box<CodeNode> },

    Random(Option<Box<CodeNode>>),
    HashOf(Box<CodeNode>),
    TimeIt { expr: Box<CodeNode>, count: Option<Box<CodeNode>>, summary: Option<Box<CodeNode>> },

    FileOpen { path: Box<CodeNode>, mode: Box<CodeNode> },
    FileClose(Box<CodeNode>),
    FileFlush(Box<CodeNode>),
    FileIsOpen(Box<CodeNode>),
    FileName(Box<CodeNode>),
    FileModeOf(Box<CodeNode>),
    FileRead(Box<CodeNode>),
    FileReadLn(Box<CodeNode>),
    FileWrite { file: Box<CodeNode>, value: Box<CodeNode> },
    FileWriteLn { file: Box<CodeNode>, value: Box<CodeNode> },
    FileExists(Box<CodeNode>),
    FileRemove(Box<CodeNode>),

    ImportModule { name: String, as_name: Option<String> },
    FromModuleImport { name: String, names: Vec<(String, Option<String>)> },
}

impl CodeNode {
    pub fn eval(&self, env: &Env) -> EvalResult<Value> {
        match self {
            CodeNode::Literal(v) => Ok(v.clone_deep_literal()),
            CodeNode::Variable(name) => Ok(env.get(name)?),
            CodeNode::Define { name, expr } => {
                let v = expr.eval(env)?;
                Ok(env.def(name.clone(), v)?)
            }
            CodeNode::Assign { name, expr } => {
                let v = expr.eval(env)?;
                Ok(env.set(name, v)?)
            }
            CodeNode::Exists(name) => Ok(Value::Bool(env.exists(name))),
            CodeNode::CloneOf(expr) => Ok(expr.eval(env)?.clone_deep()?),

            CodeNode::ArithOp { op, args } => eval_arith(*op, args, env),
            CodeNode::CompOp { op, lhs, rhs } => eval_comp(*op, lhs, rhs, env),
            CodeNode::LogicOp { op, args } => eval_logic(*op, args, env),
            CodeNode::Not(expr) => Ok(Value::Bool(!expr.eval(env)?.expect_bool()?)),
            CodeNode::Negative(expr) => match expr.eval(env)? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Real(r) => Ok(Value::Real(-r)),
                other => Err(Error::InvalidOperandType { expected: "Integer or Real".into(), actual: other.type_name().into() }.into()),
            },

            CodeNode::IsType { expr, types } => {
                let v = expr.eval(env)?;
                Ok(Value::Bool(types.contains(&v.ty())))
            }
            CodeNode::TypeName(expr) => Ok(Value::str(expr.eval(env)?.type_name())),
            CodeNode::AsType { expr, ty } => Ok(expr.eval(env)?.as_type(*ty)?),
            CodeNode::Assert { tag, expr } => {
                let v = expr.eval(env)?;
                if !v.expect_bool()? {
                    return Err(Error::General { msg: "assertion failed".into(), var: Some(tag.clone()) }.into());
                }
                Ok(v)
            }

            CodeNode::ProgN(exprs) => eval_seq(exprs, env),
            CodeNode::Block(exprs) => eval_seq(exprs, &Env::child(env)),
            CodeNode::If { pred, then_branch, else_branch } => {
                let p = pred.eval(env)?;
                let cond = p.expect_bool().map_err(|_| {
                    Signal::Error(Error::InvalidExpressionType { expected: "Boolean".into(), actual: p.type_name().into() })
                })?;
                let child = Env::child(env);
                if cond {
                    then_branch.eval(&child)
                } else if let Some(e) = else_branch {
                    e.eval(&child)
                } else {
                    Ok(Value::Null)
                }
            }
            CodeNode::Cond(cases) => {
                for (pred, body) in cases {
                    let p = pred.eval(env)?;
                    let cond = p.expect_bool().map_err(|_| {
                        Signal::Error(Error::InvalidExpressionType { expected: "Boolean".into(), actual: p.type_name().into() })
                    })?;
                    if cond {
                        return match body {
                            Some(b) => b.eval(&Env::child(env)),
                            None => Ok(Value::Null),
                        };
                    }
                }
                Ok(Value::Null)
            }
            CodeNode::Loop { decl, cond, next, body } => {
                let loop_env = Env::child(env);
                if let Some(d) = decl {
                    d.eval(&loop_env)?;
                }
                let mut result = Value::Null;
                loop {
                    let p = cond.eval(&loop_env)?;
                    let keep_going = p.expect_bool().map_err(|_| {
                        Signal::Error(Error::InvalidExpressionType { expected: "Boolean".into(), actual: p.type_name().into() })
                    })?;
                    if !keep_going {
                        break;
                    }
                    match body.eval(&loop_env) {
                        Ok(v) => result = v,
                        Err(Signal::Break) => {
                            result = Value::Null;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                    if let Some(n) = next {
                        n.eval(&loop_env)?;
                    }
                }
                Ok(result)
            }
            CodeNode::Foreach { var, iterable, body } => {
                let container = iterable.eval(env)?;
                let items = iterable_items(&container)?;
                let mut result = Value::Null;
                for item in items {
                    let child = Env::child(env);
                    child.def(var.clone(), item)?;
                    match body.eval(&child) {
                        Ok(v) => result = v,
                        Err(Signal::Break) => {
                            result = Value::Null;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(result)
            }
            CodeNode::Break => Err(Signal::Break),

            CodeNode::LambdaExpr { params, body } => {
                Ok(Value::closure(Closure::new(params.clone(), body.clone(), env.clone())))
            }
            CodeNode::FunctionExpr { name, params, body } => {
                let c = Value::closure(Closure::new(params.clone(), body.clone(), env.clone()));
                Ok(env.def(name.clone(), c)?)
            }
            CodeNode::Application { callee, args } => eval_application(callee, args, env),

            CodeNode::Print { newline, args } => {
                let mut out = String::new();
                for a in args {
                    let v = a.eval(env)?;
                    let _ = v.print_plain(&mut out);
                }
                if *newline {
                    println!("{out}");
                } else {
                    print!("{out}");
                }
                Ok(Value::Null)
            }
            CodeNode::Read => {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map_err(|e| Error::FileIOError(e.to_string()))?;
                let line = line.trim_end_matches(['\n', '\r']);
                Ok(crate::parser::Parser::read_literal(line)?)
            }

            CodeNode::StructExpr { name, members } => {
                let ty = Value::UserType(Rc::new(StructType::new(name.clone(), members.clone())));
                Ok(env.def(name.clone(), ty)?)
            }
            CodeNode::MakeInstance { name, init } => {
                let ty = env.get(name)?;
                let ty = ty.expect_user_type()?.clone();
                let mut values = std::collections::HashMap::new();
                for (k, expr) in init {
                    values.insert(k.clone(), expr.eval(env)?);
                }
                Ok(Value::user_object(Instance::new(ty, &values)))
            }
            CodeNode::IsStructName { expr, name } => {
                let v = expr.eval(env)?;
                let actual = match &v {
                    Value::UserType(t) => t.name().to_string(),
                    Value::UserObject(o) => o.borrow().ty().name().to_string(),
                    other => {
                        return Err(Error::InvalidExpressionType { expected: "UserType or UserObject".into(), actual: other.type_name().into() }.into())
                    }
                };
                Ok(Value::Bool(actual == *name))
            }
            CodeNode::IsInstanceOf { expr, name } => {
                let v = expr.eval(env)?;
                let obj = v.expect_user_object()?;
                let is = obj.borrow().ty().name() == name;
                Ok(Value::Bool(is))
            }
            CodeNode::StructName(expr) => {
                let v = expr.eval(env)?;
                let name = match &v {
                    Value::UserType(t) => t.name().to_string(),
                    Value::UserObject(o) => o.borrow().ty().name().to_string(),
                    other => {
                        return Err(Error::InvalidExpressionType { expected: "UserType or UserObject".into(), actual: other.type_name().into() }.into())
                    }
                };
                Ok(Value::str(name))
            }
            CodeNode::GetMember { expr, member } => {
                let v = expr.eval(env)?;
                let obj = v.expect_user_object()?;
                let result = obj.borrow().get(member)?.clone();
                Ok(result)
            }
            CodeNode::SetMember { expr, member, value } => {
                let v = expr.eval(env)?;
                let obj = v.expect_user_object()?;
                let new_val = value.eval(env)?;
                obj.borrow_mut().set(member, new_val.clone())?;
                Ok(new_val)
            }

            CodeNode::StringLen(s) => Ok(Value::Int(s.eval(env)?.expect_string()?.borrow().len() as i64)),
            CodeNode::StringGet { s, pos } => {
                let sv = s.eval(env)?;
                let s = sv.expect_string()?;
                let p = pos.eval(env)?.expect_int()?;
                let s = s.borrow();
                let c = char_at(&s, p)?;
                Ok(Value::Char(c))
            }
            CodeNode::StringSet { s, pos, value } => {
                let sv = s.eval(env)?;
                let handle = sv.expect_string()?;
                let p = pos.eval(env)?.expect_int()?;
                let c = value.eval(env)?.expect_char()?;
                let mut buf = handle.borrow_mut();
                set_char_at(&mut buf, p, c)?;
                Ok(sv.clone())
            }
            CodeNode::StringCat { s, other } => {
                let sv = s.eval(env)?;
                let handle = sv.expect_string()?;
                let ov = other.eval(env)?;
                let addition = ov.expect_char().map(|c| (c as char).to_string()).or_else(|_| ov.expect_string().map(|rc| rc.borrow().clone()))?;
                handle.borrow_mut().push_str(&addition);
                Ok(sv.clone())
            }
            CodeNode::SubString { s, pos, len } => {
                let sv = s.eval(env)?;
                let s = sv.expect_string()?.borrow();
                let p = pos.eval(env)?.expect_int()?;
                let p = usize::try_from(p).map_err(|_| Error::OutOfRange(format!("substr pos {p}")))?;
                let chars: Vec<char> = s.chars().collect();
                if p > chars.len() {
                    return Err(Error::OutOfRange(format!("substr pos {p}")).into());
                }
                let length = match len {
                    Some(l) => {
                        let n = l.eval(env)?.expect_int()?;
                        usize::try_from(n).map_err(|_| Error::OutOfRange(format!("substr len {n}")))?
                    }
                    None => chars.len() - p,
                };
                if p + length > chars.len() {
                    return Err(Error::OutOfRange(format!("substr range {p}..{}", p + length)).into());
                }
                Ok(Value::str(chars[p..p + length].iter().collect::<String>()))
            }
            CodeNode::StringFind { s, target, pos } => {
                let sv = s.eval(env)?;
                let s = sv.expect_string()?.borrow();
                let chars: Vec<char> = s.chars().collect();
                let start = match pos {
                    Some(p) => usize::try_from(p.eval(env)?.expect_int()?).unwrap_or(0),
                    None => 0,
                };
                let target = target.eval(env)?.expect_char()? as char;
                let found = chars.iter().skip(start).position(|&c| c == target).map(|i| (i + start) as i64).unwrap_or(-1);
                Ok(Value::Int(found))
            }
            CodeNode::StringCount { s, target } => {
                let sv = s.eval(env)?;
                let s = sv.expect_string()?.borrow();
                let target = target.eval(env)?.expect_char()? as char;
                Ok(Value::Int(s.chars().filter(|&c| c == target).count() as i64))
            }
            CodeNode::StringCompare { lhs, rhs } => {
                let lv = lhs.eval(env)?;
                let rv = rhs.eval(env)?;
                let l = lv.expect_string()?.borrow();
                let r = rv.expect_string()?.borrow();
                let max_len = l.len().max(r.len());
                let lb = l.as_bytes();
                let rb = r.as_bytes();
                let mut ord = 0i64;
                for i in 0..max_len {
                    let lc = lb.get(i).copied().unwrap_or(0);
                    let rc = rb.get(i).copied().unwrap_or(0);
                    if lc != rc {
                        ord = lc as i64 - rc as i64;
                        break;
                    }
                }
                Ok(Value::Int(ord))
            }
            CodeNode::StringSort { s, desc } => {
                let sv = s.eval(env)?;
                let handle = sv.expect_string()?;
                let descending = match desc {
                    Some(d) => d.eval(env)?.expect_bool()?,
                    None => false,
                };
                let mut chars: Vec<char> = handle.borrow().chars().collect();
                chars.sort();
                if descending {
                    chars.reverse();
                }
                *handle.borrow_mut() = chars.into_iter().collect();
                Ok(sv.clone())
            }
            CodeNode::StringReverse(s) => {
                let sv = s.eval(env)?;
                let handle = sv.expect_string()?;
                let reversed: String = handle.borrow().chars().rev().collect();
                *handle.borrow_mut() = reversed;
                Ok(sv.clone())
            }
            CodeNode::StringSplit { s, delim } => {
                let sv = s.eval(env)?;
                let s = sv.expect_string()?.borrow();
                let d = delim.eval(env)?.expect_char()? as char;
                let parts: Vec<Value> = s.split(d).map(Value::str).collect();
                Ok(Value::array(Sequence::from_vec(parts)))
            }
            CodeNode::CharCheckOp { kind, expr } => {
                let v = expr.eval(env)?;
                let pred: fn(char) -> bool = match kind {
                    CharCheck::Upper => |c: char| c.is_ascii_uppercase(),
                    CharCheck::Lower => |c: char| c.is_ascii_lowercase(),
                    CharCheck::Alpha => |c: char| c.is_ascii_alphabetic(),
                    CharCheck::Digit => |c: char| c.is_ascii_digit(),
                    CharCheck::Alnum => |c: char| c.is_ascii_alphanumeric(),
                    CharCheck::Punct => |c: char| c.is_ascii_punctuation(),
                    CharCheck::Space => |c: char| c.is_ascii_whitespace(),
                };
                match &v {
                    Value::Char(c) => Ok(Value::Bool(pred(*c as char))),
                    Value::String(s) => Ok(Value::Bool(s.borrow().chars().all(pred))),
                    other => Err(Error::InvalidOperandType { expected: "Character or String".into(), actual: other.type_name().into() }.into()),
                }
            }
            CodeNode::CharTransformOp { kind, expr } => {
                let v = expr.eval(env)?.clone_deep()?;
                let xform: fn(char) -> char = match kind {
                    CharTransform::Upper => |c: char| c.to_ascii_uppercase(),
                    CharTransform::Lower => |c: char| c.to_ascii_lowercase(),
                };
                match &v {
                    Value::Char(c) => Ok(Value::Char(xform(*c as char) as u8)),
                    Value::String(s) => {
                        let transformed: String = s.borrow().chars().map(xform).collect();
                        *s.borrow_mut() = transformed;
                        Ok(v)
                    }
                    other => Err(Error::InvalidOperandType { expected: "Character or String".into(), actual: other.type_name().into() }.into()),
                }
            }

            CodeNode::MakeArray(exprs) => {
                let mut items = Vec::with_capacity(exprs.len());
                for e in exprs {
                    items.push(e.eval(env)?);
                }
                Ok(Value::array(Sequence::from_vec(items)))
            }
            CodeNode::MakeArraySized { size, init } => {
                let n = size.eval(env)?.expect_int()?;
                let n = usize::try_from(n).map_err(|_| Error::OutOfRange(format!("array size {n}")))?;
                let v = match init {
                    Some(i) => i.eval(env)?,
                    None => Value::Null,
                };
                Ok(Value::array(Sequence::filled(n, v)))
            }
            CodeNode::MakeArrayGenerated { size, gen } => {
                let n = size.eval(env)?.expect_int()?;
                let n = usize::try_from(n).map_err(|_| Error::OutOfRange(format!("array size {n}")))?;
                let closure_val = gen.eval(env)?;
                let closure = closure_val.expect_closure()?.clone();
                let seq = Sequence::generate(n, || call_closure(&closure, &[]))?;
                Ok(Value::array(seq))
            }
            CodeNode::ArrayLen(arr) => Ok(Value::Int(arr.eval(env)?.expect_array()?.borrow().len() as i64)),
            CodeNode::ArrayGet { arr, pos } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let p = pos.eval(env)?.expect_int()?;
                let p = usize::try_from(p).map_err(|_| Error::OutOfRange(format!("array index {p}")))?;
                let result = a.borrow().get(p)?.clone();
                Ok(result)
            }
            CodeNode::ArraySet { arr, pos, value } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let p = pos.eval(env)?.expect_int()?;
                let p = usize::try_from(p).map_err(|_| Error::OutOfRange(format!("array index {p}")))?;
                let v = value.eval(env)?;
                a.borrow_mut().set(p, v.clone())?;
                Ok(v)
            }
            CodeNode::ArrayPush { arr, value } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let v = value.eval(env)?;
                a.borrow_mut().push(v);
                Ok(av.clone())
            }
            CodeNode::ArrayPop(arr) => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                a.borrow_mut().pop();
                Ok(av.clone())
            }
            CodeNode::ArrayFind { arr, value, pos } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let v = value.eval(env)?;
                let start = match pos {
                    Some(p) => usize::try_from(p.eval(env)?.expect_int()?).unwrap_or(0),
                    None => 0,
                };
                let result = a.borrow().find(&v, start).map(|i| i as i64).unwrap_or(-1);
                Ok(Value::Int(result))
            }
            CodeNode::ArrayCount { arr, value } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let v = value.eval(env)?;
                let result = a.borrow().count(&v) as i64;
                Ok(Value::Int(result))
            }
            CodeNode::ArraySort { arr, desc } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let descending = match desc {
                    Some(d) => d.eval(env)?.expect_bool()?,
                    None => false,
                };
                a.borrow_mut().sort(descending);
                Ok(av.clone())
            }
            CodeNode::ArrayReverse(arr) => {
                let av = arr.eval(env)?;
                av.expect_array()?.borrow_mut().reverse();
                Ok(av.clone())
            }
            CodeNode::ArrayInsert { arr, pos, value } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let p = pos.eval(env)?.expect_int()?;
                let p = usize::try_from(p).map_err(|_| Error::OutOfRange(format!("array index {p}")))?;
                let v = value.eval(env)?;
                a.borrow_mut().insert(p, v)?;
                Ok(av.clone())
            }
            CodeNode::ArrayRemove { arr, pos } => {
                let av = arr.eval(env)?;
                let a = av.expect_array()?;
                let p = pos.eval(env)?.expect_int()?;
                let p = usize::try_from(p).map_err(|_| Error::OutOfRange(format!("array index {p}")))?;
                a.borrow_mut().erase(p)?;
                Ok(av.clone())
            }
            CodeNode::ArrayClear(arr) => {
                let av = arr.eval(env)?;
                av.expect_array()?.borrow_mut().clear();
                Ok(av.clone())
            }

            CodeNode::MakeHashMap(exprs) => {
                let mut ht = Hashtable::new();
                for e in exprs {
                    let v = e.eval(env)?;
                    let (k, val) = pair_or_two_element_array(&v)?;
                    ht.set(k, val);
                }
                Ok(Value::hashmap(ht))
            }
            CodeNode::HashMapLen(h) => Ok(Value::Int(h.eval(env)?.expect_hashmap()?.borrow().len() as i64)),
            CodeNode::HashMapContains { h, key } => {
                let hv = h.eval(env)?;
                let k = key.eval(env)?;
                let result = hv.expect_hashmap()?.borrow().exists(&k);
                Ok(Value::Bool(result))
            }
            CodeNode::HashMapGet { h, key, default } => {
                let hv = h.eval(env)?;
                let k = key.eval(env)?;
                let d = match default {
                    Some(d) => d.eval(env)?,
                    None => Value::Null,
                };
                let result = hv.expect_hashmap()?.borrow().get(&k, &d).clone();
                Ok(result)
            }
            CodeNode::HashMapSet { h, key, value } => {
                let hv = h.eval(env)?;
                let k = key.eval(env)?;
                let v = value.eval(env)?;
                hv.expect_hashmap()?.borrow_mut().set(k, v);
                Ok(hv.clone())
            }
            CodeNode::HashMapRemove { h, key } => {
                let hv = h.eval(env)?;
                let k = key.eval(env)?;
                hv.expect_hashmap()?.borrow_mut().remove(&k);
                Ok(hv.clone())
            }
            CodeNode::HashMapClear(h) => {
                let hv = h.eval(env)?;
                hv.expect_hashmap()?.borrow_mut().clear();
                Ok(hv.clone())
            }
            CodeNode::HashMapFind { h, value } => {
                let hv = h.eval(env)?;
                let v = value.eval(env)?;
                let result = hv.expect_hashmap()?.borrow().find(&v).cloned().unwrap_or(Value::Null);
                Ok(result)
            }
            CodeNode::HashMapCount { h, value } => {
                let hv = h.eval(env)?;
                let v = value.eval(env)?;
                let result = hv.expect_hashmap()?.borrow().count(&v) as i64;
                Ok(Value::Int(result))
            }
            CodeNode::HashMapKeys(h) => Ok(Value::array(h.eval(env)?.expect_hashmap()?.borrow().keys())),
            CodeNode::HashMapValues(h) => Ok(Value::array(h.eval(env)?.expect_hashmap()?.borrow().values())),
            CodeNode::HashMapItems(h) => Ok(Value::array(h.eval(env)?.expect_hashmap()?.borrow().items())),

            CodeNode::MakePair { first, second } => Ok(Value::pair(first.eval(env)?, second.eval(env)?)),
            CodeNode::PairFirst(p) => Ok(p.eval(env)?.expect_pair()?.first().clone()),
            CodeNode::PairSecond(p) => Ok(p.eval(env)?.expect_pair()?.second().clone()),

            CodeNode::MakeRange { begin, end, step } => {
                let e = end.eval(env)?.expect_int()?;
                let b = match begin {
                    Some(b) => b.eval(env)?.expect_int()?,
                    None => 0,
                };
                let s = match step {
                    Some(s) => s.eval(env)?.expect_int()?,
                    None => if e >= b { 1 } else { -1 },
                };
                Ok(Value::Range(Rc::new(IntegerRange::new(b, e, s)?)))
            }
            CodeNode::RangeBegin(r) => Ok(Value::Int(r.eval(env)?.expect_range()?.begin())),
            CodeNode::RangeEnd(r) => Ok(Value::Int(r.eval(env)?.expect_range()?.end())),
            CodeNode::RangeStep(r) => Ok(Value::Int(r.eval(env)?.expect_range()?.step())),
            CodeNode::RangeLen(r) => Ok(Value::Int(r.eval(env)?.expect_range()?.size() as i64)),
            CodeNode::Expand(r) => {
                let v = r.eval(env)?;
                Ok(Value::array(Sequence::from_vec(iterable_items(&v)?)))
            }

            CodeNode::GenericLen(obj) => {
                let v = obj.eval(env)?;
                Ok(Value::Int(match &v {
                    Value::String(s) => s.borrow().len() as i64,
                    Value::Array(a) => a.borrow().len() as i64,
                    Value::HashMap(h) => h.borrow().len() as i64,
                    Value::Range(r) => r.size() as i64,
                    other => return Err(Error::InvalidOperandType { expected: "String, Array, HashMap or Range".into(), actual: other.type_name().into() }.into()),
                }))
            }
            CodeNode::GenericEmpty(obj) => {
                let v = obj.eval(env)?;
                Ok(Value::Bool(match &v {
                    Value::String(s) => s.borrow().is_empty(),
                    Value::Array(a) => a.borrow().is_empty(),
                    Value::HashMap(h) => h.borrow().is_empty(),
                    Value::Range(r) => r.is_empty(),
                    other => return Err(Error::InvalidOperandType { expected: "String, Array, HashMap or Range".into(), actual: other.type_name().into() }.into()),
                }))
            }
            CodeNode::GenericGet { obj, key, default } => {
                let v = obj.eval(env)?;
                match &v {
                    Value::Array(a) => {
                        let p = usize::try_from(key.eval(env)?.expect_int()?).map_err(|_| Error::OutOfRange("array index".into()))?;
                        Ok(a.borrow().get(p)?.clone())
                    }
                    Value::HashMap(h) => {
                        let k = key.eval(env)?;
                        let d = match default {
                            Some(d) => d.eval(env)?,
                            None => Value::Null,
                        };
                        Ok(h.borrow().get(&k, &d).clone())
                    }
                    Value::String(s) => {
                        let p = key.eval(env)?.expect_int()?;
                        Ok(Value::Char(char_at(&s.borrow(), p)?))
                    }
                    other => Err(Error::InvalidOperandType { expected: "Array, HashMap or String".into(), actual: other.type_name().into() }.into()),
                }
            }
            CodeNode::GenericSet { obj, key, value } => {
                let v = obj.eval(env)?;
                let val = value.eval(env)?;
                match &v {
                    Value::Array(a) => {
                        let p = usize::try_from(key.eval(env)?.expect_int()?).map_err(|_| Error::OutOfRange("array index".into()))?;
                        a.borrow_mut().set(p, val.clone())?;
                    }
                    Value::HashMap(h) => {
                        let k = key.eval(env)?;
                        h.borrow_mut().set(k, val.clone());
                    }
                    Value::String(s) => {
                        let p = key.eval(env)?.expect_int()?;
                        set_char_at(&mut s.borrow_mut(), p, val.expect_char()?)?;
                    }
                    other => return Err(Error::InvalidOperandType { expected: "Array, HashMap or String".into(), actual: other.type_name().into() }.into()),
                }
                Ok(val)
            }
            CodeNode::GenericClear(obj) => {
                let v = obj.eval(env)?;
                match &v {
                    Value::Array(a) => a.borrow_mut().clear(),
                    Value::HashMap(h) => h.borrow_mut().clear(),
                    Value::String(s) => s.borrow_mut().clear(),
                    other => return Err(Error::InvalidOperandType { expected: "String, Array or HashMap".into(), actual: other.type_name().into() }.into()),
                }
                Ok(v)
            }
            CodeNode::GenericFind { obj, value, pos } => {
                let v = obj.eval(env)?;
                let needle = value.eval(env)?;
                match &v {
                    Value::Array(a) => {
                        let start = match pos {
                            Some(p) => usize::try_from(p.eval(env)?.expect_int()?).unwrap_or(0),
                            None => 0,
                        };
                        Ok(Value::Int(a.borrow().find(&needle, start).map(|i| i as i64).unwrap_or(-1)))
                    }
                    Value::HashMap(h) => Ok(h.borrow().find(&needle).cloned().unwrap_or(Value::Null)),
                    Value::String(s) => {
                        let start = match pos {
                            Some(p) => usize::try_from(p.eval(env)?.expect_int()?).unwrap_or(0),
                            None => 0,
                        };
                        let target = needle.expect_char()? as char;
                        Ok(Value::Int(
                            s.borrow().chars().skip(start).position(|c| c == target).map(|i| (i + start) as i64).unwrap_or(-1),
                        ))
                    }
                    other => Err(Error::InvalidOperandType { expected: "String, Array or HashMap".into(), actual: other.type_name().into() }.into()),
                }
            }
            CodeNode::GenericCount { obj, value } => {
                let v = obj.eval(env)?;
                let needle = value.eval(env)?;
                Ok(Value::Int(match &v {
                    Value::Array(a) => a.borrow().count(&needle) as i64,
                    Value::HashMap(h) => h.borrow().count(&needle) as i64,
                    Value::String(s) => {
                        let target = needle.expect_char()? as char;
                        s.borrow().chars().filter(|&c| c == target).count() as i64
                    }
                    other => return Err(Error::InvalidOperandType { expected: "String, Array or HashMap".into(), actual: other.type_name().into() }.into()),
                }))
            }
            CodeNode::GenericSort { obj, desc } => {
                let v = obj.eval(env)?;
                let descending = match desc {
                    Some(d) => d.eval(env)?.expect_bool()?,
                    None => false,
                };
                match &v {
                    Value::Array(a) => a.borrow_mut().sort(descending),
                    Value::String(s) => {
                        let mut chars: Vec<char> = s.borrow().chars().collect();
                        chars.sort();
                        if descending {
                            chars.reverse();
                        }
                        *s.borrow_mut() = chars.into_iter().collect();
                    }
                    other => return Err(Error::InvalidOperandType { expected: "String or Array".into(), actual: other.type_name().into() }.into()),
                }
                Ok(v)
            }
            CodeNode::GenericReverse(obj) => {
                let v = obj.eval(env)?;
                match &v {
                    Value::Array(a) => a.borrow_mut().reverse(),
                    Value::String(s) => {
                        let reversed: String = s.borrow().chars().rev().collect();
                        *s.borrow_mut() = reversed;
                    }
                    other => return Err(Error::InvalidOperandType { expected: "String or Array".into(), actual: other.type_name().into() }.into()),
                }
                Ok(v)
            }
            CodeNode::GenericSum(obj) => {
                let v = obj.eval(env)?;
                let a = v.expect_array()?;
                let a = a.borrow();
                let mut is_real = false;
                let mut total = 0.0f64;
                for item in a.iter() {
                    match item {
                        Value::Int(i) => total += *i as f64,
                        Value::Real(r) => {
                            is_real = true;
                            total += r;
                        }
                        other => return Err(Error::InvalidOperandType { expected: "Integer or Real".into(), actual: other.type_name().into() }.into()),
                    }
                }
                Ok(if is_real { Value::Real(total) } else { Value::Int(total as i64) })
            }
            CodeNode::GenericApply { obj, closure } => {
                let v = obj.eval(env)?;
                let a = v.expect_array()?;
                let closure_val = closure.eval(env)?;
                let c = closure_val.expect_closure()?.clone();
                let mut out = Vec::with_capacity(a.borrow().len());
                for item in a.borrow().iter() {
                    out.push(call_closure(&c, std::slice::from_ref(item))?);
                }
                Ok(Value::array(Sequence::from_vec(out)))
            }

            CodeNode::Random(max) => {
                let n: i64 = rand::Rng::gen_range(&mut rand::thread_rng(), 0..i64::MAX);
                match max {
                    Some(m) => {
                        let bound = m.eval(env)?.expect_int()?;
                        if bound < 0 {
                            return Err(Error::invalid_expression("max negative").into());
                        }
                        Ok(Value::Int(if bound == 0 { 0 } else { n % (bound + 1) }))
                    }
                    None => Ok(Value::Int(n)),
                }
            }
            CodeNode::HashOf(expr) => {
                use std::hash::{Hash, Hasher};
                let v = expr.eval(env)?;
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                v.hash(&mut hasher);
                let h = hasher.finish() % (i64::MAX as u64 + 1);
                Ok(Value::Int(h as i64))
            }
            CodeNode::TimeIt { expr, count, summary } => {
                let n = match count {
                    Some(c) => c.eval(env)?.expect_int()?,
                    None => 1,
                };
                if !(1..=1000).contains(&n) {
                    return Err(Error::OutOfRange(format!("timeit count {n}")).into());
                }
                let print_summary = match summary {
                    Some(s) => s.eval(env)?.expect_bool()?,
                    None => false,
                };
                let mut durations = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let start = std::time::Instant::now();
                    expr.eval(env)?;
                    durations.push(start.elapsed().as_micros() as f64);
                }
                let sum: f64 = durations.iter().sum();
                let mean = sum / durations.len() as f64;
                if print_summary {
                    let min = durations.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = durations.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    println!("count={n} sum={sum} mean={mean} min={min} max={max}");
                }
                Ok(Value::Real(mean))
            }

            CodeNode::FileOpen { path, mode } => {
                let p = path.eval(env)?;
                let p = p.expect_string()?.borrow().clone();
                let m = mode.eval(env)?.expect_char()?;
                let handle = FileHandle::open(p, FileMode::from_char(m as char)?)?;
                Ok(Value::File(Rc::new(RefCell::new(handle))))
            }
            CodeNode::FileClose(f) => {
                let fv = f.eval(env)?;
                fv.expect_file()?.borrow_mut().close();
                Ok(Value::Null)
            }
            CodeNode::FileFlush(f) => {
                let fv = f.eval(env)?;
                fv.expect_file()?.borrow_mut().flush()?;
                Ok(Value::Null)
            }
            CodeNode::FileIsOpen(f) => Ok(Value::Bool(f.eval(env)?.expect_file()?.borrow().is_open())),
            CodeNode::FileName(f) => Ok(Value::str(f.eval(env)?.expect_file()?.borrow().filename().to_string())),
            CodeNode::FileModeOf(f) => Ok(Value::Char(f.eval(env)?.expect_file()?.borrow().mode().to_char() as u8)),
            CodeNode::FileRead(f) => {
                let fv = f.eval(env)?;
                let read = fv.expect_file()?.borrow_mut().read()?;
                match read {
                    Some(c) => Ok(Value::Char(c as u8)),
                    None => Ok(Value::Null),
                }
            }
            CodeNode::FileReadLn(f) => {
                let fv = f.eval(env)?;
                let read = fv.expect_file()?.borrow_mut().readln()?;
                match read {
                    Some(s) => Ok(Value::str(s)),
                    None => Ok(Value::Null),
                }
            }
            CodeNode::FileWrite { file, value } => {
                let fv = file.eval(env)?;
                let v = value.eval(env)?;
                let mut text = String::new();
                let _ = v.print_plain(&mut text);
                fv.expect_file()?.borrow_mut().write_str(&text)?;
                Ok(Value::Null)
            }
            CodeNode::FileWriteLn { file, value } => {
                let fv = file.eval(env)?;
                let v = value.eval(env)?;
                let mut text = String::new();
                let _ = v.print_plain(&mut text);
                fv.expect_file()?.borrow_mut().writeln_str(&text)?;
                Ok(Value::Null)
            }
            CodeNode::FileExists(path) => {
                let p = path.eval(env)?;
                let p = p.expect_string()?.borrow().clone();
                Ok(Value::Bool(std::path::Path::new(&p).exists()))
            }
            CodeNode::FileRemove(path) => {
                let p = path.eval(env)?;
                let p = p.expect_string()?.borrow().clone();
                match std::fs::remove_file(&p) {
                    Ok(()) => Ok(Value::Bool(true)),
                    Err(_) => Ok(Value::Bool(false)),
                }
            }

            CodeNode::ImportModule { name, as_name } => {
                let store = env.module_store();
                ModuleStore::import_module(store, name, as_name.as_deref(), env)?;
                Ok(Value::Null)
            }
            CodeNode::FromModuleImport { name, names } => {
                let store = env.module_store();
                ModuleStore::import_names(store, name, names, env)?;
                Ok(Value::Null)
            }
        }
    }
}

fn eval_seq(exprs: &[CodeNode], env: &Env) -> EvalResult<Value> {
    let mut result = Value::Null;
    for e in exprs {
        result = e.eval(env)?;
    }
    Ok(result)
}

fn eval_arith(op: ArithOp, args: &[CodeNode], env: &Env) -> EvalResult<Value> {
    let mut iter = args.iter();
    let first = iter.next().expect("arith op requires at least one operand").eval(env)?;
    let mut acc = first;
    for next in iter {
        let rhs = next.eval(env)?;
        acc = arith_binary(op, &acc, &rhs)?;
    }
    Ok(acc)
}

fn arith_binary(op: ArithOp, lhs: &Value, rhs: &Value) -> crate::error::Result<Value> {
    if op == ArithOp::Pow {
        let l = lhs.as_real_value_checked()?;
        let r = rhs.as_real_value_checked()?;
        return Ok(Value::Real(l.powf(r)));
    }
    if op == ArithOp::Mod {
        let l = lhs.expect_int()?;
        let r = rhs.expect_int()?;
        if r == 0 {
            return Err(Error::DivByZero);
        }
        return Ok(Value::Int(l % r));
    }
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => match op {
            ArithOp::Add => Ok(Value::Int(a + b)),
            ArithOp::Sub => Ok(Value::Int(a - b)),
            ArithOp::Mul => Ok(Value::Int(a * b)),
            ArithOp::Div => {
                if *b == 0 {
                    Err(Error::DivByZero)
                } else {
                    Ok(Value::Int(a / b))
                }
            }
            ArithOp::Mod | ArithOp::Pow => unreachable!(),
        },
        (a, b) if a.is_number() && b.is_number() => {
            let a = a.as_real_value_checked()?;
            let b = b.as_real_value_checked()?;
            match op {
                ArithOp::Add => Ok(Value::Real(a + b)),
                ArithOp::Sub => Ok(Value::Real(a - b)),
                ArithOp::Mul => Ok(Value::Real(a * b)),
                ArithOp::Div => {
                    if crate::util::is_zero(b) {
                        Err(Error::DivByZero)
                    } else {
                        Ok(Value::Real(a / b))
                    }
                }
                ArithOp::Mod | ArithOp::Pow => unreachable!(),
            }
        }
        (a, b) => {
            let (expected, actual) = if a.is_number() { ("Real".into(), b.type_name().into()) } else { ("Integer".into(), a.type_name().into()) };
            Err(Error::InvalidOperandType { expected, actual })
        }
    }
}

fn eval_comp(op: CompOp, lhs: &CodeNode, rhs: &CodeNode, env: &Env) -> EvalResult<Value> {
    let l = lhs.eval(env)?;
    let r = rhs.eval(env)?;
    if l.ty() != r.ty() && !(l.is_number() && r.is_number()) {
        return Err(Error::IncompatibleTypes { type1: l.type_name().into(), type2: r.type_name().into() }.into());
    }
    let ord = l.partial_cmp(&r);
    Ok(Value::Bool(match op {
        CompOp::Eq => l == r,
        CompOp::Ne => l != r,
        CompOp::Lt => matches!(ord, Some(std::cmp::Ordering::Less)),
        CompOp::Gt => matches!(ord, Some(std::cmp::Ordering::Greater)),
        CompOp::Le => matches!(ord, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        CompOp::Ge => matches!(ord, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
    }))
}

fn eval_logic(op: LogicOp, args: &[CodeNode], env: &Env) -> EvalResult<Value> {
    match op {
        LogicOp::And => {
            for a in args {
                let v = a.eval(env)?;
                if !v.expect_bool()? {
                    return Ok(v);
                }
            }
            Ok(Value::Bool(true))
        }
        LogicOp::Or => {
            for a in args {
                let v = a.eval(env)?;
                if v.expect_bool()? {
                    return Ok(v);
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

fn eval_application(callee: &ApplicationCallee, args: &[CodeNode], env: &Env) -> EvalResult<Value> {
    let closure_val = match callee {
        ApplicationCallee::Name(name) => env.get(name)?,
        ApplicationCallee::Direct(expr, cache) => {
            if cache.borrow().is_none() {
                let v = expr.eval(env)?;
                *cache.borrow_mut() = Some(v);
            }
            cache.borrow().clone().unwrap()
        }
    };
    let closure = closure_val.expect_closure()?.clone();
    let call_env = Env::child(env);
    let mut arg_values = Vec::with_capacity(args.len());
    for a in args {
        arg_values.push(a.eval(&call_env)?);
    }
    call_closure(&closure, &arg_values)
}

fn call_closure(closure: &Closure, args: &[Value]) -> EvalResult<Value> {
    if closure.params().len() != args.len() {
        return Err(Error::InvalidArgsSize { params_size: closure.params().len(), args_size: args.len() }.into());
    }
    let body_env = Env::child(closure.env());
    for (name, value) in closure.params().iter().zip(args) {
        body_env.def(name.clone(), value.clone())?;
    }
    closure.body().eval(&body_env)
}

fn iterable_items(v: &Value) -> crate::error::Result<Vec<Value>> {
    match v {
        Value::String(s) => Ok(s.borrow().chars().map(|c| Value::Char(c as u8)).collect()),
        Value::Array(a) => Ok(a.borrow().iter().cloned().collect()),
        Value::HashMap(h) => Ok(h.borrow().values().iter().cloned().collect()),
        Value::Range(r) => Ok(r.iter().map(Value::Int).collect()),
        Value::File(f) => {
            let mut out = Vec::new();
            let mut handle = f.borrow_mut();
            while let Some(line) = handle.readln()? {
                out.push(Value::str(line));
            }
            Ok(out)
        }
        other => Err(Error::InvalidOperandType { expected: "String, Array, HashMap, Range or File".into(), actual: other.type_name().into() }),
    }
}

fn pair_or_two_element_array(v: &Value) -> crate::error::Result<(Value, Value)> {
    match v {
        Value::Pair(p) => Ok((p.first().clone(), p.second().clone())),
        Value::Array(a) => {
            let a = a.borrow();
            if a.len() != 2 {
                return Err(Error::invalid_expression("Wrong array size, expecting 2"));
            }
            Ok((a.get(0)?.clone(), a.get(1)?.clone()))
        }
        other => Err(Error::InvalidOperandType { expected: "Pair or Array".into(), actual: other.type_name().into() }),
    }
}

fn char_at(s: &str, pos: i64) -> crate::error::Result<u8> {
    let p = usize::try_from(pos).map_err(|_| Error::OutOfRange(format!("string index {pos}")))?;
    s.as_bytes().get(p).copied().ok_or_else(|| Error::OutOfRange(format!("string index {p}")))
}

fn set_char_at(s: &mut String, pos: i64, c: u8) -> crate::error::Result<()> {
    let p = usize::try_from(pos).map_err(|_| Error::OutOfRange(format!("string index {pos}")))?;
    let mut bytes: Vec<u8> = s.as_bytes().to_vec();
    let slot = bytes.get_mut(p).ok_or_else(|| Error::OutOfRange(format!("string index {p}")))?;
    *slot = c;
    *s = std::string::String::from_utf8(bytes).map_err(|_| Error::invalid_expression("invalid utf8 after strset"))?;
    Ok(())
}

impl Value {
    /// Literals holding a `String` are deep-cloned on every evaluation so
    /// that mutating the evaluated value never reaches back into the AST
    /// literal itself.
    fn clone_deep_literal(&self) -> Value {
        match self {
            Value::String(s) => Value::str(s.borrow().clone()),
            other => other.clone(),
        }
    }

    fn as_real_value_checked(&self) -> crate::error::Result<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Real(r) => Ok(*r),
            other => Err(Error::InvalidOperandType { expected: "Integer or Real".into(), actual: other.type_name().into() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: Value) -> CodeNode {
        CodeNode::Literal(v)
    }

    #[test]
    fn arith_add_promotes_to_real_on_mixed_operands() {
        let env = Env::new();
        let node = CodeNode::ArithOp { op: ArithOp::Add, args: vec![lit(Value::Int(1)), lit(Value::Real(2.5))] };
        assert_eq!(node.eval(&env).unwrap(), Value::Real(3.5));
    }

    #[test]
    fn mod_rejects_real_operand() {
        let env = Env::new();
        let node = CodeNode::ArithOp { op: ArithOp::Mod, args: vec![lit(Value::Int(5)), lit(Value::Real(2.0))] };
        assert_matches::assert_matches!(node.eval(&env), Err(Signal::Error(Error::InvalidOperandType { .. })));
    }

    #[test]
    fn real_div_by_tiny_nonzero_is_div_by_zero() {
        let env = Env::new();
        let node = CodeNode::ArithOp { op: ArithOp::Div, args: vec![lit(Value::Real(1.0)), lit(Value::Real(1e-15))] };
        assert_matches::assert_matches!(node.eval(&env), Err(Signal::Error(Error::DivByZero)));
    }

    #[test]
    fn pow_always_returns_real() {
        let env = Env::new();
        let node = CodeNode::ArithOp { op: ArithOp::Pow, args: vec![lit(Value::Int(2)), lit(Value::Int(3))] };
        assert_eq!(node.eval(&env).unwrap(), Value::Real(8.0));
    }

    #[test]
    fn comp_across_numeric_types_allowed() {
        let env = Env::new();
        let node = CodeNode::CompOp { op: CompOp::Lt, lhs: Box::new(lit(Value::Int(1))), rhs: Box::new(lit(Value::Real(2.0))) };
        assert_eq!(node.eval(&env).unwrap(), Value::Bool(true));
    }

    #[test]
    fn comp_across_other_types_is_incompatible() {
        let env = Env::new();
        let node = CodeNode::CompOp { op: CompOp::Eq, lhs: Box::new(lit(Value::Int(1))), rhs: Box::new(lit(Value::str("1"))) };
        assert_matches::assert_matches!(node.eval(&env), Err(Signal::Error(Error::IncompatibleTypes { .. })));
    }

    #[test]
    fn loop_break_unwinds_to_null() {
        let env = Env::new();
        let node = CodeNode::Loop {
            decl: None,
            cond: Box::new(lit(Value::Bool(true))),
            next: None,
            body: Box::new(CodeNode::Break),
        };
        assert_eq!(node.eval(&env).unwrap(), Value::Null);
    }

    #[test]
    fn block_scopes_defines_to_itself() {
        let env = Env::new();
        env.def("x", Value::Int(1)).unwrap();
        let node = CodeNode::Block(vec![
            CodeNode::Define { name: "x".into(), expr: Box::new(lit(Value::Int(2))) },
            CodeNode::Variable("x".into()),
        ]);
        assert_eq!(node.eval(&env).unwrap(), Value::Int(2));
        assert_eq!(env.get("x").unwrap(), Value::Int(1));
    }

    #[test]
    fn closure_captures_defining_environment() {
        let env = Env::new();
        env.def("n", Value::Int(7)).unwrap();
        let closure = CodeNode::LambdaExpr { params: vec![], body: Rc::new(CodeNode::Variable("n".into())) };
        let made = closure.eval(&env).unwrap();
        let call = CodeNode::Application {
            callee: ApplicationCallee::Direct(Box::new(lit(made)), RefCell::new(None)),
            args: vec![],
        };
        assert_eq!(call.eval(&env).unwrap(), Value::Int(7));
    }

    #[test]
    fn string_cat_mutates_in_place_through_aliases() {
        let env = Env::new();
        let a = Value::str("x");
        env.def("a", a.clone()).unwrap();
        env.def("b", a).unwrap();
        let node = CodeNode::StringCat { s: Box::new(CodeNode::Variable("b".into())), other: Box::new(lit(Value::str("y"))) };
        node.eval(&env).unwrap();
        assert_eq!(env.get("a").unwrap().to_string(), "\"xy\"");
    }

    #[test]
    fn string_find_returns_negative_one_on_miss() {
        let env = Env::new();
        let node = CodeNode::StringFind { s: Box::new(lit(Value::str("abc"))), target: Box::new(lit(Value::Char(b'z'))), pos: None };
        assert_eq!(node.eval(&env).unwrap(), Value::Int(-1));
    }

    #[test]
    fn make_instance_ignores_unknown_init_keys() {
        let env = Env::new();
        let ty = StructType::new("P".into(), vec!["n".into()]);
        env.def("P", Value::UserType(Rc::new(ty))).unwrap();
        let node = CodeNode::MakeInstance {
            name: "P".into(),
            init: vec![("n".into(), lit(Value::str("Jo"))), ("bogus".into(), lit(Value::Int(1)))],
        };
        let v = node.eval(&env).unwrap();
        let obj = v.expect_user_object().unwrap();
        assert_eq!(*obj.borrow().get("n").unwrap(), Value::str("Jo"));
    }

    #[test]
    fn foreach_over_range_sums() {
        let env = Env::new();
        env.def("s", Value::Int(0)).unwrap();
        let node = CodeNode::Foreach {
            var: "i".into(),
            iterable: Box::new(CodeNode::MakeRange { begin: Some(Box::new(lit(Value::Int(1)))), end: Box::new(lit(Value::Int(11))), step: None }),
            body: Box::new(CodeNode::Assign {
                name: "s".into(),
                expr: Box::new(CodeNode::ArithOp { op: ArithOp::Add, args: vec![CodeNode::Variable("s".into()), CodeNode::Variable("i".into())] }),
            }),
        };
        node.eval(&env).unwrap();
        assert_eq!(env.get("s").unwrap(), Value::Int(55));
    }
}
