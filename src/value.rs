//! The runtime value model: a tagged sum type over every kind of data an
//! Ishlang program can hold.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::file_io::FileHandle;
use crate::hashtable::Hashtable;
use crate::instance::Instance;
use crate::integer_range::IntegerRange;
use crate::lambda::Closure;
use crate::sequence::Sequence;
use crate::struct_type::StructType;
use crate::value_pair::ValuePair;

/// A runtime value. Scalars and `Pair`/`Range` are cheap to copy by value;
/// `String`/`Array`/`HashMap`/`UserObject`/`File` carry `Rc<RefCell<_>>`
/// interior mutability so that assignment aliases and only the explicit
/// [`Value::clone_deep`] operation produces an independent copy.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Char(u8),
    Bool(bool),
    Pair(Rc<ValuePair>),
    String(Rc<RefCell<String>>),
    Closure(Rc<Closure>),
    UserType(Rc<StructType>),
    UserObject(Rc<RefCell<Instance>>),
    Array(Rc<RefCell<Sequence>>),
    HashMap(Rc<RefCell<Hashtable>>),
    Range(Rc<IntegerRange>),
    File(Rc<RefCell<FileHandle>>),
}

/// Type tags, also used as the vocabulary for `istypeof`/`typename`/`astype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    None,
    Int,
    Real,
    Char,
    Bool,
    Pair,
    String,
    Closure,
    UserType,
    UserObject,
    Array,
    HashMap,
    Range,
    File,
}

impl Type {
    pub fn name(self) -> &'static str {
        match self {
            Type::None => "none",
            Type::Int => "int",
            Type::Real => "real",
            Type::Char => "char",
            Type::Bool => "bool",
            Type::Pair => "pair",
            Type::String => "string",
            Type::Closure => "closure",
            Type::UserType => "usertype",
            Type::UserObject => "userobject",
            Type::Array => "array",
            Type::HashMap => "hashmap",
            Type::Range => "range",
            Type::File => "file",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "none" => Type::None,
            "int" => Type::Int,
            "real" => Type::Real,
            "char" => Type::Char,
            "bool" => Type::Bool,
            "pair" => Type::Pair,
            "string" => Type::String,
            "closure" => Type::Closure,
            "usertype" => Type::UserType,
            "userobject" => Type::UserObject,
            "array" => Type::Array,
            "hashmap" => Type::HashMap,
            "range" => Type::Range,
            "file" => Type::File,
            other => return Err(Error::invalid_expression_with("unknown value type", other)),
        })
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::String(Rc::new(RefCell::new(s.into())))
    }

    pub fn array(seq: Sequence) -> Value {
        Value::Array(Rc::new(RefCell::new(seq)))
    }

    pub fn hashmap(ht: Hashtable) -> Value {
        Value::HashMap(Rc::new(RefCell::new(ht)))
    }

    pub fn user_object(inst: Instance) -> Value {
        Value::UserObject(Rc::new(RefCell::new(inst)))
    }

    pub fn closure(c: Closure) -> Value {
        Value::Closure(Rc::new(c))
    }

    pub fn pair(first: Value, second: Value) -> Value {
        Value::Pair(Rc::new(ValuePair::new(first, second)))
    }

    pub fn ty(&self) -> Type {
        match self {
            Value::Null => Type::None,
            Value::Int(_) => Type::Int,
            Value::Real(_) => Type::Real,
            Value::Char(_) => Type::Char,
            Value::Bool(_) => Type::Bool,
            Value::Pair(_) => Type::Pair,
            Value::String(_) => Type::String,
            Value::Closure(_) => Type::Closure,
            Value::UserType(_) => Type::UserType,
            Value::UserObject(_) => Type::UserObject,
            Value::Array(_) => Type::Array,
            Value::HashMap(_) => Type::HashMap,
            Value::Range(_) => Type::Range,
            Value::File(_) => Type::File,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.ty().name()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Real(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_char(&self) -> bool {
        matches!(self, Value::Char(_))
    }

    pub fn as_int_value(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            _ => 0,
        }
    }

    pub fn as_real_value(&self) -> f64 {
        match self {
            Value::Real(r) => *r,
            Value::Int(i) => *i as f64,
            _ => 0.0,
        }
    }

    pub fn as_bool_value(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            _ => false,
        }
    }

    pub fn expect_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::InvalidOperandType { expected: "Boolean".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(Error::InvalidOperandType { expected: "Integer".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_char(&self) -> Result<u8> {
        match self {
            Value::Char(c) => Ok(*c),
            other => Err(Error::InvalidOperandType { expected: "Character".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_string(&self) -> Result<&Rc<RefCell<String>>> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(Error::InvalidOperandType { expected: "String".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_array(&self) -> Result<&Rc<RefCell<Sequence>>> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(Error::InvalidOperandType { expected: "Array".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_hashmap(&self) -> Result<&Rc<RefCell<Hashtable>>> {
        match self {
            Value::HashMap(h) => Ok(h),
            other => Err(Error::InvalidOperandType { expected: "HashMap".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_range(&self) -> Result<&Rc<IntegerRange>> {
        match self {
            Value::Range(r) => Ok(r),
            other => Err(Error::InvalidOperandType { expected: "Range".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_pair(&self) -> Result<&Rc<ValuePair>> {
        match self {
            Value::Pair(p) => Ok(p),
            other => Err(Error::InvalidOperandType { expected: "Pair".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_closure(&self) -> Result<&Rc<Closure>> {
        match self {
            Value::Closure(c) => Ok(c),
            other => Err(Error::InvalidExpressionType { expected: "Closure".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_user_type(&self) -> Result<&Rc<StructType>> {
        match self {
            Value::UserType(t) => Ok(t),
            other => Err(Error::InvalidExpressionType { expected: "UserType".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_user_object(&self) -> Result<&Rc<RefCell<Instance>>> {
        match self {
            Value::UserObject(o) => Ok(o),
            other => Err(Error::InvalidExpressionType { expected: "UserObject".into(), actual: other.type_name().into() }),
        }
    }

    pub fn expect_file(&self) -> Result<&Rc<RefCell<FileHandle>>> {
        match self {
            Value::File(f) => Ok(f),
            other => Err(Error::InvalidOperandType { expected: "File".into(), actual: other.type_name().into() }),
        }
    }

    pub fn as_int(&self) -> Result<Value> {
        match self {
            Value::Int(_) => Ok(self.clone()),
            Value::Real(r) => Ok(Value::Int(*r as i64)),
            Value::Char(c) => Ok(Value::Int(*c as i64)),
            Value::Bool(b) => Ok(Value::Int(if *b { 1 } else { 0 })),
            Value::String(s) => s
                .borrow()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Error::InvalidAsType { from: self.type_name().into(), to: "int".into() }),
            _ => Err(Error::InvalidAsType { from: self.type_name().into(), to: "int".into() }),
        }
    }

    pub fn as_real(&self) -> Result<Value> {
        match self {
            Value::Int(i) => Ok(Value::Real(*i as f64)),
            Value::Real(_) => Ok(self.clone()),
            Value::Char(c) => Ok(Value::Real(*c as f64)),
            Value::Bool(b) => Ok(Value::Real(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => s
                .borrow()
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| Error::InvalidAsType { from: self.type_name().into(), to: "real".into() }),
            _ => Err(Error::InvalidAsType { from: self.type_name().into(), to: "real".into() }),
        }
    }

    pub fn as_char(&self) -> Result<Value> {
        match self {
            Value::Int(i) => Ok(Value::Char(*i as u8)),
            Value::Real(r) => Ok(Value::Char(*r as i64 as u8)),
            Value::Char(_) => Ok(self.clone()),
            Value::Bool(b) => Ok(Value::Char(if *b { b't' } else { b'f' })),
            Value::String(s) => {
                let s = s.borrow();
                Ok(Value::Char(s.as_bytes().first().copied().unwrap_or(0)))
            }
            _ => Err(Error::InvalidAsType { from: self.type_name().into(), to: "char".into() }),
        }
    }

    pub fn as_bool(&self) -> Result<Value> {
        let fail = || Error::InvalidAsType { from: self.type_name().into(), to: "bool".into() };
        match self {
            Value::Int(i) => Ok(Value::Bool(*i != 0)),
            Value::Real(r) => Ok(Value::Bool(*r as i64 != 0)),
            Value::Char(c) => match c {
                b't' => Ok(Value::Bool(true)),
                b'f' => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            Value::Bool(_) => Ok(self.clone()),
            Value::String(s) => match s.borrow().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        }
    }

    pub fn as_string(&self) -> Result<Value> {
        match self {
            Value::Int(i) => Ok(Value::str(i.to_string())),
            Value::Real(r) => Ok(Value::str(format!("{r:?}"))),
            Value::Char(c) => Ok(Value::str((*c as char).to_string())),
            Value::Bool(b) => Ok(Value::str(if *b { "true" } else { "false" })),
            Value::String(_) => Ok(self.clone()),
            _ => Err(Error::InvalidAsType { from: self.type_name().into(), to: "string".into() }),
        }
    }

    pub fn as_type(&self, ty: Type) -> Result<Value> {
        if self.ty() == ty {
            return Ok(self.clone());
        }
        match ty {
            Type::Int => self.as_int(),
            Type::Real => self.as_real(),
            Type::Char => self.as_char(),
            Type::Bool => self.as_bool(),
            Type::String => self.as_string(),
            _ => Err(Error::InvalidAsType { from: self.type_name().into(), to: ty.name().into() }),
        }
    }

    /// The only deep-copy path: Pair/scalars are returned unchanged (Pair is
    /// immutable so sharing it is indistinguishable from copying it);
    /// String/Array/HashMap/UserObject/Closure/UserType allocate a fresh
    /// cell; File rejects cloning outright.
    pub fn clone_deep(&self) -> Result<Value> {
        match self {
            Value::Null | Value::Int(_) | Value::Real(_) | Value::Char(_) | Value::Bool(_) | Value::Pair(_) | Value::Range(_) => {
                Ok(self.clone())
            }
            Value::String(s) => Ok(Value::str(s.borrow().clone())),
            Value::Closure(c) => Ok(Value::Closure(Rc::new((**c).clone()))),
            Value::UserType(t) => Ok(Value::UserType(Rc::new((**t).clone()))),
            Value::UserObject(o) => Ok(Value::user_object(o.borrow().clone())),
            Value::Array(a) => Ok(Value::array(a.borrow().clone())),
            Value::HashMap(h) => Ok(Value::hashmap(h.borrow().clone())),
            Value::File(_) => Err(Error::invalid_expression("cannot clone file")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Char(c) => write!(f, "'{}'", *c as char),
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Pair(p) => write!(f, "{p}"),
            Value::String(s) => write!(f, "\"{}\"", s.borrow()),
            Value::Closure(_) => write!(f, "[Lambda]"),
            Value::UserType(t) => write!(f, "{t}"),
            Value::UserObject(o) => write!(f, "{}", o.borrow()),
            Value::Array(a) => write!(f, "{}", a.borrow()),
            Value::HashMap(h) => write!(f, "{}", h.borrow()),
            Value::Range(r) => write!(f, "{r}"),
            Value::File(h) => write!(f, "{}", h.borrow()),
        }
    }
}

impl Value {
    /// The `print`/`println` rendering, distinct from `Display`: strings and
    /// chars show their raw contents rather than a quoted form.
    pub fn print_plain(&self, out: &mut impl fmt::Write) -> fmt::Result {
        match self {
            Value::Char(c) => write!(out, "{}", *c as char),
            Value::String(s) => write!(out, "{}", s.borrow()),
            _ => write!(out, "{self}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, rhs: &Self) -> bool {
        use Value::*;
        match (self, rhs) {
            (Int(a), Int(b)) => a == b,
            (Real(a), Real(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Pair(a), Pair(b)) => a == b,
            (String(a), String(b)) => *a.borrow() == *b.borrow(),
            (Closure(a), Closure(b)) => a == b,
            (UserType(a), UserType(b)) => a == b,
            (UserObject(a), UserObject(b)) => *a.borrow() == *b.borrow(),
            (Array(a), Array(b)) => *a.borrow() == *b.borrow(),
            (HashMap(a), HashMap(b)) => *a.borrow() == *b.borrow(),
            (Range(a), Range(b)) => a == b,
            (File(a), File(b)) => *a.borrow() == *b.borrow(),
            (Null, Null) => true,
            _ if self.is_number() && rhs.is_number() => self.as_real_value() == rhs.as_real_value(),
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, rhs: &Self) -> Option<std::cmp::Ordering> {
        use Value::*;
        if std::mem::discriminant(self) == std::mem::discriminant(rhs) {
            return match (self, rhs) {
                (Int(a), Int(b)) => a.partial_cmp(b),
                (Real(a), Real(b)) => a.partial_cmp(b),
                (Char(a), Char(b)) => a.partial_cmp(b),
                (Bool(a), Bool(b)) => a.partial_cmp(b),
                (Pair(a), Pair(b)) => a.partial_cmp(b),
                (String(a), String(b)) => a.borrow().partial_cmp(&b.borrow()),
                (Closure(_), Closure(_)) => None,
                (UserType(_), UserType(_)) => None,
                (UserObject(_), UserObject(_)) => None,
                (Array(a), Array(b)) => a.borrow().partial_cmp(&b.borrow()),
                (HashMap(a), HashMap(b)) => a.borrow().partial_cmp(&b.borrow()),
                (Range(a), Range(b)) => a.partial_cmp(b),
                (File(_), File(_)) => None,
                (Null, Null) => None,
                _ => None,
            };
        }
        if self.is_number() && rhs.is_number() {
            return self.as_real_value().partial_cmp(&rhs.as_real_value());
        }
        None
    }
}

impl Eq for Value {}

/// Hashing mirrors the source's per-type scheme: pointer identity for
/// reference-shared compound values, structural hashing for scalars,
/// `Pair`, `Range`, and `File` (hashed by filename, matching
/// `value.cpp`'s `std::hash<std::string>{}(value.file().filename())`).
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(i) => i.hash(state),
            Value::Real(r) => r.to_bits().hash(state),
            Value::Char(c) => c.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Pair(p) => {
                p.first().hash(state);
                p.second().hash(state);
            }
            Value::String(s) => s.borrow().hash(state),
            Value::Closure(c) => (Rc::as_ptr(c) as usize).hash(state),
            Value::UserType(t) => (Rc::as_ptr(t) as usize).hash(state),
            Value::UserObject(o) => (Rc::as_ptr(o) as usize).hash(state),
            Value::Array(a) => (Rc::as_ptr(a) as usize).hash(state),
            Value::HashMap(h) => (Rc::as_ptr(h) as usize).hash(state),
            Value::Range(r) => {
                r.begin().hash(state);
                r.end().hash(state);
            }
            Value::File(f) => f.borrow().filename().hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_numeric_equality_promotes_to_real() {
        assert_eq!(Value::Int(2), Value::Real(2.0));
    }

    #[test]
    fn string_clone_is_independent_copy() {
        let a = Value::str("x");
        let b = a.clone();
        let c = a.clone_deep().unwrap();
        if let Value::String(s) = &b {
            *s.borrow_mut() = "y".to_string();
        }
        assert_eq!(a.to_string(), "\"y\"");
        assert_eq!(c.to_string(), "\"x\"");
    }

    #[test]
    fn pair_clone_reuses_same_handle() {
        let a = Value::pair(Value::Int(1), Value::Int(2));
        let b = a.clone_deep().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn file_clone_is_rejected() {
        let f = Value::File(Rc::new(RefCell::new(
            FileHandle::open("/dev/null".into(), crate::file_io::FileMode::Write).unwrap(),
        )));
        assert_matches::assert_matches!(f.clone_deep(), Err(Error::InvalidExpression { .. }));
    }

    #[test]
    fn as_int_from_string_parses() {
        assert_eq!(Value::str("42").as_int().unwrap(), Value::Int(42));
    }

    #[test]
    fn array_equality_is_structural_not_pointer() {
        let a = Value::array(Sequence::from_vec(vec![Value::Int(1)]));
        let b = Value::array(Sequence::from_vec(vec![Value::Int(1)]));
        assert_eq!(a, b);
    }

    #[test]
    fn type_name_roundtrips_through_from_name() {
        for t in [Type::Int, Type::String, Type::Array, Type::UserObject] {
            assert_eq!(Type::from_name(t.name()).unwrap(), t);
        }
    }
}
