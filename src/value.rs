//! Dynamic values
//!
//! Outcomes and reasons are untyped: anything can fulfill or reject a deferred
//! value. Objects opt into chaining through the [`Awaitable`] capability, which
//! is probed at runtime rather than checked at compile time, so differently
//! implemented engines compose as long as they expose a callable chaining member.

use crate::deferred::Deferred;
use crate::dispatch::guarded;
use crate::error::Failure;
use std::fmt;
use std::rc::Rc;

/// Result of calling a handler: `Err` carries a thrown value.
pub type Outcome = Result<Value, Value>;

/// A shared callable taking positional arguments.
#[derive(Clone)]
pub struct Callable(Rc<dyn Fn(&[Value]) -> Outcome>);

impl Callable {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Outcome + 'static,
    {
        Self(Rc::new(f))
    }

    /// Callable that only looks at its first argument (`Undefined` when absent).
    pub fn unary<F>(f: F) -> Self
    where
        F: Fn(Value) -> Outcome + 'static,
    {
        Self::new(move |args| f(args.first().cloned().unwrap_or(Value::Undefined)))
    }

    pub fn call(&self, args: &[Value]) -> Outcome {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable")
    }
}

/// Capability of a foreign object that may be chained onto.
///
/// `chain_member` reads the object's chaining member. The object is awaitable
/// only if the read yields a [`Value::Function`]; that callable is then invoked
/// with a resolve and a reject callable. Returning `Err` (or panicking) models
/// a property read that throws, which rejects whoever was probing.
pub trait Awaitable {
    fn chain_member(&self) -> Result<Value, Value>;
}

/// A dynamic value: an outcome, a reason, or an argument.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<[Value]>),
    Error(Failure),
    Function(Callable),
    Deferred(Deferred),
    Object(Rc<dyn Awaitable>),
}

impl Value {
    /// Shorthand for a plain error value.
    pub fn error(msg: impl Into<String>) -> Self {
        Value::Error(Failure::message(msg))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(items.into())
    }

    pub fn object<A: Awaitable + 'static>(obj: A) -> Self {
        Value::Object(Rc::new(obj))
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Value) -> Outcome + 'static,
    {
        Value::Function(Callable::unary(f))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Error(_) => "error",
            Value::Function(_) => "function",
            Value::Deferred(_) | Value::Object(_) => "object",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Failure> {
        match self {
            Value::Error(f) => Some(f),
            _ => None,
        }
    }

    /// Look for a chaining capability.
    ///
    /// `Ok(None)` means the value settles as-is. `Err` carries whatever the
    /// probe threw.
    pub(crate) fn probe_chain(&self) -> Result<Option<Callable>, Value> {
        match self {
            Value::Deferred(d) => Ok(Some(d.chain_callable())),
            Value::Object(obj) => match guarded(|| obj.chain_member())? {
                Value::Function(chain) => Ok(Some(chain)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Error(e) => write!(f, "{}: {}", e.name(), e),
            Value::Function(_) => write!(f, "[function]"),
            Value::Deferred(d) => write!(f, "{:?}", d),
            Value::Object(_) => write!(f, "[object]"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Error(e) => write!(f, "{}", e),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<Failure> for Value {
    fn from(f: Failure) -> Self {
        Value::Error(f)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Value::Function(c)
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Value::Deferred(d)
    }
}

impl From<&Deferred> for Value {
    fn from(d: &Deferred) -> Self {
        Value::Deferred(d.clone())
    }
}
