//! JVM runtime values as seen by the interpreter.
use crate::error::{InterpreterError, Result};
use crate::instruction::Label;
use crate::types::Type;

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Tag of a `Value`, used mostly for error reporting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Object,
    NotInitialized,
    Label,
    Void,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Object => "object",
            Self::NotInitialized => "not-initialized",
            Self::Label => "label",
            Self::Void => "void",
        };
        f.write_str(name)
    }
}

/// Opaque handle on a host object.
///
/// The interpreter never looks inside; equality is reference identity, which
/// is what `if_acmpeq` and friends need. Hosts recover their own
/// representation through `downcast_ref`.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        Self(Arc::new(object))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns the wrapped string if this reference points to one.
    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "{s:?}"),
            None => write!(f, "ObjectRef@{:p}", Arc::as_ptr(&self.0)),
        }
    }
}

/// JVM value types.
///
/// `boolean`, `byte`, `char` and `short` have no dedicated variant, the JVM
/// computes on them as ints.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    // `None` is the null reference.
    Object(Option<ObjectRef>),
    // Placeholder for a slot whose declared type is known but which holds
    // no computed value yet.
    NotInitialized(Type),
    // Return address pushed by `jsr`.
    Label(Label),
    // Produced by instructions without a result and used as filler for the
    // upper half of two-slot locals.
    Void,
}

impl Value {
    pub const NULL: Value = Value::Object(None);

    pub fn boolean(b: bool) -> Self {
        Self::Int(b as i32)
    }

    pub fn byte(b: i8) -> Self {
        Self::Int(b as i32)
    }

    pub fn char(c: u16) -> Self {
        Self::Int(c as i32)
    }

    pub fn short(s: i16) -> Self {
        Self::Int(s as i32)
    }

    pub fn null() -> Self {
        Self::NULL
    }

    pub fn object<T: Any + Send + Sync>(object: T) -> Self {
        Self::Object(Some(ObjectRef::new(object)))
    }

    pub fn string(s: &str) -> Self {
        Self::object(s.to_string())
    }

    /// Returns the tag of the value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Long(_) => ValueKind::Long,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::Object(_) => ValueKind::Object,
            Self::NotInitialized(_) => ValueKind::NotInitialized,
            Self::Label(_) => ValueKind::Label,
            Self::Void => ValueKind::Void,
        }
    }

    /// Returns the number of JVM slots the value occupies.
    pub fn size(&self) -> usize {
        match self {
            Self::Long(_) | Self::Double(_) => 2,
            Self::NotInitialized(t) => t.size().max(1),
            _ => 1,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn as_int(&self) -> Result<i32> {
        match self {
            Self::Int(x) => Ok(*x),
            _ => Err(self.mismatch(ValueKind::Int)),
        }
    }

    pub fn as_long(&self) -> Result<i64> {
        match self {
            Self::Long(x) => Ok(*x),
            _ => Err(self.mismatch(ValueKind::Long)),
        }
    }

    pub fn as_float(&self) -> Result<f32> {
        match self {
            Self::Float(x) => Ok(*x),
            _ => Err(self.mismatch(ValueKind::Float)),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            Self::Double(x) => Ok(*x),
            _ => Err(self.mismatch(ValueKind::Double)),
        }
    }

    /// Returns the reference held by an object value, `None` for null.
    pub fn as_object(&self) -> Result<Option<&ObjectRef>> {
        match self {
            Self::Object(obj) => Ok(obj.as_ref()),
            _ => Err(self.mismatch(ValueKind::Object)),
        }
    }

    pub fn as_label(&self) -> Result<Label> {
        match self {
            Self::Label(label) => Ok(*label),
            _ => Err(self.mismatch(ValueKind::Label)),
        }
    }

    /// Reference identity, as used by `if_acmpeq`/`if_acmpne`.
    pub fn same_object(&self, other: &Value) -> Result<bool> {
        Ok(match (self.as_object()?, other.as_object()?) {
            (None, None) => true,
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        })
    }

    fn mismatch(&self, expected: ValueKind) -> InterpreterError {
        InterpreterError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(x) => write!(f, "{x}"),
            Self::Long(x) => write!(f, "{x}L"),
            Self::Float(x) => write!(f, "{x}F"),
            Self::Double(x) => write!(f, "{x}D"),
            Self::Object(None) => f.write_str("null"),
            Self::Object(Some(obj)) => write!(f, "{obj:?}"),
            Self::NotInitialized(t) => write!(f, "<uninitialized {t}>"),
            Self::Label(label) => write!(f, "{label}"),
            Self::Void => f.write_str("void"),
        }
    }
}

/// Which result a floating point comparison produces when an operand is NaN.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NanBias {
    // fcmpg, dcmpg
    Greater,
    // fcmpl, dcmpl
    Less,
}

/// IEEE-754 three-way comparison returning -1, 0 or 1. Unordered operands
/// yield 1 or -1 depending on `bias`.
pub fn nan_biased_compare<T: PartialOrd>(a: T, b: T, bias: NanBias) -> i32 {
    match a.partial_cmp(&b) {
        Some(Ordering::Greater) => 1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Less) => -1,
        None => match bias {
            NanBias::Greater => 1,
            NanBias::Less => -1,
        },
    }
}
