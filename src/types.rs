//! JVM type descriptors.
//!
//! A `Type` is a validated descriptor string such as `I`, `[J`,
//! `Ljava/lang/String;` or `(IJ)V` together with its sort.
use crate::error::{InterpreterError, Result};

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Sorts of JVM types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TypeSort {
    Void,
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Float,
    Long,
    Double,
    Array,
    Object,
    Method,
}

/// JVM type token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    sort: TypeSort,
    descriptor: String,
}

const FIELD_TYPE: &str = r"\[*(?:[ZCBSIFJD]|L[^;\[()]+;)";

static FIELD_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^(?:V|{FIELD_TYPE})$")).unwrap());

static METHOD_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\(((?:{FIELD_TYPE})*)\)(V|{FIELD_TYPE})$")).unwrap()
});

static ARGUMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(FIELD_TYPE).unwrap());

impl Type {
    /// Parse a field, return or method descriptor.
    pub fn from_descriptor(descriptor: &str) -> Result<Self> {
        let sort = if descriptor.starts_with('(') {
            if !METHOD_TYPE_RE.is_match(descriptor) {
                return Err(InterpreterError::InvalidDescriptor(
                    descriptor.to_string(),
                ));
            }
            TypeSort::Method
        } else {
            if !FIELD_TYPE_RE.is_match(descriptor) {
                return Err(InterpreterError::InvalidDescriptor(
                    descriptor.to_string(),
                ));
            }
            Self::sort_of(descriptor)
        };
        Ok(Self {
            sort,
            descriptor: descriptor.to_string(),
        })
    }

    /// Build a type from an internal name as found in class constants
    /// (`java/lang/String`), or from an array descriptor (`[I`).
    pub fn object_type(internal_name: &str) -> Result<Self> {
        if internal_name.starts_with('[') {
            Self::from_descriptor(internal_name)
        } else {
            Self::from_descriptor(&format!("L{internal_name};"))
        }
    }

    /// Returns the type of a one dimensional array of `element`.
    pub fn array_of(element: &Type) -> Self {
        Self {
            sort: TypeSort::Array,
            descriptor: format!("[{}", element.descriptor),
        }
    }

    fn sort_of(descriptor: &str) -> TypeSort {
        match &descriptor[0..1] {
            "V" => TypeSort::Void,
            "Z" => TypeSort::Boolean,
            "C" => TypeSort::Char,
            "B" => TypeSort::Byte,
            "S" => TypeSort::Short,
            "I" => TypeSort::Int,
            "F" => TypeSort::Float,
            "J" => TypeSort::Long,
            "D" => TypeSort::Double,
            "[" => TypeSort::Array,
            _ => TypeSort::Object,
        }
    }

    pub fn sort(&self) -> TypeSort {
        self.sort
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Internal name of an object type (`java/lang/String`). Arrays use
    /// their descriptor as internal name.
    pub fn internal_name(&self) -> &str {
        match self.sort {
            TypeSort::Object => {
                &self.descriptor[1..self.descriptor.len() - 1]
            }
            _ => &self.descriptor,
        }
    }

    /// Returns the size in slots of a value of this type.
    pub fn size(&self) -> usize {
        match self.sort {
            TypeSort::Void | TypeSort::Method => 0,
            TypeSort::Long | TypeSort::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.sort, TypeSort::Object | TypeSort::Array)
    }

    /// Number of array dimensions, zero for non array types.
    pub fn dimensions(&self) -> usize {
        match self.sort {
            TypeSort::Array => {
                self.descriptor.bytes().take_while(|b| *b == b'[').count()
            }
            _ => 0,
        }
    }

    /// Returns the component type of an array type.
    pub fn element_type(&self) -> Option<Type> {
        match self.sort {
            TypeSort::Array => {
                let rest = &self.descriptor[1..];
                Some(Self {
                    sort: Self::sort_of(rest),
                    descriptor: rest.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Argument types of a method type, empty for other sorts.
    pub fn argument_types(&self) -> Vec<Type> {
        if self.sort != TypeSort::Method {
            return Vec::new();
        }
        let caps = match METHOD_TYPE_RE.captures(&self.descriptor) {
            Some(caps) => caps,
            None => return Vec::new(),
        };
        let args = caps.get(1).map_or("", |m| m.as_str());
        ARGUMENT_RE
            .find_iter(args)
            .map(|m| Self {
                sort: Self::sort_of(m.as_str()),
                descriptor: m.as_str().to_string(),
            })
            .collect()
    }

    /// Return type of a method type.
    pub fn return_type(&self) -> Option<Type> {
        if self.sort != TypeSort::Method {
            return None;
        }
        let close = self.descriptor.rfind(')')?;
        let ret = &self.descriptor[close + 1..];
        Some(Self {
            sort: Self::sort_of(ret),
            descriptor: ret.to_string(),
        })
    }

    /// Total number of argument slots of a method type.
    pub fn argument_slots(&self) -> usize {
        self.argument_types().iter().map(Type::size).sum()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_field_descriptors() {
        assert_eq!(Type::from_descriptor("I").unwrap().sort(), TypeSort::Int);
        assert_eq!(Type::from_descriptor("J").unwrap().size(), 2);
        let string = Type::from_descriptor("Ljava/lang/String;").unwrap();
        assert_eq!(string.sort(), TypeSort::Object);
        assert_eq!(string.internal_name(), "java/lang/String");
        let matrix = Type::from_descriptor("[[D").unwrap();
        assert_eq!(matrix.dimensions(), 2);
        assert_eq!(matrix.element_type().unwrap().descriptor(), "[D");
        assert!(Type::from_descriptor("Q").is_err());
        assert!(Type::from_descriptor("Ljava/lang/String").is_err());
        assert!(Type::from_descriptor("").is_err());
    }

    #[test]
    fn can_parse_method_descriptors() {
        let t = Type::from_descriptor("(I[JLjava/lang/String;D)V").unwrap();
        assert_eq!(t.sort(), TypeSort::Method);
        let args: Vec<String> = t
            .argument_types()
            .iter()
            .map(|a| a.descriptor().to_string())
            .collect();
        assert_eq!(args, vec!["I", "[J", "Ljava/lang/String;", "D"]);
        assert_eq!(t.argument_slots(), 5);
        assert_eq!(t.return_type().unwrap().sort(), TypeSort::Void);
        assert!(Type::from_descriptor("(I").is_err());
        assert!(Type::from_descriptor("()").is_err());
    }

    #[test]
    fn object_type_accepts_internal_names_and_arrays() {
        let t = Type::object_type("java/lang/Object").unwrap();
        assert_eq!(t.descriptor(), "Ljava/lang/Object;");
        let a = Type::object_type("[I").unwrap();
        assert_eq!(a.sort(), TypeSort::Array);
        assert_eq!(Type::array_of(&t).descriptor(), "[Ljava/lang/Object;");
    }
}
