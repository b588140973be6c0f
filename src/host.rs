//! In-memory object model able to run the methods of a single `Program`.
//!
//! Objects live behind `ObjectRef` handles: strings are plain `String`s,
//! instances and arrays use interior mutability so that every copy of a
//! reference observes the same state. Calls to methods of the program are
//! run recursively through a `Runtime`; the few library classes the
//! interpreter itself relies on (`java/lang/Object` and the standard
//! exceptions) are modelled directly.
use crate::capability::{Eval, EvalError, EvalResult};
use crate::config::RuntimeConfig;
use crate::error::{InterpreterError, Result};
use crate::instruction::{FieldDescriptor, MethodDescriptor};
use crate::program::{Method, Program};
use crate::runtime::{Completion, Runtime};
use crate::types::{Type, TypeSort};
use crate::value::{ObjectRef, Value};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

const OBJECT: &str = "java/lang/Object";
const STRING: &str = "java/lang/String";
const CLASS: &str = "java/lang/Class";
const THROWABLE: &str = "java/lang/Throwable";

/// Library classes known to the host with their superclass.
const BUILTIN_CLASSES: &[(&str, &str)] = &[
    (STRING, OBJECT),
    (CLASS, OBJECT),
    (THROWABLE, OBJECT),
    ("java/lang/Exception", THROWABLE),
    ("java/lang/Error", THROWABLE),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        "java/lang/IndexOutOfBoundsException",
    ),
];

/// Instance of a class, with its fields keyed by name.
#[derive(Debug)]
pub struct Instance {
    class: Type,
    fields: Mutex<HashMap<String, Value>>,
}

impl Instance {
    pub fn class(&self) -> &Type {
        &self.class
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        lock(&self.fields).get(name).cloned()
    }
}

/// Array with its runtime type.
#[derive(Debug)]
pub struct Array {
    array_type: Type,
    elements: Mutex<Vec<Value>>,
}

impl Array {
    pub fn array_type(&self) -> &Type {
        &self.array_type
    }

    pub fn elements(&self) -> Vec<Value> {
        lock(&self.elements).clone()
    }
}

/// Result of `ldc` on a class constant.
#[derive(Debug)]
pub struct ClassObject(pub Type);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Zero value of a field or array element of type `t`.
pub fn default_value(t: &Type) -> Value {
    match t.sort() {
        TypeSort::Long => Value::Long(0),
        TypeSort::Float => Value::Float(0.0),
        TypeSort::Double => Value::Double(0.0),
        TypeSort::Object | TypeSort::Array => Value::NULL,
        _ => Value::Int(0),
    }
}

/// Host running the methods of one class.
#[derive(Debug)]
pub struct Host {
    program: Arc<Program>,
    runtime: Runtime,
    static_fields: HashMap<String, Value>,
    depth: usize,
}

impl Host {
    pub fn new(program: Program, config: RuntimeConfig) -> Self {
        Self {
            program: Arc::new(program),
            runtime: Runtime::new(config),
            static_fields: HashMap::new(),
            depth: 0,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Run a method of the program. Instance methods take their receiver as
    /// first argument.
    pub fn invoke(
        &mut self,
        name: &str,
        descriptor: Option<&str>,
        arguments: Vec<Value>,
    ) -> Result<Completion> {
        let program = Arc::clone(&self.program);
        let method = program.find_method(name, descriptor)?;
        self.execute(method, arguments)
    }

    fn execute(&mut self, method: &Method, arguments: Vec<Value>) -> Result<Completion> {
        let max_call_depth = self.runtime.config().max_call_depth;
        if self.depth >= max_call_depth {
            return Err(InterpreterError::CallDepthExceeded(max_call_depth));
        }
        self.depth += 1;
        let runtime = self.runtime.clone();
        let completion = runtime.execute(method, arguments, self);
        self.depth -= 1;
        completion
    }

    /// Nested invocation of a program method, guest exceptions escaping
    /// the callee being rethrown in the caller.
    fn call(&mut self, method: &MethodDescriptor, arguments: Vec<Value>) -> EvalResult<Value> {
        debug!(%method, "call");
        let program = Arc::clone(&self.program);
        let callee = program.find_method(&method.name, Some(method.desc.descriptor()))?;
        match self.execute(callee, arguments)? {
            Completion::Returned(value) => Ok(value.unwrap_or(Value::Void)),
            Completion::Threw(exception) => Err(EvalError::Thrown(exception)),
        }
    }

    fn is_program_class(&self, owner: &str) -> bool {
        owner == self.program.class_name()
    }

    /// Runtime type of a non null reference.
    pub fn class_of(&self, object: &ObjectRef) -> Option<Type> {
        if object.as_str().is_some() {
            return Type::object_type(STRING).ok();
        }
        if let Some(instance) = object.downcast_ref::<Instance>() {
            return Some(instance.class.clone());
        }
        if let Some(array) = object.downcast_ref::<Array>() {
            return Some(array.array_type.clone());
        }
        if object.downcast_ref::<ClassObject>().is_some() {
            return Type::object_type(CLASS).ok();
        }
        None
    }

    fn superclass(&self, class: &str) -> Option<&'static str> {
        if class == OBJECT {
            return None;
        }
        BUILTIN_CLASSES
            .iter()
            .find(|(name, _)| *name == class)
            .map(|(_, parent)| *parent)
            .or(Some(OBJECT))
    }

    fn is_assignable(&self, from: &Type, to: &Type) -> bool {
        if from == to || to.internal_name() == OBJECT {
            return true;
        }
        match (from.sort(), to.sort()) {
            (TypeSort::Array, TypeSort::Array) => match (from.element_type(), to.element_type()) {
                (Some(from), Some(to)) if from.is_reference() && to.is_reference() => {
                    self.is_assignable(&from, &to)
                }
                _ => false,
            },
            (TypeSort::Object, TypeSort::Object) => {
                let mut class = self.superclass(from.internal_name());
                while let Some(name) = class {
                    if name == to.internal_name() {
                        return true;
                    }
                    class = self.superclass(name);
                }
                false
            }
            _ => false,
        }
    }

    /// Create a guest exception of class `class` carrying `message`.
    pub fn exception(&self, class: &str, message: &str) -> Result<Value> {
        let instance = Instance {
            class: Type::object_type(class)?,
            fields: Mutex::new(HashMap::from([(
                "message".to_string(),
                Value::string(message),
            )])),
        };
        Ok(Value::object(instance))
    }

    fn throw(&self, class: &str, message: &str) -> EvalError {
        match self.exception(class, message) {
            Ok(exception) => EvalError::Thrown(exception),
            Err(err) => err.into(),
        }
    }

    fn null_pointer(&self, what: &str) -> EvalError {
        self.throw("java/lang/NullPointerException", what)
    }

    /// Dereference `value`, throwing a `NullPointerException` on null.
    fn deref<'v>(&self, value: &'v Value, what: &str) -> EvalResult<&'v ObjectRef> {
        value.as_object()?.ok_or_else(|| self.null_pointer(what))
    }

    fn array<'v>(&self, value: &'v Value) -> EvalResult<&'v Array> {
        let object = self.deref(value, "array access on null")?;
        object.downcast_ref::<Array>().ok_or_else(|| {
            InterpreterError::UnsupportedOperation(format!("{object:?} is not an array")).into()
        })
    }

    fn instance<'v>(&self, value: &'v Value, field: &FieldDescriptor) -> EvalResult<&'v Instance> {
        let object = self.deref(value, &format!("field access {field} on null"))?;
        object.downcast_ref::<Instance>().ok_or_else(|| {
            InterpreterError::UnsupportedOperation(format!("{object:?} has no field {field}")).into()
        })
    }

    /// Check the dimensions of a new array before anything is allocated.
    fn check_sizes(&self, sizes: &[i32]) -> EvalResult<()> {
        if let Some(size) = sizes.iter().find(|size| **size < 0) {
            return Err(self.throw("java/lang/NegativeArraySizeException", &size.to_string()));
        }
        let total = sizes
            .iter()
            .fold(1usize, |total, size| total.saturating_mul(*size as usize));
        if total > self.runtime.config().max_array_length {
            return Err(self.throw(
                "java/lang/OutOfMemoryError",
                "Requested array size exceeds VM limit",
            ));
        }
        Ok(())
    }

    fn allocate(&self, array_type: &Type, sizes: &[i32]) -> EvalResult<Value> {
        let element_type = array_type.element_type().ok_or_else(|| {
            InterpreterError::UnsupportedOperation(format!("{array_type} is not an array type"))
        })?;
        let (size, rest) = match sizes.split_first() {
            Some((size, rest)) => (*size, rest),
            None => return Ok(Value::NULL),
        };
        if size < 0 {
            return Err(self.throw("java/lang/NegativeArraySizeException", &size.to_string()));
        }
        let mut elements = Vec::with_capacity(size as usize);
        for _ in 0..size {
            if rest.is_empty() {
                elements.push(default_value(&element_type));
            } else {
                elements.push(self.allocate(&element_type, rest)?);
            }
        }
        Ok(Value::object(Array {
            array_type: array_type.clone(),
            elements: Mutex::new(elements),
        }))
    }
}

/// Narrow a value stored into a `byte`, `char`, `short` or `boolean`
/// array.
fn narrow(element_type: &Type, value: Value) -> Value {
    match (element_type.sort(), &value) {
        (TypeSort::Boolean, Value::Int(x)) => Value::Int(x & 1),
        (TypeSort::Byte, Value::Int(x)) => Value::byte(*x as i8),
        (TypeSort::Char, Value::Int(x)) => Value::char(*x as u16),
        (TypeSort::Short, Value::Int(x)) => Value::short(*x as i16),
        _ => value,
    }
}

impl Eval for Host {
    fn load_class(&mut self, class_type: &Type) -> EvalResult<Value> {
        Ok(Value::object(ClassObject(class_type.clone())))
    }

    fn new_instance(&mut self, class_type: &Type) -> EvalResult<Value> {
        Ok(Value::object(Instance {
            class: class_type.clone(),
            fields: Mutex::new(HashMap::new()),
        }))
    }

    fn check_cast(&mut self, value: Value, target_type: &Type) -> EvalResult<Value> {
        if value.as_object()?.is_none() || self.is_instance_of(&value, target_type) {
            return Ok(value);
        }
        Err(self.throw(
            "java/lang/ClassCastException",
            &format!("{value} cannot be cast to {}", target_type.internal_name()),
        ))
    }

    fn is_instance_of(&mut self, value: &Value, target_type: &Type) -> bool {
        match value {
            Value::Object(Some(object)) => self
                .class_of(object)
                .map_or(false, |class| self.is_assignable(&class, target_type)),
            _ => false,
        }
    }

    fn new_array(&mut self, array_type: &Type, size: i32) -> EvalResult<Value> {
        self.check_sizes(&[size])?;
        self.allocate(array_type, &[size])
    }

    fn new_multi_dimensional_array(
        &mut self,
        array_type: &Type,
        dimension_sizes: &[i32],
    ) -> EvalResult<Value> {
        self.check_sizes(dimension_sizes)?;
        self.allocate(array_type, dimension_sizes)
    }

    fn get_array_length(&mut self, array: Value) -> EvalResult<Value> {
        let array = self.array(&array)?;
        Ok(Value::Int(lock(&array.elements).len() as i32))
    }

    fn get_array_element(&mut self, array: Value, index: Value) -> EvalResult<Value> {
        let index = index.as_int()?;
        let array = self.array(&array)?;
        let elements = lock(&array.elements);
        usize::try_from(index)
            .ok()
            .and_then(|i| elements.get(i).cloned())
            .ok_or_else(|| {
                self.throw(
                    "java/lang/ArrayIndexOutOfBoundsException",
                    &format!("Index {index} out of bounds for length {}", elements.len()),
                )
            })
    }

    fn set_array_element(
        &mut self,
        array: Value,
        index: Value,
        new_value: Value,
    ) -> EvalResult<()> {
        let index = index.as_int()?;
        let array = self.array(&array)?;
        let element_type = array.array_type.element_type();
        let mut elements = lock(&array.elements);
        let length = elements.len();
        match usize::try_from(index).ok().filter(|i| *i < length) {
            Some(i) => {
                elements[i] = match &element_type {
                    Some(t) => narrow(t, new_value),
                    None => new_value,
                };
                Ok(())
            }
            None => Err(self.throw(
                "java/lang/ArrayIndexOutOfBoundsException",
                &format!("Index {index} out of bounds for length {length}"),
            )),
        }
    }

    fn get_static_field(&mut self, field: &FieldDescriptor) -> EvalResult<Value> {
        if let Some(value) = self.static_fields.get(&field.to_string()) {
            return Ok(value.clone());
        }
        if self.is_program_class(&field.owner) {
            return Ok(default_value(&field.desc));
        }
        Err(InterpreterError::UnsupportedOperation(format!("static field {field}")).into())
    }

    fn set_static_field(
        &mut self,
        field: &FieldDescriptor,
        new_value: Value,
    ) -> EvalResult<()> {
        if !self.is_program_class(&field.owner) {
            return Err(
                InterpreterError::UnsupportedOperation(format!("static field {field}")).into(),
            );
        }
        self.static_fields.insert(field.to_string(), new_value);
        Ok(())
    }

    fn invoke_static_method(
        &mut self,
        method: &MethodDescriptor,
        arguments: Vec<Value>,
    ) -> EvalResult<Value> {
        if !self.is_program_class(&method.owner) {
            return Err(
                InterpreterError::UnsupportedOperation(format!("static method {method}")).into(),
            );
        }
        self.call(method, arguments)
    }

    fn get_field(&mut self, instance: Value, field: &FieldDescriptor) -> EvalResult<Value> {
        let instance = self.instance(&instance, field)?;
        Ok(instance
            .field(&field.name)
            .unwrap_or_else(|| default_value(&field.desc)))
    }

    fn set_field(
        &mut self,
        instance: Value,
        field: &FieldDescriptor,
        new_value: Value,
    ) -> EvalResult<()> {
        let instance = self.instance(&instance, field)?;
        lock(&instance.fields).insert(field.name.clone(), new_value);
        Ok(())
    }

    fn invoke_method(
        &mut self,
        instance: Value,
        method: &MethodDescriptor,
        mut arguments: Vec<Value>,
        invokespecial: bool,
    ) -> EvalResult<Value> {
        let object = self.deref(&instance, &format!("invocation of {method} on null"))?;
        if self.is_program_class(&method.owner) {
            arguments.insert(0, instance.clone());
            return self.call(method, arguments);
        }

        let is_throwable = match (Type::object_type(&method.owner), Type::object_type(THROWABLE)) {
            (Ok(owner), Ok(throwable)) => self.is_assignable(&owner, &throwable),
            _ => false,
        };
        match (method.name.as_str(), method.desc.descriptor()) {
            ("<init>", "()V") if invokespecial => Ok(Value::Void),
            ("<init>", "(Ljava/lang/String;)V") if invokespecial && is_throwable => {
                if let Some(instance) = object.downcast_ref::<Instance>() {
                    let message = arguments.pop().unwrap_or(Value::NULL);
                    lock(&instance.fields).insert("message".to_string(), message);
                }
                Ok(Value::Void)
            }
            ("getMessage", "()Ljava/lang/String;") if is_throwable => Ok(object
                .downcast_ref::<Instance>()
                .and_then(|instance| instance.field("message"))
                .unwrap_or(Value::NULL)),
            ("length", "()I") if method.owner == STRING => match object.as_str() {
                Some(s) => Ok(Value::Int(s.encode_utf16().count() as i32)),
                None => Err(InterpreterError::UnsupportedOperation(format!(
                    "{object:?} is not a string"
                ))
                .into()),
            },
            _ => Err(InterpreterError::UnsupportedOperation(format!("method {method}")).into()),
        }
    }
}

/// Extract the message of an exception created by `Host`.
pub fn exception_message(exception: &Value) -> Option<String> {
    let object = exception.as_object().ok().flatten()?;
    let message = object.downcast_ref::<Instance>()?.field("message")?;
    let message = message.as_object().ok().flatten()?;
    message.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new(Program::from_methods("Main", Vec::new()), RuntimeConfig::new())
    }

    fn object_type(name: &str) -> Type {
        Type::object_type(name).unwrap()
    }

    #[test]
    fn casts_follow_the_class_hierarchy() {
        let mut host = host();
        let exception = host.exception("java/lang/ArithmeticException", "x").unwrap();
        assert!(host.is_instance_of(&exception, &object_type("java/lang/RuntimeException")));
        assert!(host.is_instance_of(&exception, &object_type("java/lang/Throwable")));
        assert!(!host.is_instance_of(&exception, &object_type("java/lang/Error")));
        assert!(!host.is_instance_of(&Value::NULL, &object_type("java/lang/Object")));
        assert!(host.check_cast(Value::NULL, &object_type("java/lang/String")).is_ok());

        let cast = host.check_cast(Value::string("s"), &object_type("java/lang/Integer"));
        match cast {
            Err(EvalError::Thrown(exception)) => {
                let object = exception.as_object().unwrap().unwrap();
                assert_eq!(
                    host.class_of(object).unwrap().internal_name(),
                    "java/lang/ClassCastException"
                );
            }
            other => panic!("expected a ClassCastException, got {other:?}"),
        }
    }

    #[test]
    fn arrays_are_covariant_on_references() {
        let mut host = host();
        let strings = host.new_array(&Type::from_descriptor("[Ljava/lang/String;").unwrap(), 2).unwrap();
        assert!(host.is_instance_of(&strings, &Type::from_descriptor("[Ljava/lang/Object;").unwrap()));
        let ints = host.new_array(&Type::from_descriptor("[I").unwrap(), 2).unwrap();
        assert!(!host.is_instance_of(&ints, &Type::from_descriptor("[J").unwrap()));
        assert!(host.is_instance_of(&ints, &object_type("java/lang/Object")));
    }

    #[test]
    fn stores_narrow_to_the_element_type() {
        let mut host = host();
        let bytes = host.new_array(&Type::from_descriptor("[B").unwrap(), 1).unwrap();
        host.set_array_element(bytes.clone(), Value::Int(0), Value::Int(300)).unwrap();
        assert_eq!(host.get_array_element(bytes, Value::Int(0)).unwrap(), Value::Int(44));

        let chars = host.new_array(&Type::from_descriptor("[C").unwrap(), 1).unwrap();
        host.set_array_element(chars.clone(), Value::Int(0), Value::Int(-1)).unwrap();
        assert_eq!(host.get_array_element(chars, Value::Int(0)).unwrap(), Value::Int(0xffff));
    }

    #[test]
    fn multi_dimensional_arrays_nest() {
        let mut host = host();
        let array_type = Type::from_descriptor("[[J").unwrap();
        let matrix = host.new_multi_dimensional_array(&array_type, &[2, 3]).unwrap();
        assert_eq!(host.get_array_length(matrix.clone()).unwrap(), Value::Int(2));
        let row = host.get_array_element(matrix, Value::Int(1)).unwrap();
        assert_eq!(host.get_array_length(row.clone()).unwrap(), Value::Int(3));
        assert_eq!(host.get_array_element(row, Value::Int(2)).unwrap(), Value::Long(0));

        let partial = host.new_multi_dimensional_array(&array_type, &[2]).unwrap();
        let row = host.get_array_element(partial, Value::Int(0)).unwrap();
        assert_eq!(row, Value::NULL);

        assert!(matches!(
            host.new_multi_dimensional_array(&array_type, &[2, -1]),
            Err(EvalError::Thrown(_))
        ));
    }

    #[test]
    fn huge_arrays_throw_out_of_memory() {
        let mut host = host();
        fn expect_oom(host: &mut Host, result: EvalResult<Value>) {
            match result {
                Err(EvalError::Thrown(exception)) => {
                    let object = exception.as_object().unwrap().unwrap();
                    assert_eq!(
                        host.class_of(object).unwrap().internal_name(),
                        "java/lang/OutOfMemoryError"
                    );
                    assert!(host.is_instance_of(&exception, &object_type("java/lang/Error")));
                }
                other => panic!("expected an OutOfMemoryError, got {other:?}"),
            }
        }

        let result = host.new_array(&Type::from_descriptor("[I").unwrap(), i32::MAX);
        expect_oom(&mut host, result);
        let matrix = Type::from_descriptor("[[J").unwrap();
        let result = host.new_multi_dimensional_array(&matrix, &[1 << 16, 1 << 16]);
        expect_oom(&mut host, result);
        assert!(host.new_multi_dimensional_array(&matrix, &[1 << 16, 0]).is_ok());
    }

    #[test]
    fn null_receivers_throw() {
        let mut host = host();
        assert!(matches!(host.get_array_length(Value::NULL), Err(EvalError::Thrown(_))));
        let field = FieldDescriptor::new("Main", "x", "I").unwrap();
        assert!(matches!(host.get_field(Value::NULL, &field), Err(EvalError::Thrown(_))));
        let instance = host.new_instance(&object_type("Main")).unwrap();
        assert_eq!(host.get_field(instance.clone(), &field).unwrap(), Value::Int(0));
        host.set_field(instance.clone(), &field, Value::Int(4)).unwrap();
        assert_eq!(host.get_field(instance, &field).unwrap(), Value::Int(4));
    }

    #[test]
    fn throwable_constructors_record_the_message() {
        let mut host = host();
        let class = object_type("java/lang/IllegalArgumentException");
        let exception = host.new_instance(&class).unwrap();
        let init = MethodDescriptor::new(class.internal_name(), "<init>", "(Ljava/lang/String;)V", false).unwrap();
        host.invoke_method(exception.clone(), &init, vec![Value::string("bad")], true).unwrap();
        assert_eq!(exception_message(&exception).as_deref(), Some("bad"));

        let unknown = MethodDescriptor::new("java/util/List", "size", "()I", true).unwrap();
        assert!(matches!(
            host.invoke_method(exception, &unknown, vec![], false),
            Err(EvalError::Fatal(InterpreterError::UnsupportedOperation(_)))
        ));
    }
}
