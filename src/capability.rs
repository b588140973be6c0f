//! Host capabilities consumed by the interpreter.
//!
//! The interpreter never touches the heap, the class hierarchy or the
//! control flow of the method it evaluates. It asks an `Eval` for every
//! object, array, field and method operation and tells a `Control` when
//! execution must jump, return or throw.
use crate::error::InterpreterError;
use crate::instruction::{FieldDescriptor, Label, MethodDescriptor};
use crate::types::Type;
use crate::value::Value;

use thiserror::Error;

/// Failure of an `Eval` operation.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Exception raised by the interpreted program, e.g. a failed cast or
    /// an exception escaping an invoked method.
    #[error("exception thrown: {0}")]
    Thrown(Value),

    /// The host could not perform the operation at all.
    #[error(transparent)]
    Fatal(#[from] InterpreterError),
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Object model supplied by the host.
pub trait Eval {
    fn load_class(&mut self, class_type: &Type) -> EvalResult<Value>;
    fn new_instance(&mut self, class_type: &Type) -> EvalResult<Value>;
    fn check_cast(&mut self, value: Value, target_type: &Type) -> EvalResult<Value>;
    fn is_instance_of(&mut self, value: &Value, target_type: &Type) -> bool;

    fn new_array(&mut self, array_type: &Type, size: i32) -> EvalResult<Value>;
    fn new_multi_dimensional_array(
        &mut self,
        array_type: &Type,
        dimension_sizes: &[i32],
    ) -> EvalResult<Value>;
    fn get_array_length(&mut self, array: Value) -> EvalResult<Value>;
    fn get_array_element(&mut self, array: Value, index: Value) -> EvalResult<Value>;
    fn set_array_element(
        &mut self,
        array: Value,
        index: Value,
        new_value: Value,
    ) -> EvalResult<()>;

    fn get_static_field(&mut self, field: &FieldDescriptor) -> EvalResult<Value>;
    fn set_static_field(
        &mut self,
        field: &FieldDescriptor,
        new_value: Value,
    ) -> EvalResult<()>;
    fn invoke_static_method(
        &mut self,
        method: &MethodDescriptor,
        arguments: Vec<Value>,
    ) -> EvalResult<Value>;

    fn get_field(&mut self, instance: Value, field: &FieldDescriptor) -> EvalResult<Value>;
    fn set_field(
        &mut self,
        instance: Value,
        field: &FieldDescriptor,
        new_value: Value,
    ) -> EvalResult<()>;
    /// `invokespecial` is set for constructor, private and super calls.
    fn invoke_method(
        &mut self,
        instance: Value,
        method: &MethodDescriptor,
        arguments: Vec<Value>,
        invokespecial: bool,
    ) -> EvalResult<Value>;
}

/// Control transfers requested by the interpreter.
pub trait Control {
    fn jump(&mut self, label: Label);
    fn return_value(&mut self, value: Value);
    fn throw_exception(&mut self, value: Value);
}

impl<E: Eval + ?Sized> Eval for &mut E {
    fn load_class(&mut self, class_type: &Type) -> EvalResult<Value> {
        (**self).load_class(class_type)
    }

    fn new_instance(&mut self, class_type: &Type) -> EvalResult<Value> {
        (**self).new_instance(class_type)
    }

    fn check_cast(&mut self, value: Value, target_type: &Type) -> EvalResult<Value> {
        (**self).check_cast(value, target_type)
    }

    fn is_instance_of(&mut self, value: &Value, target_type: &Type) -> bool {
        (**self).is_instance_of(value, target_type)
    }

    fn new_array(&mut self, array_type: &Type, size: i32) -> EvalResult<Value> {
        (**self).new_array(array_type, size)
    }

    fn new_multi_dimensional_array(
        &mut self,
        array_type: &Type,
        dimension_sizes: &[i32],
    ) -> EvalResult<Value> {
        (**self).new_multi_dimensional_array(array_type, dimension_sizes)
    }

    fn get_array_length(&mut self, array: Value) -> EvalResult<Value> {
        (**self).get_array_length(array)
    }

    fn get_array_element(&mut self, array: Value, index: Value) -> EvalResult<Value> {
        (**self).get_array_element(array, index)
    }

    fn set_array_element(
        &mut self,
        array: Value,
        index: Value,
        new_value: Value,
    ) -> EvalResult<()> {
        (**self).set_array_element(array, index, new_value)
    }

    fn get_static_field(&mut self, field: &FieldDescriptor) -> EvalResult<Value> {
        (**self).get_static_field(field)
    }

    fn set_static_field(
        &mut self,
        field: &FieldDescriptor,
        new_value: Value,
    ) -> EvalResult<()> {
        (**self).set_static_field(field, new_value)
    }

    fn invoke_static_method(
        &mut self,
        method: &MethodDescriptor,
        arguments: Vec<Value>,
    ) -> EvalResult<Value> {
        (**self).invoke_static_method(method, arguments)
    }

    fn get_field(&mut self, instance: Value, field: &FieldDescriptor) -> EvalResult<Value> {
        (**self).get_field(instance, field)
    }

    fn set_field(
        &mut self,
        instance: Value,
        field: &FieldDescriptor,
        new_value: Value,
    ) -> EvalResult<()> {
        (**self).set_field(instance, field, new_value)
    }

    fn invoke_method(
        &mut self,
        instance: Value,
        method: &MethodDescriptor,
        arguments: Vec<Value>,
        invokespecial: bool,
    ) -> EvalResult<Value> {
        (**self).invoke_method(instance, method, arguments, invokespecial)
    }
}

impl<C: Control + ?Sized> Control for &mut C {
    fn jump(&mut self, label: Label) {
        (**self).jump(label)
    }

    fn return_value(&mut self, value: Value) {
        (**self).return_value(value)
    }

    fn throw_exception(&mut self, value: Value) {
        (**self).throw_exception(value)
    }
}
