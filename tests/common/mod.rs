//! Recording fakes for the interpreter capabilities.
#![allow(dead_code)]

use coldeval::{
    Control, Eval, EvalError, EvalResult, FieldDescriptor, InterpreterError, Label,
    MethodDescriptor, SingleInstructionInterpreter, Type, Value,
};

/// Object created by `RecordingEval::new_instance`.
#[derive(Debug)]
pub struct FakeObject(pub Type);

/// `Eval` logging every call. Everything succeeds except array lengths
/// and static reads, which are fatal host errors.
#[derive(Debug, Default)]
pub struct RecordingEval {
    pub calls: Vec<String>,
}

impl RecordingEval {
    fn unsupported<T>(&mut self, call: &str) -> EvalResult<T> {
        self.calls.push(call.to_string());
        Err(EvalError::Fatal(InterpreterError::UnsupportedOperation(
            call.to_string(),
        )))
    }
}

impl Eval for RecordingEval {
    fn load_class(&mut self, class_type: &Type) -> EvalResult<Value> {
        self.calls.push(format!("load_class {class_type}"));
        Ok(Value::object(FakeObject(class_type.clone())))
    }

    fn new_instance(&mut self, class_type: &Type) -> EvalResult<Value> {
        self.calls.push(format!("new_instance {class_type}"));
        Ok(Value::object(FakeObject(class_type.clone())))
    }

    fn check_cast(&mut self, value: Value, target_type: &Type) -> EvalResult<Value> {
        self.calls.push(format!("check_cast {target_type}"));
        Ok(value)
    }

    fn is_instance_of(&mut self, value: &Value, _target_type: &Type) -> bool {
        self.calls.push("is_instance_of".to_string());
        matches!(value, Value::Object(Some(_)))
    }

    fn new_array(&mut self, array_type: &Type, size: i32) -> EvalResult<Value> {
        self.calls.push(format!("new_array {array_type} {size}"));
        Ok(Value::object(FakeObject(array_type.clone())))
    }

    fn new_multi_dimensional_array(
        &mut self,
        array_type: &Type,
        dimension_sizes: &[i32],
    ) -> EvalResult<Value> {
        self.calls
            .push(format!("new_multi_dimensional_array {array_type} {dimension_sizes:?}"));
        Ok(Value::object(FakeObject(array_type.clone())))
    }

    fn get_array_length(&mut self, _array: Value) -> EvalResult<Value> {
        self.unsupported("get_array_length")
    }

    fn get_array_element(&mut self, _array: Value, index: Value) -> EvalResult<Value> {
        self.calls.push(format!("get_array_element {index}"));
        Ok(Value::Int(0))
    }

    fn set_array_element(
        &mut self,
        _array: Value,
        index: Value,
        new_value: Value,
    ) -> EvalResult<()> {
        self.calls.push(format!("set_array_element {index} {new_value}"));
        Ok(())
    }

    fn get_static_field(&mut self, _field: &FieldDescriptor) -> EvalResult<Value> {
        self.unsupported("get_static_field")
    }

    fn set_static_field(&mut self, field: &FieldDescriptor, new_value: Value) -> EvalResult<()> {
        self.calls.push(format!("set_static_field {field} {new_value}"));
        Ok(())
    }

    fn invoke_static_method(
        &mut self,
        method: &MethodDescriptor,
        arguments: Vec<Value>,
    ) -> EvalResult<Value> {
        self.calls
            .push(format!("invoke_static_method {} {}", method.name, arguments.len()));
        Ok(Value::Void)
    }

    fn get_field(&mut self, _instance: Value, field: &FieldDescriptor) -> EvalResult<Value> {
        self.calls.push(format!("get_field {field}"));
        Ok(Value::Int(0))
    }

    fn set_field(
        &mut self,
        _instance: Value,
        field: &FieldDescriptor,
        new_value: Value,
    ) -> EvalResult<()> {
        self.calls.push(format!("set_field {field} {new_value}"));
        Ok(())
    }

    fn invoke_method(
        &mut self,
        _instance: Value,
        method: &MethodDescriptor,
        arguments: Vec<Value>,
        invokespecial: bool,
    ) -> EvalResult<Value> {
        self.calls.push(format!(
            "invoke_method {}{} {} {invokespecial}",
            method.name,
            method.desc,
            arguments.len()
        ));
        Ok(Value::Void)
    }
}

/// `Control` recording every transfer.
#[derive(Debug, Default)]
pub struct RecordingControl {
    pub jumps: Vec<Label>,
    pub returned: Vec<Value>,
    pub thrown: Vec<Value>,
}

impl Control for RecordingControl {
    fn jump(&mut self, label: Label) {
        self.jumps.push(label);
    }

    fn return_value(&mut self, value: Value) {
        self.returned.push(value);
    }

    fn throw_exception(&mut self, value: Value) {
        self.thrown.push(value);
    }
}

pub type TestInterpreter = SingleInstructionInterpreter<RecordingEval, RecordingControl>;

pub fn interpreter() -> TestInterpreter {
    SingleInstructionInterpreter::new(RecordingEval::default(), RecordingControl::default())
}
