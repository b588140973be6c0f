//! Instruction level behaviour of the single instruction interpreter.
mod common;

use coldeval::bytecode::OPCode;
use coldeval::{
    Constant, FieldDescriptor, Instruction, InterpreterError, Label, MethodDescriptor, Type,
    Value, ValueKind,
};
use common::{interpreter, FakeObject};
use proptest::prelude::*;

fn simple(opcode: OPCode) -> Instruction {
    Instruction::Simple(opcode)
}

fn jump(opcode: OPCode, offset: u32) -> Instruction {
    Instruction::Jump {
        opcode,
        label: Label(offset),
    }
}

fn binary(opcode: OPCode, value1: Value, value2: Value) -> Option<Value> {
    interpreter()
        .binary_operation(&simple(opcode), value1, value2)
        .unwrap()
}

fn unary(opcode: OPCode, value: Value) -> Option<Value> {
    interpreter().unary_operation(&simple(opcode), value).unwrap()
}

#[test]
fn idiv_truncates_toward_zero() {
    assert_eq!(binary(OPCode::IDiv, Value::Int(7), Value::Int(2)), Some(Value::Int(3)));
    assert_eq!(binary(OPCode::IDiv, Value::Int(-7), Value::Int(2)), Some(Value::Int(-3)));
    assert_eq!(binary(OPCode::IRem, Value::Int(-7), Value::Int(2)), Some(Value::Int(-1)));
    assert_eq!(
        binary(OPCode::IDiv, Value::Int(i32::MIN), Value::Int(-1)),
        Some(Value::Int(i32::MIN))
    );
    assert_eq!(binary(OPCode::IRem, Value::Int(i32::MIN), Value::Int(-1)), Some(Value::Int(0)));
    assert_eq!(
        binary(OPCode::LDiv, Value::Long(i64::MIN), Value::Long(-1)),
        Some(Value::Long(i64::MIN))
    );
}

#[test]
fn division_by_zero_throws_arithmetic_exception() {
    let mut interp = interpreter();
    let result = interp
        .binary_operation(&simple(OPCode::IDiv), Value::Int(1), Value::Int(0))
        .unwrap();
    assert_eq!(result, None);
    assert_eq!(
        interp.eval().calls,
        vec![
            "new_instance Ljava/lang/ArithmeticException;".to_string(),
            "invoke_method <init>(Ljava/lang/String;)V 1 true".to_string(),
        ]
    );
    let thrown = &interp.control().thrown;
    assert_eq!(thrown.len(), 1);
    let exception = thrown[0].as_object().unwrap().unwrap();
    let class = exception.downcast_ref::<FakeObject>().unwrap();
    assert_eq!(class.0.internal_name(), "java/lang/ArithmeticException");
}

#[test]
fn fcmp_nan_bias() {
    let nan = f32::NAN;
    for other in [0.0f32, -1.0, f32::INFINITY, f32::NAN] {
        assert_eq!(binary(OPCode::FCmpG, Value::Float(nan), Value::Float(other)), Some(Value::Int(1)));
        assert_eq!(binary(OPCode::FCmpG, Value::Float(other), Value::Float(nan)), Some(Value::Int(1)));
        assert_eq!(binary(OPCode::FCmpL, Value::Float(nan), Value::Float(other)), Some(Value::Int(-1)));
        assert_eq!(binary(OPCode::FCmpL, Value::Float(other), Value::Float(nan)), Some(Value::Int(-1)));
    }
    let nan = f64::NAN;
    assert_eq!(binary(OPCode::DCmpG, Value::Double(nan), Value::Double(1.0)), Some(Value::Int(1)));
    assert_eq!(binary(OPCode::DCmpG, Value::Double(1.0), Value::Double(nan)), Some(Value::Int(1)));
    assert_eq!(binary(OPCode::DCmpL, Value::Double(nan), Value::Double(1.0)), Some(Value::Int(-1)));
    assert_eq!(binary(OPCode::DCmpL, Value::Double(1.0), Value::Double(nan)), Some(Value::Int(-1)));
    // Signed zeros compare equal.
    assert_eq!(binary(OPCode::DCmpL, Value::Double(-0.0), Value::Double(0.0)), Some(Value::Int(0)));
}

#[test]
fn l2i_keeps_low_bits() {
    assert_eq!(unary(OPCode::L2I, Value::Long(0x1_0000_0001)), Some(Value::Int(1)));
    let narrowed = unary(OPCode::L2I, Value::Long(0x1_0000_0001)).unwrap();
    assert_eq!(unary(OPCode::I2L, narrowed), Some(Value::Long(1)));
}

#[test]
fn unknown_opcode_at_every_arity() {
    let mut interp = interpreter();
    for insn in [simple(OPCode::Nop), simple(OPCode::Breakpoint)] {
        assert!(matches!(
            interp.new_operation(&insn),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            interp.unary_operation(&insn, Value::Int(0)),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            interp.binary_operation(&insn, Value::Int(0), Value::Int(0)),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            interp.ternary_operation(&insn, Value::Int(0), Value::Int(0), Value::Int(0)),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            interp.nary_operation(&insn, vec![Value::Int(0)]),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            interp.return_operation(&insn, Value::Int(0), &Value::Void),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
    }
    assert!(interp.eval().calls.is_empty());
    assert!(interp.control().jumps.is_empty());
}

#[test]
fn iconst_iinc_iadd_scenario() {
    let mut interp = interpreter();
    let two = interp.new_operation(&simple(OPCode::IConst2)).unwrap().unwrap();
    assert_eq!(two, Value::Int(2));
    let iinc = Instruction::IInc { var: 1, incr: 3 };
    let five = interp.unary_operation(&iinc, two).unwrap().unwrap();
    assert_eq!(five, Value::Int(5));
    let fifteen = interp
        .binary_operation(&simple(OPCode::IAdd), five, Value::Int(10))
        .unwrap();
    assert_eq!(fifteen, Some(Value::Int(15)));
}

#[test]
fn ldc_constants() {
    let mut interp = interpreter();
    let hello = interp
        .new_operation(&Instruction::Ldc(Constant::String("hello".to_string())))
        .unwrap()
        .unwrap();
    assert_eq!(hello.kind(), ValueKind::Object);
    assert_eq!(hello.as_object().unwrap().unwrap().as_str(), Some("hello"));

    let handle = Instruction::Ldc(Constant::MethodHandle {
        reference_kind: 6,
        reference_index: 12,
    });
    assert!(matches!(
        interp.new_operation(&handle),
        Err(InterpreterError::UnsupportedOperation(_))
    ));

    let primitive = Instruction::Ldc(Constant::Type(Type::from_descriptor("I").unwrap()));
    assert!(matches!(
        interp.new_operation(&primitive),
        Err(InterpreterError::UnsupportedOperation(_))
    ));

    let class = Instruction::Ldc(Constant::Type(Type::object_type("java/lang/String").unwrap()));
    assert!(interp.new_operation(&class).unwrap().is_some());
    assert_eq!(interp.eval().calls, vec!["load_class Ljava/lang/String;".to_string()]);
}

#[test]
fn if_acmpeq_jumps_on_identity() {
    let mut interp = interpreter();
    let insn = jump(OPCode::IfACmpEq, 42);
    assert_eq!(interp.binary_operation(&insn, Value::NULL, Value::NULL).unwrap(), None);
    assert_eq!(interp.control().jumps, vec![Label(42)]);

    let object = Value::string("x");
    interp.binary_operation(&insn, Value::NULL, object.clone()).unwrap();
    assert_eq!(interp.control().jumps.len(), 1);

    interp.binary_operation(&insn, object.clone(), object.clone()).unwrap();
    assert_eq!(interp.control().jumps.len(), 2);

    // Equal contents but distinct objects.
    interp.binary_operation(&insn, object, Value::string("x")).unwrap();
    assert_eq!(interp.control().jumps.len(), 2);
}

#[test]
fn conditional_jumps() {
    let mut interp = interpreter();
    interp.unary_operation(&jump(OPCode::IfLt, 3), Value::Int(-1)).unwrap();
    interp.unary_operation(&jump(OPCode::IfLt, 4), Value::Int(0)).unwrap();
    interp.unary_operation(&jump(OPCode::IfNull, 5), Value::NULL).unwrap();
    interp
        .binary_operation(&jump(OPCode::IfICmpGe, 6), Value::Int(2), Value::Int(2))
        .unwrap();
    assert_eq!(interp.control().jumps, vec![Label(3), Label(5), Label(6)]);
}

#[test]
fn type_mismatch_is_fatal() {
    let mut interp = interpreter();
    let result = interp.binary_operation(&simple(OPCode::IAdd), Value::Int(1), Value::Long(1));
    assert!(matches!(
        result,
        Err(InterpreterError::TypeMismatch {
            expected: ValueKind::Int,
            found: ValueKind::Long
        })
    ));
    assert!(interp.control().thrown.is_empty());
}

#[test]
fn invocations_split_receiver() {
    let mut interp = interpreter();
    let method = MethodDescriptor::new("Foo", "bar", "(IJ)I", false).unwrap();
    let invoke = Instruction::Method {
        opcode: OPCode::InvokeVirtual,
        method: method.clone(),
    };
    let receiver = Value::string("receiver");
    let result = interp
        .nary_operation(&invoke, vec![receiver, Value::Int(1), Value::Long(2)])
        .unwrap();
    // The fake returns void, which is no value.
    assert_eq!(result, None);

    let invoke = Instruction::Method {
        opcode: OPCode::InvokeStatic,
        method,
    };
    interp.nary_operation(&invoke, vec![Value::Int(1), Value::Long(2)]).unwrap();

    let multi = Instruction::MultiANewArray {
        desc: "[[I".to_string(),
        dims: 2,
    };
    assert!(interp.nary_operation(&multi, vec![Value::Int(3), Value::Int(4)]).unwrap().is_some());
    assert_eq!(
        interp.eval().calls,
        vec![
            "invoke_method bar(IJ)I 2 false".to_string(),
            "invoke_static_method bar 2".to_string(),
            "new_multi_dimensional_array [[I [3, 4]".to_string(),
        ]
    );
}

#[test]
fn invokespecial_flag_follows_the_opcode() {
    let mut interp = interpreter();
    let method = MethodDescriptor::new("Foo", "run", "()V", false).unwrap();
    for opcode in [OPCode::InvokeSpecial, OPCode::InvokeInterface, OPCode::InvokeVirtual] {
        let invoke = Instruction::Method {
            opcode,
            method: method.clone(),
        };
        interp.nary_operation(&invoke, vec![Value::string("receiver")]).unwrap();
    }
    assert_eq!(
        interp.eval().calls,
        vec![
            "invoke_method run()V 0 true".to_string(),
            "invoke_method run()V 0 false".to_string(),
            "invoke_method run()V 0 false".to_string(),
        ]
    );
}

#[test]
fn lcmp_orders_longs() {
    assert_eq!(binary(OPCode::LCmp, Value::Long(1), Value::Long(2)), Some(Value::Int(-1)));
    assert_eq!(binary(OPCode::LCmp, Value::Long(7), Value::Long(7)), Some(Value::Int(0)));
    assert_eq!(
        binary(OPCode::LCmp, Value::Long(i64::MAX), Value::Long(i64::MIN)),
        Some(Value::Int(1))
    );
}

#[test]
fn monitors_switches_and_invokedynamic_are_unsupported() {
    let mut interp = interpreter();
    let lock = Value::string("lock");
    for opcode in [OPCode::MonitorEnter, OPCode::MonitorExit] {
        assert!(matches!(
            interp.unary_operation(&simple(opcode), lock.clone()),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
    }

    let table = Instruction::TableSwitch {
        default: Label(20),
        low: 0,
        high: 1,
        labels: vec![Label(10), Label(15)],
    };
    let lookup = Instruction::LookupSwitch {
        default: Label(20),
        pairs: vec![(3, Label(10))],
    };
    for switch in [table, lookup] {
        assert!(matches!(
            interp.unary_operation(&switch, Value::Int(0)),
            Err(InterpreterError::UnsupportedOperation(_))
        ));
    }

    let indy = Instruction::InvokeDynamic {
        name: "apply".to_string(),
        desc: "(I)Ljava/lang/Runnable;".to_string(),
    };
    assert!(matches!(
        interp.nary_operation(&indy, vec![Value::Int(1)]),
        Err(InterpreterError::UnsupportedOperation(_))
    ));
    assert!(interp.eval().calls.is_empty());
    assert!(interp.control().jumps.is_empty());
}

#[test]
fn array_accesses_make_a_single_eval_call() {
    let mut interp = interpreter();
    let array = Value::string("array");
    for opcode in [OPCode::IALoad, OPCode::BALoad, OPCode::AALoad] {
        let element = interp
            .binary_operation(&simple(opcode), array.clone(), Value::Int(1))
            .unwrap();
        assert_eq!(element, Some(Value::Int(0)));
    }
    for (opcode, element) in [
        (OPCode::LAStore, Value::Long(5)),
        (OPCode::CAStore, Value::Int(65)),
        (OPCode::AAStore, Value::NULL),
    ] {
        let stored = interp
            .ternary_operation(&simple(opcode), array.clone(), Value::Int(2), element)
            .unwrap();
        assert_eq!(stored, None);
    }
    assert_eq!(
        interp.eval().calls,
        vec![
            "get_array_element 1".to_string(),
            "get_array_element 1".to_string(),
            "get_array_element 1".to_string(),
            "set_array_element 2 5L".to_string(),
            "set_array_element 2 65".to_string(),
            "set_array_element 2 null".to_string(),
        ]
    );
}

#[test]
fn field_and_allocation_operands_reach_eval() {
    let mut interp = interpreter();
    let field = FieldDescriptor::new("com/Foo", "count", "I").unwrap();
    let instance = Value::string("instance");

    let get = Instruction::Field {
        opcode: OPCode::GetField,
        field: field.clone(),
    };
    assert_eq!(
        interp.unary_operation(&get, instance.clone()).unwrap(),
        Some(Value::Int(0))
    );
    let put = Instruction::Field {
        opcode: OPCode::PutField,
        field: field.clone(),
    };
    assert_eq!(interp.binary_operation(&put, instance, Value::Int(3)).unwrap(), None);
    let put_static = Instruction::Field {
        opcode: OPCode::PutStatic,
        field,
    };
    assert_eq!(interp.unary_operation(&put_static, Value::Int(4)).unwrap(), None);

    let new = Instruction::Type {
        opcode: OPCode::New,
        desc: "com/Foo".to_string(),
    };
    assert!(interp.new_operation(&new).unwrap().is_some());
    for desc in ["java/lang/String", "[I"] {
        let anewarray = Instruction::Type {
            opcode: OPCode::ANewArray,
            desc: desc.to_string(),
        };
        assert!(interp.unary_operation(&anewarray, Value::Int(2)).unwrap().is_some());
    }

    assert_eq!(
        interp.eval().calls,
        vec![
            "get_field Lcom/Foo;.count:I".to_string(),
            "set_field Lcom/Foo;.count:I 3".to_string(),
            "set_static_field Lcom/Foo;.count:I 4".to_string(),
            "new_instance Lcom/Foo;".to_string(),
            "new_array [Ljava/lang/String; 2".to_string(),
            "new_array [[I 2".to_string(),
        ]
    );
}

#[test]
fn return_operation_reports_to_control() {
    let mut interp = interpreter();
    let expected = Value::NotInitialized(Type::from_descriptor("J").unwrap());
    interp
        .return_operation(&simple(OPCode::LReturn), Value::Long(9), &expected)
        .unwrap();
    assert_eq!(interp.control().returned, vec![Value::Long(9)]);
    assert!(interp
        .return_operation(&simple(OPCode::IReturn), Value::Long(9), &expected)
        .is_err());
}

proptest! {
    #[test]
    fn prop_idiv_matches_wrapping_division(a in any::<i32>(), b in any::<i32>().prop_filter("non zero", |b| *b != 0)) {
        prop_assert_eq!(binary(OPCode::IDiv, Value::Int(a), Value::Int(b)), Some(Value::Int(a.wrapping_div(b))));
        prop_assert_eq!(binary(OPCode::IRem, Value::Int(a), Value::Int(b)), Some(Value::Int(a.wrapping_rem(b))));
    }

    #[test]
    fn prop_nan_bias_orders_unordered_operands(x in any::<f64>()) {
        prop_assert_eq!(binary(OPCode::DCmpG, Value::Double(f64::NAN), Value::Double(x)), Some(Value::Int(1)));
        prop_assert_eq!(binary(OPCode::DCmpL, Value::Double(x), Value::Double(f64::NAN)), Some(Value::Int(-1)));
        let y = x as f32;
        prop_assert_eq!(binary(OPCode::FCmpG, Value::Float(y), Value::Float(f32::NAN)), Some(Value::Int(1)));
        prop_assert_eq!(binary(OPCode::FCmpL, Value::Float(f32::NAN), Value::Float(y)), Some(Value::Int(-1)));
    }

    #[test]
    fn prop_ordered_compare_is_three_way(a in -1.0e6f32..1.0e6, b in -1.0e6f32..1.0e6) {
        let expected = if a > b { 1 } else if a < b { -1 } else { 0 };
        prop_assert_eq!(binary(OPCode::FCmpG, Value::Float(a), Value::Float(b)), Some(Value::Int(expected)));
        prop_assert_eq!(binary(OPCode::FCmpL, Value::Float(a), Value::Float(b)), Some(Value::Int(expected)));
    }

    #[test]
    fn prop_l2i_round_trip_is_lossy(v in any::<i64>()) {
        let narrowed = unary(OPCode::L2I, Value::Long(v)).unwrap();
        prop_assert_eq!(&narrowed, &Value::Int(v as i32));
        let widened = unary(OPCode::I2L, narrowed).unwrap();
        let fits = i64::from(v as i32) == v;
        prop_assert_eq!(widened == Value::Long(v), fits);
    }

    #[test]
    fn prop_merge_returns_newest(v in any::<i32>(), w in any::<i64>()) {
        let interp = interpreter();
        prop_assert_eq!(interp.merge(Value::Int(v), Value::Long(w)), Value::Long(w));
    }
}
