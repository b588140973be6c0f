//! Single instruction interpreter for JVM bytecode.
//!
//! Evaluates one instruction at a time given its already computed stack
//! inputs. Dispatch follows the number of values an opcode pops: nullary,
//! unary, binary, ternary and n-ary entry points, plus returns and the
//! merge of values at control flow joins. Heap and control flow effects are
//! delegated to the `Eval` and `Control` capabilities.
use crate::bytecode::{array_type, OPCode};
use crate::capability::{Control, Eval, EvalError, EvalResult};
use crate::config::InterpreterConfig;
use crate::error::{InterpreterError, Result};
use crate::instruction::{Constant, FieldDescriptor, Instruction, Label, MethodDescriptor};
use crate::types::{Type, TypeSort};
use crate::value::{nan_biased_compare, NanBias, Value, ValueKind};

use std::cmp::Ordering;
use tracing::{debug, trace};

/// `SingleInstructionInterpreter` holds no state across calls besides its
/// capabilities: each call is a function of the instruction and its inputs.
#[derive(Debug)]
pub struct SingleInstructionInterpreter<E: Eval, C: Control> {
    eval: E,
    control: C,
    config: InterpreterConfig,
}

impl<E: Eval, C: Control> SingleInstructionInterpreter<E, C> {
    pub fn new(eval: E, control: C) -> Self {
        Self::with_config(eval, control, InterpreterConfig::default())
    }

    pub fn with_config(eval: E, control: C, config: InterpreterConfig) -> Self {
        Self {
            eval,
            control,
            config,
        }
    }

    pub fn eval(&self) -> &E {
        &self.eval
    }

    pub fn eval_mut(&mut self) -> &mut E {
        &mut self.eval
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn into_parts(self) -> (E, C) {
        (self.eval, self.control)
    }

    /// Returns the value for a slot of the given declared type. An absent
    /// type yields the `Void` filler and the void type yields nothing.
    pub fn new_value(&self, t: Option<&Type>) -> Option<Value> {
        match t {
            None => Some(Value::Void),
            Some(t) if t.sort() == TypeSort::Void => None,
            Some(t) => Some(Value::NotInitialized(t.clone())),
        }
    }

    /// Instructions that push a value without popping any.
    pub fn new_operation(&mut self, insn: &Instruction) -> Result<Option<Value>> {
        let opcode = insn.opcode();
        trace!(instruction = %insn, "nullary");
        let value = match opcode {
            OPCode::AConstNull => Value::NULL,

            OPCode::IConstM1
            | OPCode::IConst0
            | OPCode::IConst1
            | OPCode::IConst2
            | OPCode::IConst3
            | OPCode::IConst4
            | OPCode::IConst5 => {
                Value::Int(opcode.byte() as i32 - OPCode::IConst0.byte() as i32)
            }

            OPCode::LConst0 => Value::Long(0),
            OPCode::LConst1 => Value::Long(1),

            OPCode::FConst0 => Value::Float(0.0),
            OPCode::FConst1 => Value::Float(1.0),
            OPCode::FConst2 => Value::Float(2.0),

            OPCode::DConst0 => Value::Double(0.0),
            OPCode::DConst1 => Value::Double(1.0),

            OPCode::BiPush | OPCode::SiPush => Value::Int(int_operand(insn)?),

            OPCode::Ldc | OPCode::LdcW | OPCode::Ldc2W => {
                let cst = match insn {
                    Instruction::Ldc(cst) => cst,
                    _ => return Err(InterpreterError::invalid(opcode, "expected a constant")),
                };
                match cst {
                    Constant::Int(x) => Value::Int(*x),
                    Constant::Float(x) => Value::Float(*x),
                    Constant::Long(x) => Value::Long(*x),
                    Constant::Double(x) => Value::Double(*x),
                    Constant::String(s) => Value::string(s),
                    Constant::Type(t) => match t.sort() {
                        TypeSort::Object | TypeSort::Array => {
                            return guest(&mut self.control, self.eval.load_class(t));
                        }
                        TypeSort::Method => {
                            return Err(InterpreterError::UnsupportedOperation(
                                "method type constants are not supported".to_string(),
                            ))
                        }
                        _ => {
                            return Err(InterpreterError::UnsupportedOperation(format!(
                                "illegal ldc constant {t}"
                            )))
                        }
                    },
                    Constant::MethodHandle { .. } => {
                        return Err(InterpreterError::UnsupportedOperation(
                            "method handles are not supported".to_string(),
                        ))
                    }
                    Constant::Dynamic { .. } => {
                        return Err(InterpreterError::UnsupportedOperation(
                            "dynamic constants are not supported".to_string(),
                        ))
                    }
                }
            }

            OPCode::Jsr => Value::Label(jump_label(insn)?),

            OPCode::GetStatic => {
                let field = field_operand(insn)?;
                return guest(&mut self.control, self.eval.get_static_field(field));
            }

            OPCode::New => {
                let class_type = type_operand(insn)?;
                return guest(&mut self.control, self.eval.new_instance(&class_type));
            }

            _ => return Err(InterpreterError::unsupported(opcode)),
        };
        Ok(Some(value))
    }

    /// Loads, stores and stack shuffles move values around untouched.
    pub fn copy_operation(&self, _insn: &Instruction, value: Value) -> Value {
        value
    }

    pub fn unary_operation(
        &mut self,
        insn: &Instruction,
        value: Value,
    ) -> Result<Option<Value>> {
        let opcode = insn.opcode();
        trace!(instruction = %insn, %value, "unary");
        let result = match opcode {
            OPCode::INeg => Value::Int(value.as_int()?.wrapping_neg()),
            OPCode::IInc => {
                let incr = match insn {
                    Instruction::IInc { incr, .. } => *incr,
                    _ => return Err(InterpreterError::invalid(opcode, "expected an increment")),
                };
                Value::Int(value.as_int()?.wrapping_add(incr))
            }
            // Float to int conversions saturate and map NaN to zero, like
            // the JVM.
            OPCode::L2I => Value::Int(value.as_long()? as i32),
            OPCode::F2I => Value::Int(value.as_float()? as i32),
            OPCode::D2I => Value::Int(value.as_double()? as i32),
            OPCode::I2B => Value::byte(value.as_int()? as i8),
            OPCode::I2C => Value::char(value.as_int()? as u16),
            OPCode::I2S => Value::short(value.as_int()? as i16),

            OPCode::FNeg => Value::Float(-value.as_float()?),
            OPCode::I2F => Value::Float(value.as_int()? as f32),
            OPCode::L2F => Value::Float(value.as_long()? as f32),
            OPCode::D2F => Value::Float(value.as_double()? as f32),

            OPCode::LNeg => Value::Long(value.as_long()?.wrapping_neg()),
            OPCode::I2L => Value::Long(value.as_int()? as i64),
            OPCode::F2L => Value::Long(value.as_float()? as i64),
            OPCode::D2L => Value::Long(value.as_double()? as i64),

            OPCode::DNeg => Value::Double(-value.as_double()?),
            OPCode::I2D => Value::Double(value.as_int()? as f64),
            OPCode::L2D => Value::Double(value.as_long()? as f64),
            OPCode::F2D => Value::Double(value.as_float()? as f64),

            OPCode::IfEq
            | OPCode::IfNe
            | OPCode::IfLt
            | OPCode::IfGe
            | OPCode::IfGt
            | OPCode::IfLe
            | OPCode::IfNull
            | OPCode::IfNonNull => {
                let label = jump_label(insn)?;
                let taken = match opcode {
                    OPCode::IfEq => value.as_int()? == 0,
                    OPCode::IfNe => value.as_int()? != 0,
                    OPCode::IfLt => value.as_int()? < 0,
                    OPCode::IfGe => value.as_int()? >= 0,
                    OPCode::IfGt => value.as_int()? > 0,
                    OPCode::IfLe => value.as_int()? <= 0,
                    OPCode::IfNull => value.as_object()?.is_none(),
                    _ => value.as_object()?.is_some(),
                };
                self.branch(label, taken);
                return Ok(None);
            }

            OPCode::TableSwitch | OPCode::LookupSwitch => {
                return Err(InterpreterError::UnsupportedOperation(
                    "switch instructions are not supported".to_string(),
                ))
            }

            OPCode::PutStatic => {
                let field = field_operand(insn)?;
                guest(&mut self.control, self.eval.set_static_field(field, value))?;
                return Ok(None);
            }

            OPCode::GetField => {
                let field = field_operand(insn)?;
                return guest(&mut self.control, self.eval.get_field(value, field));
            }

            OPCode::NewArray => {
                let descriptor = match int_operand(insn)? {
                    array_type::T_BOOLEAN => "[Z",
                    array_type::T_CHAR => "[C",
                    array_type::T_BYTE => "[B",
                    array_type::T_SHORT => "[S",
                    array_type::T_INT => "[I",
                    array_type::T_FLOAT => "[F",
                    array_type::T_DOUBLE => "[D",
                    array_type::T_LONG => "[J",
                    other => {
                        return Err(InterpreterError::invalid(
                            opcode,
                            format!("invalid array type {other}"),
                        ))
                    }
                };
                let array_type = Type::from_descriptor(descriptor)?;
                let size = value.as_int()?;
                return guest(&mut self.control, self.eval.new_array(&array_type, size));
            }
            OPCode::ANewArray => {
                let array_type = Type::array_of(&type_operand(insn)?);
                let size = value.as_int()?;
                return guest(&mut self.control, self.eval.new_array(&array_type, size));
            }
            OPCode::ArrayLength => {
                return guest(&mut self.control, self.eval.get_array_length(value));
            }

            OPCode::AThrow => {
                debug!(exception = %value, "athrow");
                self.control.throw_exception(value);
                return Ok(None);
            }

            OPCode::CheckCast => {
                let target_type = type_operand(insn)?;
                return guest(&mut self.control, self.eval.check_cast(value, &target_type));
            }

            OPCode::InstanceOf => {
                let target_type = type_operand(insn)?;
                Value::boolean(self.eval.is_instance_of(&value, &target_type))
            }

            OPCode::MonitorEnter | OPCode::MonitorExit => {
                return Err(InterpreterError::UnsupportedOperation(
                    "monitor instructions are not supported".to_string(),
                ))
            }

            _ => return Err(InterpreterError::unsupported(opcode)),
        };
        Ok(Some(result))
    }

    pub fn binary_operation(
        &mut self,
        insn: &Instruction,
        value1: Value,
        value2: Value,
    ) -> Result<Option<Value>> {
        let opcode = insn.opcode();
        trace!(instruction = %insn, %value1, %value2, "binary");
        let result = match opcode {
            // The element type is left to the host.
            OPCode::IALoad
            | OPCode::BALoad
            | OPCode::CALoad
            | OPCode::SALoad
            | OPCode::FALoad
            | OPCode::LALoad
            | OPCode::DALoad
            | OPCode::AALoad => {
                return guest(&mut self.control, self.eval.get_array_element(value1, value2));
            }

            OPCode::IAdd => Value::Int(value1.as_int()?.wrapping_add(value2.as_int()?)),
            OPCode::ISub => Value::Int(value1.as_int()?.wrapping_sub(value2.as_int()?)),
            OPCode::IMul => Value::Int(value1.as_int()?.wrapping_mul(value2.as_int()?)),
            OPCode::IDiv | OPCode::IRem => {
                let (a, b) = (value1.as_int()?, value2.as_int()?);
                if b == 0 {
                    return self.throw_arithmetic_exception();
                }
                if opcode == OPCode::IDiv {
                    Value::Int(a.wrapping_div(b))
                } else {
                    Value::Int(a.wrapping_rem(b))
                }
            }
            // Shift distances are masked to their low five bits.
            OPCode::IShl => Value::Int(value1.as_int()?.wrapping_shl(value2.as_int()? as u32)),
            OPCode::IShr => Value::Int(value1.as_int()?.wrapping_shr(value2.as_int()? as u32)),
            OPCode::IUShr => Value::Int(
                (value1.as_int()? as u32).wrapping_shr(value2.as_int()? as u32) as i32,
            ),
            OPCode::IAnd => Value::Int(value1.as_int()? & value2.as_int()?),
            OPCode::IOr => Value::Int(value1.as_int()? | value2.as_int()?),
            OPCode::IXor => Value::Int(value1.as_int()? ^ value2.as_int()?),

            OPCode::LAdd => Value::Long(value1.as_long()?.wrapping_add(value2.as_long()?)),
            OPCode::LSub => Value::Long(value1.as_long()?.wrapping_sub(value2.as_long()?)),
            OPCode::LMul => Value::Long(value1.as_long()?.wrapping_mul(value2.as_long()?)),
            OPCode::LDiv | OPCode::LRem => {
                let (a, b) = (value1.as_long()?, value2.as_long()?);
                if b == 0 {
                    return self.throw_arithmetic_exception();
                }
                if opcode == OPCode::LDiv {
                    Value::Long(a.wrapping_div(b))
                } else {
                    Value::Long(a.wrapping_rem(b))
                }
            }
            // Long shifts take an int distance masked to six bits.
            OPCode::LShl => Value::Long(value1.as_long()?.wrapping_shl(value2.as_int()? as u32)),
            OPCode::LShr => Value::Long(value1.as_long()?.wrapping_shr(value2.as_int()? as u32)),
            OPCode::LUShr => Value::Long(
                (value1.as_long()? as u64).wrapping_shr(value2.as_int()? as u32) as i64,
            ),
            OPCode::LAnd => Value::Long(value1.as_long()? & value2.as_long()?),
            OPCode::LOr => Value::Long(value1.as_long()? | value2.as_long()?),
            OPCode::LXor => Value::Long(value1.as_long()? ^ value2.as_long()?),

            OPCode::FAdd => Value::Float(value1.as_float()? + value2.as_float()?),
            OPCode::FSub => Value::Float(value1.as_float()? - value2.as_float()?),
            OPCode::FMul => Value::Float(value1.as_float()? * value2.as_float()?),
            OPCode::FDiv => Value::Float(value1.as_float()? / value2.as_float()?),
            OPCode::FRem => Value::Float(value1.as_float()? % value2.as_float()?),

            OPCode::DAdd => Value::Double(value1.as_double()? + value2.as_double()?),
            OPCode::DSub => Value::Double(value1.as_double()? - value2.as_double()?),
            OPCode::DMul => Value::Double(value1.as_double()? * value2.as_double()?),
            OPCode::DDiv => Value::Double(value1.as_double()? / value2.as_double()?),
            OPCode::DRem => Value::Double(value1.as_double()? % value2.as_double()?),

            OPCode::LCmp => Value::Int(match value1.as_long()?.cmp(&value2.as_long()?) {
                Ordering::Greater => 1,
                Ordering::Equal => 0,
                Ordering::Less => -1,
            }),
            OPCode::FCmpL | OPCode::FCmpG => {
                let bias = if opcode == OPCode::FCmpG {
                    NanBias::Greater
                } else {
                    NanBias::Less
                };
                Value::Int(nan_biased_compare(value1.as_float()?, value2.as_float()?, bias))
            }
            OPCode::DCmpL | OPCode::DCmpG => {
                let bias = if opcode == OPCode::DCmpG {
                    NanBias::Greater
                } else {
                    NanBias::Less
                };
                Value::Int(nan_biased_compare(value1.as_double()?, value2.as_double()?, bias))
            }

            OPCode::IfICmpEq
            | OPCode::IfICmpNe
            | OPCode::IfICmpLt
            | OPCode::IfICmpGe
            | OPCode::IfICmpGt
            | OPCode::IfICmpLe
            | OPCode::IfACmpEq
            | OPCode::IfACmpNe => {
                let label = jump_label(insn)?;
                let taken = match opcode {
                    OPCode::IfICmpEq => value1.as_int()? == value2.as_int()?,
                    OPCode::IfICmpNe => value1.as_int()? != value2.as_int()?,
                    OPCode::IfICmpLt => value1.as_int()? < value2.as_int()?,
                    OPCode::IfICmpGe => value1.as_int()? >= value2.as_int()?,
                    OPCode::IfICmpGt => value1.as_int()? > value2.as_int()?,
                    OPCode::IfICmpLe => value1.as_int()? <= value2.as_int()?,
                    OPCode::IfACmpEq => value1.same_object(&value2)?,
                    _ => !value1.same_object(&value2)?,
                };
                self.branch(label, taken);
                return Ok(None);
            }

            OPCode::PutField => {
                let field = field_operand(insn)?;
                guest(&mut self.control, self.eval.set_field(value1, field, value2))?;
                return Ok(None);
            }

            _ => return Err(InterpreterError::unsupported(opcode)),
        };
        Ok(Some(result))
    }

    pub fn ternary_operation(
        &mut self,
        insn: &Instruction,
        value1: Value,
        value2: Value,
        value3: Value,
    ) -> Result<Option<Value>> {
        let opcode = insn.opcode();
        trace!(instruction = %insn, "ternary");
        match opcode {
            OPCode::IAStore
            | OPCode::LAStore
            | OPCode::FAStore
            | OPCode::DAStore
            | OPCode::AAStore
            | OPCode::BAStore
            | OPCode::CAStore
            | OPCode::SAStore => {
                guest(
                    &mut self.control,
                    self.eval.set_array_element(value1, value2, value3),
                )?;
                Ok(None)
            }
            _ => Err(InterpreterError::unsupported(opcode)),
        }
    }

    /// Instructions popping a variable number of values: invocations and
    /// `multianewarray`. For instance calls `values[0]` is the receiver.
    pub fn nary_operation(
        &mut self,
        insn: &Instruction,
        mut values: Vec<Value>,
    ) -> Result<Option<Value>> {
        let opcode = insn.opcode();
        trace!(instruction = %insn, arity = values.len(), "n-ary");
        let result = match (opcode, insn) {
            (OPCode::MultiANewArray, Instruction::MultiANewArray { desc, dims }) => {
                let dims = *dims as usize;
                if values.len() < dims {
                    return Err(InterpreterError::invalid(
                        opcode,
                        format!("expected {dims} dimensions, got {}", values.len()),
                    ));
                }
                let sizes = values[values.len() - dims..]
                    .iter()
                    .map(Value::as_int)
                    .collect::<Result<Vec<i32>>>()?;
                let array_type = Type::object_type(desc)?;
                guest(
                    &mut self.control,
                    self.eval.new_multi_dimensional_array(&array_type, &sizes),
                )?
            }

            (OPCode::InvokeVirtual | OPCode::InvokeSpecial | OPCode::InvokeInterface, _) => {
                let method = method_operand(insn)?;
                if values.is_empty() {
                    return Err(InterpreterError::invalid(opcode, "missing receiver"));
                }
                let receiver = values.remove(0);
                guest(
                    &mut self.control,
                    self.eval.invoke_method(
                        receiver,
                        method,
                        values,
                        opcode == OPCode::InvokeSpecial,
                    ),
                )?
            }

            (OPCode::InvokeStatic, _) => {
                let method = method_operand(insn)?;
                guest(&mut self.control, self.eval.invoke_static_method(method, values))?
            }

            (OPCode::InvokeDynamic, _) => {
                return Err(InterpreterError::UnsupportedOperation(
                    "invokedynamic is not supported".to_string(),
                ))
            }

            _ => return Err(InterpreterError::unsupported(opcode)),
        };
        Ok(result.filter(|value| !value.is_void()))
    }

    /// `expected` is the value built by `new_value` for the method's
    /// declared return type.
    pub fn return_operation(
        &mut self,
        insn: &Instruction,
        value: Value,
        expected: &Value,
    ) -> Result<()> {
        let opcode = insn.opcode();
        trace!(instruction = %insn, %value, %expected, "return");
        let kind = match opcode {
            OPCode::IReturn => ValueKind::Int,
            OPCode::LReturn => ValueKind::Long,
            OPCode::FReturn => ValueKind::Float,
            OPCode::DReturn => ValueKind::Double,
            OPCode::AReturn => ValueKind::Object,
            _ => return Err(InterpreterError::unsupported(opcode)),
        };
        if self.config.strict_returns && !returns_kind(&value, kind) {
            return Err(InterpreterError::TypeMismatch {
                expected: kind,
                found: value.kind(),
            });
        }
        self.control.return_value(value);
        Ok(())
    }

    /// The newest value always wins.
    pub fn merge(&self, _v: Value, w: Value) -> Value {
        w
    }

    fn branch(&mut self, label: Label, taken: bool) {
        if taken {
            trace!(%label, "branch taken");
            self.control.jump(label);
        }
    }

    /// Raise `java.lang.ArithmeticException("/ by zero")` in the guest.
    fn throw_arithmetic_exception(&mut self) -> Result<Option<Value>> {
        const CLASS: &str = "java/lang/ArithmeticException";
        let class_type = Type::object_type(CLASS)?;
        let exception = match guest(&mut self.control, self.eval.new_instance(&class_type))? {
            Some(exception) => exception,
            None => return Ok(None),
        };
        let init = MethodDescriptor::new(CLASS, "<init>", "(Ljava/lang/String;)V", false)?;
        let constructed = guest(
            &mut self.control,
            self.eval.invoke_method(
                exception.clone(),
                &init,
                vec![Value::string("/ by zero")],
                true,
            ),
        )?;
        if constructed.is_some() {
            debug!("division by zero");
            self.control.throw_exception(exception);
        }
        Ok(None)
    }
}

fn returns_kind(value: &Value, kind: ValueKind) -> bool {
    match (value, kind) {
        (Value::NotInitialized(t), ValueKind::Object) => t.is_reference(),
        _ => value.kind() == kind,
    }
}

/// Route guest exceptions raised by the host to `Control::throw_exception`.
/// `None` means an exception was thrown and the instruction has no result.
fn guest<T, C: Control>(control: &mut C, result: EvalResult<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EvalError::Thrown(exception)) => {
            debug!(%exception, "guest exception");
            control.throw_exception(exception);
            Ok(None)
        }
        Err(EvalError::Fatal(err)) => Err(err),
    }
}

fn int_operand(insn: &Instruction) -> Result<i32> {
    match insn {
        Instruction::Int { operand, .. } => Ok(*operand),
        _ => Err(InterpreterError::invalid(insn.opcode(), "expected an int operand")),
    }
}

fn jump_label(insn: &Instruction) -> Result<Label> {
    insn.label()
        .ok_or_else(|| InterpreterError::invalid(insn.opcode(), "expected a jump label"))
}

fn field_operand(insn: &Instruction) -> Result<&FieldDescriptor> {
    match insn {
        Instruction::Field { field, .. } => Ok(field),
        _ => Err(InterpreterError::invalid(insn.opcode(), "expected a field reference")),
    }
}

fn method_operand(insn: &Instruction) -> Result<&MethodDescriptor> {
    match insn {
        Instruction::Method { method, .. } => Ok(method),
        _ => Err(InterpreterError::invalid(insn.opcode(), "expected a method reference")),
    }
}

fn type_operand(insn: &Instruction) -> Result<Type> {
    match insn {
        Instruction::Type { desc, .. } => Type::object_type(desc),
        _ => Err(InterpreterError::invalid(insn.opcode(), "expected a type operand")),
    }
}
