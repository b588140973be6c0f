//! JVM runtime module responsible for running a single method: it owns the
//! operand stack and the locals, feeds each instruction with its inputs to
//! the `SingleInstructionInterpreter` and applies the control transfers the
//! interpreter requests.
use crate::bytecode::OPCode;
use crate::capability::{Control, Eval};
use crate::config::RuntimeConfig;
use crate::error::{InterpreterError, Result};
use crate::instruction::{Instruction, Label};
use crate::interpreter::SingleInstructionInterpreter;
use crate::program::Method;
use crate::types::Type;
use crate::value::Value;

use tracing::{debug, trace, warn};

/// How a method invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Normal completion, `None` for void methods.
    Returned(Option<Value>),
    /// A guest exception escaped the method.
    Threw(Value),
}

#[derive(Debug, Clone, PartialEq)]
enum Transfer {
    Jump(Label),
    Return(Value),
    Throw(Value),
}

/// `Control` recording the transfer requested by the current instruction.
#[derive(Debug, Default)]
struct FrameControl {
    transfer: Option<Transfer>,
}

impl Control for FrameControl {
    fn jump(&mut self, label: Label) {
        self.transfer = Some(Transfer::Jump(label));
    }

    fn return_value(&mut self, value: Value) {
        self.transfer = Some(Transfer::Return(value));
    }

    fn throw_exception(&mut self, value: Value) {
        self.transfer = Some(Transfer::Throw(value));
    }
}

/// Execution state of a method invocation: the program counter, the
/// operand stack and the locals.
#[derive(Debug, Clone)]
struct Frame {
    // Position of the next instruction in `Method::instructions`.
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
    max_stack: usize,
}

impl Frame {
    /// Arguments are laid out in the locals, long and double taking two
    /// slots.
    fn new(method: &Method, arguments: Vec<Value>, max_stack: usize) -> Result<Self> {
        let mut locals = vec![Value::Void; method.max_locals()];
        let mut slot = 0;
        for argument in arguments {
            let size = argument.size();
            if slot + size > locals.len() {
                return Err(InterpreterError::InvalidLocal(slot));
            }
            locals[slot] = argument;
            slot += size;
        }
        Ok(Self {
            pc: 0,
            stack: Vec::with_capacity(max_stack),
            locals,
            max_stack,
        })
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= self.max_stack {
            return Err(InterpreterError::StackOverflow(self.max_stack));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(InterpreterError::StackUnderflow)
    }

    /// Pop `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        if self.stack.len() < n {
            return Err(InterpreterError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn load(&self, index: usize) -> Result<Value> {
        self.locals
            .get(index)
            .cloned()
            .ok_or(InterpreterError::InvalidLocal(index))
    }

    fn store(&mut self, index: usize, value: Value) -> Result<()> {
        let size = value.size();
        if index + size > self.locals.len() {
            return Err(InterpreterError::InvalidLocal(index));
        }
        // Overwriting the upper half of a wide value invalidates it.
        if index > 0 && self.locals[index - 1].size() == 2 {
            self.locals[index - 1] = Value::Void;
        }
        self.locals[index] = value;
        if size == 2 {
            self.locals[index + 1] = Value::Void;
        }
        Ok(())
    }

    /// Stack manipulation instructions, following the computational
    /// category rules of `pop2` and the `dup2` family.
    fn shuffle(&mut self, opcode: OPCode) -> Result<()> {
        match opcode {
            OPCode::Pop => {
                self.pop()?;
            }
            OPCode::Pop2 => {
                if self.pop()?.size() == 1 {
                    self.pop()?;
                }
            }
            OPCode::Dup => {
                let v1 = self.pop()?;
                self.push_all(vec![v1.clone(), v1])?;
            }
            OPCode::DupX1 => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                self.push_all(vec![v1.clone(), v2, v1])?;
            }
            OPCode::DupX2 => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                if v2.size() == 2 {
                    self.push_all(vec![v1.clone(), v2, v1])?;
                } else {
                    let v3 = self.pop()?;
                    self.push_all(vec![v1.clone(), v3, v2, v1])?;
                }
            }
            OPCode::Dup2 => {
                let v1 = self.pop()?;
                if v1.size() == 2 {
                    self.push_all(vec![v1.clone(), v1])?;
                } else {
                    let v2 = self.pop()?;
                    self.push_all(vec![v2.clone(), v1.clone(), v2, v1])?;
                }
            }
            OPCode::Dup2X1 => {
                let v1 = self.pop()?;
                if v1.size() == 2 {
                    let v2 = self.pop()?;
                    self.push_all(vec![v1.clone(), v2, v1])?;
                } else {
                    let v2 = self.pop()?;
                    let v3 = self.pop()?;
                    self.push_all(vec![v2.clone(), v1.clone(), v3, v2, v1])?;
                }
            }
            OPCode::Dup2X2 => {
                let v1 = self.pop()?;
                if v1.size() == 2 {
                    let v2 = self.pop()?;
                    if v2.size() == 2 {
                        self.push_all(vec![v1.clone(), v2, v1])?;
                    } else {
                        let v3 = self.pop()?;
                        self.push_all(vec![v1.clone(), v3, v2, v1])?;
                    }
                } else {
                    let v2 = self.pop()?;
                    let v3 = self.pop()?;
                    if v3.size() == 2 {
                        self.push_all(vec![v2.clone(), v1.clone(), v3, v2, v1])?;
                    } else {
                        let v4 = self.pop()?;
                        self.push_all(vec![v2.clone(), v1.clone(), v4, v3, v2, v1])?;
                    }
                }
            }
            OPCode::Swap => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                self.push_all(vec![v1, v2])?;
            }
            _ => return Err(InterpreterError::unsupported(opcode)),
        }
        Ok(())
    }

    fn push_all(&mut self, values: Vec<Value>) -> Result<()> {
        for value in values {
            self.push(value)?;
        }
        Ok(())
    }
}

/// `Runtime` executes methods one instruction at a time on top of a host
/// supplied `Eval`.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run `method` to completion. For instance methods the receiver is the
    /// first argument.
    pub fn execute<E: Eval>(
        &self,
        method: &Method,
        arguments: Vec<Value>,
        eval: &mut E,
    ) -> Result<Completion> {
        debug!(method = method.name(), descriptor = %method.descriptor(), "enter");
        let max_stack = method.max_stack().min(self.config.max_stack_depth);
        let mut frame = Frame::new(method, arguments, max_stack)?;
        let mut interp = SingleInstructionInterpreter::with_config(
            eval,
            FrameControl::default(),
            self.config.interpreter.clone(),
        );
        let expected = interp
            .new_value(Some(&method.return_type()))
            .unwrap_or(Value::Void);
        let mut steps: u64 = 0;

        loop {
            if let Some(max_steps) = self.config.max_steps {
                if steps >= max_steps {
                    return Err(InterpreterError::StepLimitExceeded(max_steps));
                }
            }
            steps += 1;

            let (offset, insn) = method.instructions().get(frame.pc).ok_or_else(|| {
                InterpreterError::malformed(frame.pc, "execution fell off the end of the code")
            })?;
            let offset = *offset;
            frame.pc += 1;
            trace!(offset, instruction = %insn, "step");
            Self::step(&mut interp, &mut frame, method, offset, insn, &expected)?;

            match interp.control_mut().transfer.take() {
                None => {}
                Some(Transfer::Jump(label)) => frame.pc = method.position(label)?,
                Some(Transfer::Return(value)) => {
                    debug!(method = method.name(), %value, "return");
                    return Ok(Completion::Returned(Some(value).filter(|v| !v.is_void())));
                }
                Some(Transfer::Throw(exception)) => {
                    match Self::find_handler(method, offset, &exception, interp.eval_mut())? {
                        Some(position) => {
                            debug!(offset, %exception, "exception caught");
                            frame.stack.clear();
                            frame.push(exception)?;
                            frame.pc = position;
                        }
                        None => {
                            warn!(method = method.name(), %exception, "uncaught exception");
                            return Ok(Completion::Threw(exception));
                        }
                    }
                }
            }
        }
    }

    /// Evaluate a given instruction, popping its inputs and pushing its
    /// result.
    fn step<E: Eval>(
        interp: &mut SingleInstructionInterpreter<E, FrameControl>,
        frame: &mut Frame,
        method: &Method,
        offset: usize,
        insn: &Instruction,
        expected: &Value,
    ) -> Result<()> {
        let opcode = insn.opcode();
        let result = match opcode {
            OPCode::Nop => None,

            OPCode::AConstNull
            | OPCode::IConstM1
            | OPCode::IConst0
            | OPCode::IConst1
            | OPCode::IConst2
            | OPCode::IConst3
            | OPCode::IConst4
            | OPCode::IConst5
            | OPCode::LConst0
            | OPCode::LConst1
            | OPCode::FConst0
            | OPCode::FConst1
            | OPCode::FConst2
            | OPCode::DConst0
            | OPCode::DConst1
            | OPCode::BiPush
            | OPCode::SiPush
            | OPCode::Ldc
            | OPCode::LdcW
            | OPCode::Ldc2W
            | OPCode::GetStatic
            | OPCode::New => interp.new_operation(insn)?,

            OPCode::ILoad | OPCode::LLoad | OPCode::FLoad | OPCode::DLoad | OPCode::ALoad => {
                let value = frame.load(local_index(insn)?)?;
                Some(interp.copy_operation(insn, value))
            }

            OPCode::IStore | OPCode::LStore | OPCode::FStore | OPCode::DStore | OPCode::AStore => {
                let value = frame.pop()?;
                let value = interp.copy_operation(insn, value);
                frame.store(local_index(insn)?, value)?;
                None
            }

            OPCode::IInc => {
                let index = local_index(insn)?;
                let value = frame.load(index)?;
                if let Some(value) = interp.unary_operation(insn, value)? {
                    frame.store(index, value)?;
                }
                None
            }

            OPCode::Pop
            | OPCode::Pop2
            | OPCode::Dup
            | OPCode::DupX1
            | OPCode::DupX2
            | OPCode::Dup2
            | OPCode::Dup2X1
            | OPCode::Dup2X2
            | OPCode::Swap => {
                frame.shuffle(opcode)?;
                None
            }

            OPCode::Goto => {
                let label = insn
                    .label()
                    .ok_or_else(|| InterpreterError::invalid(opcode, "expected a jump label"))?;
                interp.control_mut().jump(label);
                None
            }

            // The return address is the instruction following the jsr.
            OPCode::Jsr => {
                let label = insn
                    .label()
                    .ok_or_else(|| InterpreterError::invalid(opcode, "expected a jump label"))?;
                let next = method
                    .instructions()
                    .get(frame.pc)
                    .map(|(offset, _)| *offset)
                    .ok_or_else(|| InterpreterError::malformed(offset, "jsr at end of code"))?;
                frame.push(Value::Label(Label(next as u32)))?;
                interp.control_mut().jump(label);
                None
            }
            OPCode::Ret => {
                let label = frame.load(local_index(insn)?)?.as_label()?;
                interp.control_mut().jump(label);
                None
            }

            OPCode::INeg
            | OPCode::LNeg
            | OPCode::FNeg
            | OPCode::DNeg
            | OPCode::I2L
            | OPCode::I2F
            | OPCode::I2D
            | OPCode::L2I
            | OPCode::L2F
            | OPCode::L2D
            | OPCode::F2I
            | OPCode::F2L
            | OPCode::F2D
            | OPCode::D2I
            | OPCode::D2L
            | OPCode::D2F
            | OPCode::I2B
            | OPCode::I2C
            | OPCode::I2S
            | OPCode::IfEq
            | OPCode::IfNe
            | OPCode::IfLt
            | OPCode::IfGe
            | OPCode::IfGt
            | OPCode::IfLe
            | OPCode::IfNull
            | OPCode::IfNonNull
            | OPCode::TableSwitch
            | OPCode::LookupSwitch
            | OPCode::PutStatic
            | OPCode::GetField
            | OPCode::NewArray
            | OPCode::ANewArray
            | OPCode::ArrayLength
            | OPCode::AThrow
            | OPCode::CheckCast
            | OPCode::InstanceOf
            | OPCode::MonitorEnter
            | OPCode::MonitorExit => {
                let value = frame.pop()?;
                interp.unary_operation(insn, value)?
            }

            OPCode::IALoad
            | OPCode::LALoad
            | OPCode::FALoad
            | OPCode::DALoad
            | OPCode::AALoad
            | OPCode::BALoad
            | OPCode::CALoad
            | OPCode::SALoad
            | OPCode::IAdd
            | OPCode::LAdd
            | OPCode::FAdd
            | OPCode::DAdd
            | OPCode::ISub
            | OPCode::LSub
            | OPCode::FSub
            | OPCode::DSub
            | OPCode::IMul
            | OPCode::LMul
            | OPCode::FMul
            | OPCode::DMul
            | OPCode::IDiv
            | OPCode::LDiv
            | OPCode::FDiv
            | OPCode::DDiv
            | OPCode::IRem
            | OPCode::LRem
            | OPCode::FRem
            | OPCode::DRem
            | OPCode::IShl
            | OPCode::LShl
            | OPCode::IShr
            | OPCode::LShr
            | OPCode::IUShr
            | OPCode::LUShr
            | OPCode::IAnd
            | OPCode::LAnd
            | OPCode::IOr
            | OPCode::LOr
            | OPCode::IXor
            | OPCode::LXor
            | OPCode::LCmp
            | OPCode::FCmpL
            | OPCode::FCmpG
            | OPCode::DCmpL
            | OPCode::DCmpG
            | OPCode::IfICmpEq
            | OPCode::IfICmpNe
            | OPCode::IfICmpLt
            | OPCode::IfICmpGe
            | OPCode::IfICmpGt
            | OPCode::IfICmpLe
            | OPCode::IfACmpEq
            | OPCode::IfACmpNe
            | OPCode::PutField => {
                let value2 = frame.pop()?;
                let value1 = frame.pop()?;
                interp.binary_operation(insn, value1, value2)?
            }

            OPCode::IAStore
            | OPCode::LAStore
            | OPCode::FAStore
            | OPCode::DAStore
            | OPCode::AAStore
            | OPCode::BAStore
            | OPCode::CAStore
            | OPCode::SAStore => {
                let value3 = frame.pop()?;
                let value2 = frame.pop()?;
                let value1 = frame.pop()?;
                interp.ternary_operation(insn, value1, value2, value3)?
            }

            OPCode::InvokeVirtual
            | OPCode::InvokeSpecial
            | OPCode::InvokeInterface
            | OPCode::InvokeStatic
            | OPCode::InvokeDynamic
            | OPCode::MultiANewArray => {
                let values = frame.pop_n(nary_inputs(insn)?)?;
                interp.nary_operation(insn, values)?
            }

            OPCode::IReturn
            | OPCode::LReturn
            | OPCode::FReturn
            | OPCode::DReturn
            | OPCode::AReturn => {
                let value = frame.pop()?;
                interp.return_operation(insn, value, expected)?;
                None
            }
            OPCode::Return => {
                interp.control_mut().return_value(Value::Void);
                None
            }

            OPCode::Wide | OPCode::Breakpoint | OPCode::ImpDep1 | OPCode::ImpDep2 => {
                return Err(InterpreterError::unsupported(opcode))
            }

            // Short forms, goto_w and jsr_w never leave the decoder.
            _ => return Err(InterpreterError::invalid(opcode, "expected a normalised instruction")),
        };
        if let Some(value) = result {
            frame.push(value)?;
        }
        Ok(())
    }

    /// Position of the handler catching `exception` thrown at `offset`.
    fn find_handler<E: Eval>(
        method: &Method,
        offset: usize,
        exception: &Value,
        eval: &mut E,
    ) -> Result<Option<usize>> {
        for handler in method.exception_handlers() {
            if !handler.covers(offset) {
                continue;
            }
            let caught = match &handler.catch_type {
                None => true,
                Some(catch_type) => eval.is_instance_of(exception, catch_type),
            };
            if caught {
                return method.position(handler.handler).map(Some);
            }
        }
        Ok(None)
    }
}

fn local_index(insn: &Instruction) -> Result<usize> {
    match insn {
        Instruction::Var { var, .. } | Instruction::IInc { var, .. } => Ok(*var as usize),
        _ => Err(InterpreterError::invalid(insn.opcode(), "expected a local variable")),
    }
}

/// Number of stack values consumed by an n-ary instruction.
fn nary_inputs(insn: &Instruction) -> Result<usize> {
    let arguments = |desc: &Type| desc.argument_types().len();
    match insn {
        Instruction::Method { opcode, method } => Ok(match opcode {
            OPCode::InvokeStatic => arguments(&method.desc),
            _ => arguments(&method.desc) + 1,
        }),
        Instruction::InvokeDynamic { desc, .. } => Ok(arguments(&Type::from_descriptor(desc)?)),
        Instruction::MultiANewArray { dims, .. } => Ok(*dims as usize),
        _ => Err(InterpreterError::invalid(insn.opcode(), "expected an invocation")),
    }
}
