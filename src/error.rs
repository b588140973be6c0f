//! Error types shared by the decoder, the interpreter and the runtime.
use crate::bytecode::OPCode;
use crate::instruction::Label;
use crate::value::ValueKind;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, InterpreterError>;

/// `InterpreterError` represents structural failures: malformed input,
/// unsupported features or broken host contracts. Exceptions thrown by the
/// interpreted program are never reported through this type.
#[derive(Error, Debug)]
pub enum InterpreterError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ValueKind, found: ValueKind },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid instruction {opcode}: {reason}")]
    InvalidInstruction { opcode: OPCode, reason: String },

    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("malformed bytecode at offset {offset}: {reason}")]
    MalformedBytecode { offset: usize, reason: String },

    #[error("invalid type descriptor `{0}`")]
    InvalidDescriptor(String),

    #[error("unresolved constant pool entry #{0}")]
    UnresolvedConstant(u16),

    #[error("invalid class file: {0}")]
    InvalidClassFile(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("operand stack overflow (max {0})")]
    StackOverflow(usize),

    #[error("invalid local variable index {0}")]
    InvalidLocal(usize),

    #[error("invalid jump target {0}")]
    InvalidJumpTarget(Label),

    #[error("call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("step limit of {0} instructions exceeded")]
    StepLimitExceeded(u64),

    #[error("method not found: {0}")]
    MethodNotFound(String),
}

impl InterpreterError {
    /// Shorthand for an unsupported opcode at a given entry point.
    pub fn unsupported(opcode: OPCode) -> Self {
        Self::UnsupportedOperation(format!("{opcode}"))
    }

    pub fn invalid(opcode: OPCode, reason: impl Into<String>) -> Self {
        Self::InvalidInstruction {
            opcode,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedBytecode {
            offset,
            reason: reason.into(),
        }
    }
}
