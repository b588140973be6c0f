//! Single instruction abstract interpreter for JVM bytecode, together with
//! the class file reader, the bytecode decoder and a method runtime able to
//! drive it.
pub mod bytecode;
pub mod capability;
pub mod config;
pub mod error;
pub mod host;
pub mod instruction;
pub mod interpreter;
pub mod jvm;
pub mod program;
pub mod runtime;
pub mod types;
pub mod value;

pub use capability::{Control, Eval, EvalError, EvalResult};
pub use config::{InterpreterConfig, RuntimeConfig};
pub use error::{InterpreterError, Result};
pub use instruction::{Constant, FieldDescriptor, Instruction, Label, MethodDescriptor};
pub use interpreter::SingleInstructionInterpreter;
pub use runtime::{Completion, Runtime};
pub use types::{Type, TypeSort};
pub use value::{nan_biased_compare, NanBias, ObjectRef, Value, ValueKind};
