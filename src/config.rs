//! Interpreter and runtime configuration.
//!
//! Configuration only states limits and policies; the interpreter and the
//! runtime enforce them.

/// Policies of the single instruction interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Reject `xreturn` instructions whose value does not match the
    /// instruction's category (e.g. an int returned through `areturn`).
    /// When disabled the value is forwarded as is.
    pub strict_returns: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            strict_returns: true,
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Limits of the method runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub interpreter: InterpreterConfig,

    /// Maximum number of instructions executed per method invocation,
    /// unlimited when `None`.
    pub max_steps: Option<u64>,

    /// Upper bound on the operand stack, on top of the method's own
    /// `max_stack`.
    pub max_stack_depth: usize,

    /// Maximum nesting of invocations run by the in-memory host.
    pub max_call_depth: usize,

    /// Largest number of elements the in-memory host allocates for one
    /// `newarray`, `anewarray` or `multianewarray`. Bigger requests throw
    /// `java/lang/OutOfMemoryError` in the guest.
    pub max_array_length: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            interpreter: InterpreterConfig::default(),
            max_steps: None,
            max_stack_depth: 1024,
            max_call_depth: 256,
            max_array_length: 1 << 24,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}
