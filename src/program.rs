//! Abstract representation of a Java program.
use crate::error::{InterpreterError, Result};
use crate::instruction::{decode, Instruction, Label};
use crate::jvm::{CodeAttribute, ConstantPool, JVMClassFile, ACC_STATIC};
use crate::types::{Type, TypeSort};

use std::collections::HashMap;

/// Entry of a method's exception table, with resolved catch type.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    // Covered range of bytecode offsets, end excluded.
    pub start: usize,
    pub end: usize,
    pub handler: Label,
    // `None` catches everything.
    pub catch_type: Option<Type>,
}

impl ExceptionHandler {
    pub fn covers(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Java class method representation for the interpreter.
#[derive(Debug, Clone)]
pub struct Method {
    name: String,
    descriptor: Type,
    access_flags: u16,
    max_stack: u16,
    max_locals: u16,
    instructions: Vec<(usize, Instruction)>,
    exception_handlers: Vec<ExceptionHandler>,
    // Bytecode offset to position in `instructions`.
    positions: HashMap<usize, usize>,
}

impl Method {
    /// Build a method from its `Code` attribute, decoding the bytecode
    /// against the class constant pool.
    pub fn new(
        name: &str,
        descriptor: &str,
        access_flags: u16,
        code: &CodeAttribute,
        pool: &ConstantPool,
    ) -> Result<Self> {
        let descriptor = Type::from_descriptor(descriptor)?;
        if descriptor.sort() != TypeSort::Method {
            return Err(InterpreterError::InvalidDescriptor(descriptor.to_string()));
        }
        let instructions = decode(&code.code, pool)?;
        let positions = instructions
            .iter()
            .enumerate()
            .map(|(position, (offset, _))| (*offset, position))
            .collect::<HashMap<_, _>>();
        let mut exception_handlers = Vec::with_capacity(code.exception_table.len());
        for entry in &code.exception_table {
            let handler = entry.handler_pc as usize;
            if !positions.contains_key(&handler) {
                return Err(InterpreterError::InvalidJumpTarget(Label(handler as u32)));
            }
            let catch_type = match entry.catch_type {
                0 => None,
                index => Some(Type::object_type(pool.class_name(index)?)?),
            };
            exception_handlers.push(ExceptionHandler {
                start: entry.start_pc as usize,
                end: entry.end_pc as usize,
                handler: Label(handler as u32),
                catch_type,
            });
        }
        Ok(Self {
            name: name.to_string(),
            descriptor,
            access_flags,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            instructions,
            exception_handlers,
            positions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Type {
        &self.descriptor
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack as usize
    }

    pub fn max_locals(&self) -> usize {
        self.max_locals as usize
    }

    pub fn instructions(&self) -> &[(usize, Instruction)] {
        &self.instructions
    }

    pub fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.exception_handlers
    }

    pub fn return_type(&self) -> Type {
        // The descriptor was validated as a method type on construction.
        self.descriptor
            .return_type()
            .unwrap_or_else(|| self.descriptor.clone())
    }

    /// Position in `instructions()` of the instruction at `label`.
    pub fn position(&self, label: Label) -> Result<usize> {
        self.positions
            .get(&(label.0 as usize))
            .copied()
            .ok_or(InterpreterError::InvalidJumpTarget(label))
    }
}

/// Representation of Java programs that we want to run: the methods of a
/// single class that carry bytecode.
#[derive(Debug, Clone)]
pub struct Program {
    class_name: String,
    constant_pool: ConstantPool,
    methods: Vec<Method>,
}

impl Program {
    /// Build a new program from a parsed class file. Abstract and native
    /// methods have no bytecode and are skipped.
    pub fn new(class_file: &JVMClassFile) -> Result<Self> {
        let pool = class_file.constant_pool();
        let mut methods = Vec::new();
        for method_info in class_file.methods() {
            let code = match method_info.code() {
                Some(code) => code,
                None => continue,
            };
            let name = pool.utf8(method_info.name_index())?;
            let descriptor = pool.utf8(method_info.descriptor_index())?;
            methods.push(Method::new(
                name,
                descriptor,
                method_info.access_flags(),
                code,
                pool,
            )?);
        }
        Ok(Self {
            class_name: class_file.class_name()?.to_string(),
            constant_pool: pool.clone(),
            methods,
        })
    }

    pub fn from_methods(class_name: &str, methods: Vec<Method>) -> Self {
        Self {
            class_name: class_name.to_string(),
            constant_pool: ConstantPool::default(),
            methods,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Find a method by name, and by descriptor when given.
    pub fn find_method(&self, name: &str, descriptor: Option<&str>) -> Result<&Method> {
        self.methods
            .iter()
            .find(|m| {
                m.name == name && descriptor.map_or(true, |d| m.descriptor.descriptor() == d)
            })
            .ok_or_else(|| {
                InterpreterError::MethodNotFound(format!(
                    "{}.{}{}",
                    self.class_name,
                    name,
                    descriptor.unwrap_or("")
                ))
            })
    }
}
