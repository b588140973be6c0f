//! Lightweight implementation of a parser and decoder for JVM bytecode
//! class files.
//!
//! Only the container format is handled: constant pool, members and their
//! attributes. `Code` attributes are decoded, every other attribute is kept
//! as raw bytes.
use crate::error::{InterpreterError, Result};
use crate::instruction::{Constant, FieldDescriptor, MethodDescriptor};
use crate::types::Type;

use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

const MAGIC: u32 = 0xcafe_babe;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

/// Constant pool entries.
#[derive(Debug, Clone, PartialEq)]
pub enum CPInfo {
    // Index 0 and the slot following a long or double constant.
    Unusable,
    ConstantUtf8 {
        bytes: String,
    },
    ConstantInteger {
        bytes: i32,
    },
    ConstantFloat {
        bytes: f32,
    },
    ConstantLong {
        bytes: i64,
    },
    ConstantDouble {
        bytes: f64,
    },
    ConstantClass {
        name_index: u16,
    },
    ConstantString {
        string_index: u16,
    },
    ConstantFieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantInterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantNameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    ConstantMethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    ConstantMethodType {
        descriptor_index: u16,
    },
    ConstantDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    ConstantInvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    ConstantModule {
        name_index: u16,
    },
    ConstantPackage {
        name_index: u16,
    },
}

/// Class constant pool, indexed from 1 like in the class file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<CPInfo>,
}

impl ConstantPool {
    /// Build a pool from its entries, the first entry gets index 1. Long
    /// and double constants must be followed by `CPInfo::Unusable`.
    pub fn new(entries: Vec<CPInfo>) -> Self {
        let mut all = Vec::with_capacity(entries.len() + 1);
        all.push(CPInfo::Unusable);
        all.extend(entries);
        Self { entries: all }
    }

    /// Number of slots, as encoded in `constant_pool_count`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&CPInfo> {
        match self.entries.get(index as usize) {
            Some(CPInfo::Unusable) | None => {
                Err(InterpreterError::UnresolvedConstant(index))
            }
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CPInfo::ConstantUtf8 { bytes } => Ok(bytes),
            _ => Err(InterpreterError::UnresolvedConstant(index)),
        }
    }

    /// Internal name of the class referenced by a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CPInfo::ConstantClass { name_index } => self.utf8(*name_index),
            _ => Err(InterpreterError::UnresolvedConstant(index)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            CPInfo::ConstantNameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(InterpreterError::UnresolvedConstant(index)),
        }
    }

    pub fn field_ref(&self, index: u16) -> Result<FieldDescriptor> {
        match self.get(index)? {
            CPInfo::ConstantFieldRef {
                class_index,
                name_and_type_index,
            } => {
                let owner = self.class_name(*class_index)?;
                let (name, desc) = self.name_and_type(*name_and_type_index)?;
                FieldDescriptor::new(owner, name, desc)
            }
            _ => Err(InterpreterError::UnresolvedConstant(index)),
        }
    }

    pub fn method_ref(&self, index: u16) -> Result<MethodDescriptor> {
        let (class_index, name_and_type_index, is_interface) =
            match self.get(index)? {
                CPInfo::ConstantMethodRef {
                    class_index,
                    name_and_type_index,
                } => (*class_index, *name_and_type_index, false),
                CPInfo::ConstantInterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => (*class_index, *name_and_type_index, true),
                _ => return Err(InterpreterError::UnresolvedConstant(index)),
            };
        let owner = self.class_name(class_index)?;
        let (name, desc) = self.name_and_type(name_and_type_index)?;
        MethodDescriptor::new(owner, name, desc, is_interface)
    }

    /// Resolve a constant loadable by `ldc`, `ldc_w` or `ldc2_w`.
    pub fn loadable(&self, index: u16) -> Result<Constant> {
        Ok(match self.get(index)? {
            CPInfo::ConstantInteger { bytes } => Constant::Int(*bytes),
            CPInfo::ConstantFloat { bytes } => Constant::Float(*bytes),
            CPInfo::ConstantLong { bytes } => Constant::Long(*bytes),
            CPInfo::ConstantDouble { bytes } => Constant::Double(*bytes),
            CPInfo::ConstantString { string_index } => {
                Constant::String(self.utf8(*string_index)?.to_string())
            }
            CPInfo::ConstantClass { name_index } => {
                Constant::Type(Type::object_type(self.utf8(*name_index)?)?)
            }
            CPInfo::ConstantMethodType { descriptor_index } => {
                Constant::Type(Type::from_descriptor(
                    self.utf8(*descriptor_index)?,
                )?)
            }
            CPInfo::ConstantMethodHandle {
                reference_kind,
                reference_index,
            } => Constant::MethodHandle {
                reference_kind: *reference_kind,
                reference_index: *reference_index,
            },
            CPInfo::ConstantDynamic {
                name_and_type_index,
                ..
            } => {
                let (name, desc) = self.name_and_type(*name_and_type_index)?;
                Constant::Dynamic {
                    name: name.to_string(),
                    desc: desc.to_string(),
                }
            }
            _ => return Err(InterpreterError::UnresolvedConstant(index)),
        })
    }
}

/// Entry of a `Code` attribute exception table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    // Zero catches everything (`finally`).
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInfo {
    Code(CodeAttribute),
    Raw { name: String, info: Vec<u8> },
}

impl AttributeInfo {
    pub fn name(&self) -> &str {
        match self {
            Self::Code(_) => "Code",
            Self::Raw { name, .. } => name,
        }
    }
}

/// Field or method of a class.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    pub fn access_flags(&self) -> u16 {
        self.access_flags
    }

    pub fn name_index(&self) -> u16 {
        self.name_index
    }

    pub fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }

    pub fn attributes(&self) -> &[AttributeInfo] {
        &self.attributes
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|attr| match attr {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

/// In-memory representation of a parsed class file.
#[derive(Debug, Clone, PartialEq)]
pub struct JVMClassFile {
    minor_version: u16,
    major_version: u16,
    constant_pool: ConstantPool,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<MemberInfo>,
    methods: Vec<MemberInfo>,
    attributes: Vec<AttributeInfo>,
}

impl JVMClassFile {
    pub fn version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    pub fn access_flags(&self) -> u16 {
        self.access_flags
    }

    /// Internal name of the class.
    pub fn class_name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the super class, `None` for `java/lang/Object`.
    pub fn super_class_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn interfaces(&self) -> &[u16] {
        &self.interfaces
    }

    pub fn fields(&self) -> &[MemberInfo] {
        &self.fields
    }

    pub fn methods(&self) -> &[MemberInfo] {
        &self.methods
    }

    pub fn attributes(&self) -> &[AttributeInfo] {
        &self.attributes
    }
}

/// Class file parser.
pub struct JVMParser<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> JVMParser<'a> {
    /// Parse a class file from its bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<JVMClassFile> {
        let mut parser = Self {
            cursor: Cursor::new(bytes),
        };
        let class_file = parser.class_file()?;
        if (parser.cursor.position() as usize) != bytes.len() {
            return Err(InterpreterError::InvalidClassFile(
                "trailing bytes after class file".to_string(),
            ));
        }
        Ok(class_file)
    }

    fn class_file(&mut self) -> Result<JVMClassFile> {
        let magic = self.u32()?;
        if magic != MAGIC {
            return Err(InterpreterError::InvalidClassFile(format!(
                "bad magic 0x{magic:08x}"
            )));
        }
        let minor_version = self.u16()?;
        let major_version = self.u16()?;
        let constant_pool = self.constant_pool()?;
        let access_flags = self.u16()?;
        let this_class = self.u16()?;
        let super_class = self.u16()?;
        let interfaces_count = self.u16()?;
        let interfaces = (0..interfaces_count)
            .map(|_| self.u16())
            .collect::<Result<Vec<_>>>()?;
        let fields = self.members(&constant_pool)?;
        let methods = self.members(&constant_pool)?;
        let attributes = self.attributes(&constant_pool)?;
        Ok(JVMClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn constant_pool(&mut self) -> Result<ConstantPool> {
        let count = self.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(CPInfo::Unusable);
        while entries.len() < count as usize {
            let tag = self.u8()?;
            let entry = match tag {
                1 => {
                    let length = self.u16()?;
                    let bytes = self.bytes(length as usize)?;
                    CPInfo::ConstantUtf8 {
                        bytes: decode_modified_utf8(&bytes),
                    }
                }
                3 => CPInfo::ConstantInteger { bytes: self.i32()? },
                4 => CPInfo::ConstantFloat {
                    bytes: f32::from_bits(self.u32()?),
                },
                5 => CPInfo::ConstantLong {
                    bytes: self.u64()? as i64,
                },
                6 => CPInfo::ConstantDouble {
                    bytes: f64::from_bits(self.u64()?),
                },
                7 => CPInfo::ConstantClass {
                    name_index: self.u16()?,
                },
                8 => CPInfo::ConstantString {
                    string_index: self.u16()?,
                },
                9 => CPInfo::ConstantFieldRef {
                    class_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                10 => CPInfo::ConstantMethodRef {
                    class_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                11 => CPInfo::ConstantInterfaceMethodRef {
                    class_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                12 => CPInfo::ConstantNameAndType {
                    name_index: self.u16()?,
                    descriptor_index: self.u16()?,
                },
                15 => CPInfo::ConstantMethodHandle {
                    reference_kind: self.u8()?,
                    reference_index: self.u16()?,
                },
                16 => CPInfo::ConstantMethodType {
                    descriptor_index: self.u16()?,
                },
                17 => CPInfo::ConstantDynamic {
                    bootstrap_method_attr_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                18 => CPInfo::ConstantInvokeDynamic {
                    bootstrap_method_attr_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                19 => CPInfo::ConstantModule {
                    name_index: self.u16()?,
                },
                20 => CPInfo::ConstantPackage {
                    name_index: self.u16()?,
                },
                _ => {
                    return Err(InterpreterError::InvalidClassFile(format!(
                        "unknown constant pool tag {tag}"
                    )))
                }
            };
            let wide = matches!(
                entry,
                CPInfo::ConstantLong { .. } | CPInfo::ConstantDouble { .. }
            );
            entries.push(entry);
            // Eight byte constants take two slots.
            if wide {
                entries.push(CPInfo::Unusable);
            }
        }
        if entries.len() != count as usize {
            return Err(InterpreterError::InvalidClassFile(
                "wide constant overflows the constant pool".to_string(),
            ));
        }
        Ok(ConstantPool { entries })
    }

    fn members(&mut self, pool: &ConstantPool) -> Result<Vec<MemberInfo>> {
        let count = self.u16()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let access_flags = self.u16()?;
            let name_index = self.u16()?;
            let descriptor_index = self.u16()?;
            let attributes = self.attributes(pool)?;
            members.push(MemberInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }
        Ok(members)
    }

    fn attributes(&mut self, pool: &ConstantPool) -> Result<Vec<AttributeInfo>> {
        let count = self.u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = pool.utf8(self.u16()?)?.to_string();
            let length = self.u32()? as usize;
            let info = self.bytes(length)?;
            let attribute = if name == "Code" {
                let mut nested = JVMParser {
                    cursor: Cursor::new(info.as_slice()),
                };
                let code = nested.code_attribute(pool)?;
                if (nested.cursor.position() as usize) != info.len() {
                    return Err(InterpreterError::InvalidClassFile(
                        "Code attribute length mismatch".to_string(),
                    ));
                }
                AttributeInfo::Code(code)
            } else {
                AttributeInfo::Raw { name, info }
            };
            attributes.push(attribute);
        }
        Ok(attributes)
    }

    fn code_attribute(&mut self, pool: &ConstantPool) -> Result<CodeAttribute> {
        let max_stack = self.u16()?;
        let max_locals = self.u16()?;
        let code_length = self.u32()? as usize;
        let code = self.bytes(code_length)?;
        let table_length = self.u16()?;
        let mut exception_table = Vec::with_capacity(table_length as usize);
        for _ in 0..table_length {
            exception_table.push(ExceptionTableEntry {
                start_pc: self.u16()?,
                end_pc: self.u16()?,
                handler_pc: self.u16()?,
                catch_type: self.u16()?,
            });
        }
        let attributes = self.attributes(pool)?;
        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(truncated)
    }

    fn u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<BigEndian>().map_err(truncated)
    }

    fn u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<BigEndian>().map_err(truncated)
    }

    fn i32(&mut self) -> Result<i32> {
        self.cursor.read_i32::<BigEndian>().map_err(truncated)
    }

    fn u64(&mut self) -> Result<u64> {
        self.cursor.read_u64::<BigEndian>().map_err(truncated)
    }

    fn bytes(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.cursor.read_exact(&mut buf).map_err(truncated)?;
        Ok(buf)
    }
}

fn truncated(_: std::io::Error) -> InterpreterError {
    InterpreterError::InvalidClassFile("unexpected end of class file".into())
}

/// Decode the JVM's modified UTF-8: NUL is encoded on two bytes and
/// supplementary characters as surrogate pairs of three bytes each.
fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i] as u16;
        if b & 0x80 == 0 {
            units.push(b);
            i += 1;
        } else if b & 0xe0 == 0xc0 && i + 1 < bytes.len() {
            units.push(((b & 0x1f) << 6) | (bytes[i + 1] as u16 & 0x3f));
            i += 2;
        } else if b & 0xf0 == 0xe0 && i + 2 < bytes.len() {
            units.push(
                ((b & 0x0f) << 12)
                    | ((bytes[i + 1] as u16 & 0x3f) << 6)
                    | (bytes[i + 2] as u16 & 0x3f),
            );
            i += 3;
        } else {
            units.push(0xfffd);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

/// Read a class file from disk.
pub fn read_class_file(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut buffer = Vec::new();
    f.read_to_end(&mut buffer)?;
    Ok(buffer)
}
