//! Instructions handed to the interpreter and the decoder producing them
//! from raw `Code` bytes.
use crate::bytecode::OPCode;
use crate::error::{InterpreterError, Result};
use crate::jvm::{CPInfo, ConstantPool};
use crate::types::{Type, TypeSort};

use byteorder::{BigEndian, ReadBytesExt};
use std::convert::TryFrom;
use std::fmt;
use std::io::Cursor;

/// Jump target. The decoder uses the bytecode offset of the target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Constant operand of `ldc`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    // Class, array or method type.
    Type(Type),
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    Dynamic {
        name: String,
        desc: String,
    },
}

/// Symbolic reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    pub owner: String,
    pub name: String,
    pub desc: Type,
}

impl FieldDescriptor {
    pub fn new(owner: &str, name: &str, desc: &str) -> Result<Self> {
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: Type::from_descriptor(desc)?,
        })
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{};.{}:{}", self.owner, self.name, self.desc)
    }
}

/// Symbolic reference to a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub owner: String,
    pub name: String,
    pub desc: Type,
    pub is_interface: bool,
}

impl MethodDescriptor {
    pub fn new(
        owner: &str,
        name: &str,
        desc: &str,
        is_interface: bool,
    ) -> Result<Self> {
        let desc = Type::from_descriptor(desc)?;
        if desc.sort() != TypeSort::Method {
            return Err(InterpreterError::InvalidDescriptor(desc.to_string()));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            desc,
            is_interface,
        })
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{};.{}{}", self.owner, self.name, self.desc)
    }
}

/// A decoded JVM instruction, grouped by operand shape.
///
/// Short forms are normalised: `iload_1` is `Var { ILoad, 1 }`, `ldc_w` and
/// `ldc2_w` are `Ldc`, `goto_w` is `Goto` and `jsr_w` is `Jsr`.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Instructions without operands.
    Simple(OPCode),
    // bipush, sipush, newarray
    Int { opcode: OPCode, operand: i32 },
    // xload, xstore, ret
    Var { opcode: OPCode, var: u16 },
    // new, anewarray, checkcast, instanceof; `desc` is an internal name
    // or an array descriptor.
    Type { opcode: OPCode, desc: String },
    Field { opcode: OPCode, field: FieldDescriptor },
    Method { opcode: OPCode, method: MethodDescriptor },
    InvokeDynamic { name: String, desc: String },
    Jump { opcode: OPCode, label: Label },
    Ldc(Constant),
    IInc { var: u16, incr: i32 },
    TableSwitch {
        default: Label,
        low: i32,
        high: i32,
        labels: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    MultiANewArray { desc: String, dims: u8 },
}

impl Instruction {
    pub fn opcode(&self) -> OPCode {
        match self {
            Self::Simple(opcode)
            | Self::Int { opcode, .. }
            | Self::Var { opcode, .. }
            | Self::Type { opcode, .. }
            | Self::Field { opcode, .. }
            | Self::Method { opcode, .. }
            | Self::Jump { opcode, .. } => *opcode,
            Self::InvokeDynamic { .. } => OPCode::InvokeDynamic,
            Self::Ldc(_) => OPCode::Ldc,
            Self::IInc { .. } => OPCode::IInc,
            Self::TableSwitch { .. } => OPCode::TableSwitch,
            Self::LookupSwitch { .. } => OPCode::LookupSwitch,
            Self::MultiANewArray { .. } => OPCode::MultiANewArray,
        }
    }

    /// Jump target of a branch instruction.
    pub fn label(&self) -> Option<Label> {
        match self {
            Self::Jump { label, .. } => Some(*label),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let opcode = self.opcode();
        match self {
            Self::Simple(_) => write!(f, "{opcode}"),
            Self::Int { operand, .. } => write!(f, "{opcode} {operand}"),
            Self::Var { var, .. } => write!(f, "{opcode} {var}"),
            Self::Type { desc, .. } => write!(f, "{opcode} {desc}"),
            Self::Field { field, .. } => write!(f, "{opcode} {field}"),
            Self::Method { method, .. } => write!(f, "{opcode} {method}"),
            Self::InvokeDynamic { name, desc } => {
                write!(f, "{opcode} {name}{desc}")
            }
            Self::Jump { label, .. } => write!(f, "{opcode} {label}"),
            Self::Ldc(cst) => write!(f, "{opcode} {cst:?}"),
            Self::IInc { var, incr } => write!(f, "{opcode} {var} {incr}"),
            Self::TableSwitch { low, high, .. } => {
                write!(f, "{opcode} {low}..={high}")
            }
            Self::LookupSwitch { pairs, .. } => {
                write!(f, "{opcode} ({} cases)", pairs.len())
            }
            Self::MultiANewArray { desc, dims } => {
                write!(f, "{opcode} {desc} {dims}")
            }
        }
    }
}

const LOADS: [OPCode; 5] = [
    OPCode::ILoad,
    OPCode::LLoad,
    OPCode::FLoad,
    OPCode::DLoad,
    OPCode::ALoad,
];

const STORES: [OPCode; 5] = [
    OPCode::IStore,
    OPCode::LStore,
    OPCode::FStore,
    OPCode::DStore,
    OPCode::AStore,
];

/// Decode a method's bytecode into `(offset, instruction)` pairs.
pub fn decode(code: &[u8], pool: &ConstantPool) -> Result<Vec<(usize, Instruction)>> {
    let mut decoder = Decoder {
        cursor: Cursor::new(code),
        pool,
        start: 0,
    };
    let mut instructions = Vec::new();
    while (decoder.cursor.position() as usize) < code.len() {
        decoder.start = decoder.cursor.position() as usize;
        let instruction = decoder.instruction()?;
        instructions.push((decoder.start, instruction));
    }
    Ok(instructions)
}

struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
    pool: &'a ConstantPool,
    // Offset of the instruction being decoded.
    start: usize,
}

impl<'a> Decoder<'a> {
    fn instruction(&mut self) -> Result<Instruction> {
        let pool = self.pool;
        let byte = self.u8()?;
        let opcode = OPCode::try_from(byte)?;
        Ok(match opcode {
            OPCode::BiPush => Instruction::Int {
                opcode,
                operand: self.i8()? as i32,
            },
            OPCode::SiPush => Instruction::Int {
                opcode,
                operand: self.i16()? as i32,
            },
            OPCode::NewArray => Instruction::Int {
                opcode,
                operand: self.u8()? as i32,
            },
            OPCode::Ldc => {
                let index = self.u8()? as u16;
                Instruction::Ldc(pool.loadable(index)?)
            }
            OPCode::LdcW | OPCode::Ldc2W => {
                Instruction::Ldc(pool.loadable(self.u16()?)?)
            }
            OPCode::ILoad
            | OPCode::LLoad
            | OPCode::FLoad
            | OPCode::DLoad
            | OPCode::ALoad
            | OPCode::IStore
            | OPCode::LStore
            | OPCode::FStore
            | OPCode::DStore
            | OPCode::AStore
            | OPCode::Ret => Instruction::Var {
                opcode,
                var: self.u8()? as u16,
            },
            _ if (OPCode::ILoad0.byte()..=OPCode::ALoad3.byte())
                .contains(&byte) =>
            {
                let n = byte - OPCode::ILoad0.byte();
                Instruction::Var {
                    opcode: LOADS[(n / 4) as usize],
                    var: (n % 4) as u16,
                }
            }
            _ if (OPCode::IStore0.byte()..=OPCode::AStore3.byte())
                .contains(&byte) =>
            {
                let n = byte - OPCode::IStore0.byte();
                Instruction::Var {
                    opcode: STORES[(n / 4) as usize],
                    var: (n % 4) as u16,
                }
            }
            OPCode::IInc => Instruction::IInc {
                var: self.u8()? as u16,
                incr: self.i8()? as i32,
            },
            _ if (OPCode::IfEq.byte()..=OPCode::Jsr.byte()).contains(&byte)
                || matches!(opcode, OPCode::IfNull | OPCode::IfNonNull) =>
            {
                let delta = self.i16()? as i64;
                Instruction::Jump {
                    opcode,
                    label: self.target(delta)?,
                }
            }
            OPCode::GotoW | OPCode::JsrW => {
                let delta = self.i32()? as i64;
                let opcode = if opcode == OPCode::GotoW {
                    OPCode::Goto
                } else {
                    OPCode::Jsr
                };
                Instruction::Jump {
                    opcode,
                    label: self.target(delta)?,
                }
            }
            OPCode::TableSwitch => {
                self.align()?;
                let delta = self.i32()? as i64;
                let default = self.target(delta)?;
                let low = self.i32()?;
                let high = self.i32()?;
                if high < low {
                    return Err(InterpreterError::malformed(
                        self.start,
                        "tableswitch high is below low",
                    ));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count > self.remaining() / 4 {
                    return Err(InterpreterError::malformed(
                        self.start,
                        "tableswitch jump table overruns the code",
                    ));
                }
                let mut labels = Vec::with_capacity(count);
                for _ in 0..count {
                    let delta = self.i32()? as i64;
                    labels.push(self.target(delta)?);
                }
                Instruction::TableSwitch {
                    default,
                    low,
                    high,
                    labels,
                }
            }
            OPCode::LookupSwitch => {
                self.align()?;
                let delta = self.i32()? as i64;
                let default = self.target(delta)?;
                let npairs = self.i32()?;
                if npairs < 0 {
                    return Err(InterpreterError::malformed(
                        self.start,
                        "negative lookupswitch pair count",
                    ));
                }
                if npairs as usize > self.remaining() / 8 {
                    return Err(InterpreterError::malformed(
                        self.start,
                        "lookupswitch pairs overrun the code",
                    ));
                }
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = self.i32()?;
                    let delta = self.i32()? as i64;
                    pairs.push((key, self.target(delta)?));
                }
                Instruction::LookupSwitch { default, pairs }
            }
            OPCode::GetStatic
            | OPCode::PutStatic
            | OPCode::GetField
            | OPCode::PutField => Instruction::Field {
                opcode,
                field: pool.field_ref(self.u16()?)?,
            },
            OPCode::InvokeVirtual | OPCode::InvokeSpecial | OPCode::InvokeStatic => {
                Instruction::Method {
                    opcode,
                    method: pool.method_ref(self.u16()?)?,
                }
            }
            OPCode::InvokeInterface => {
                let method = pool.method_ref(self.u16()?)?;
                // count and a zero byte, both redundant with the descriptor.
                self.u8()?;
                self.u8()?;
                Instruction::Method { opcode, method }
            }
            OPCode::InvokeDynamic => {
                let index = self.u16()?;
                self.u16()?;
                match pool.get(index)? {
                    CPInfo::ConstantInvokeDynamic {
                        name_and_type_index,
                        ..
                    } => {
                        let (name, desc) =
                            pool.name_and_type(*name_and_type_index)?;
                        Instruction::InvokeDynamic {
                            name: name.to_string(),
                            desc: desc.to_string(),
                        }
                    }
                    _ => return Err(InterpreterError::UnresolvedConstant(index)),
                }
            }
            OPCode::New
            | OPCode::ANewArray
            | OPCode::CheckCast
            | OPCode::InstanceOf => Instruction::Type {
                opcode,
                desc: pool.class_name(self.u16()?)?.to_string(),
            },
            OPCode::MultiANewArray => {
                let desc = pool.class_name(self.u16()?)?.to_string();
                let dims = self.u8()?;
                if dims == 0 {
                    return Err(InterpreterError::malformed(
                        self.start,
                        "multianewarray with zero dimensions",
                    ));
                }
                Instruction::MultiANewArray { desc, dims }
            }
            OPCode::Wide => self.wide()?,
            _ => Instruction::Simple(opcode),
        })
    }

    fn wide(&mut self) -> Result<Instruction> {
        let opcode = OPCode::try_from(self.u8()?)?;
        match opcode {
            OPCode::IInc => Ok(Instruction::IInc {
                var: self.u16()?,
                incr: self.i16()? as i32,
            }),
            OPCode::ILoad
            | OPCode::LLoad
            | OPCode::FLoad
            | OPCode::DLoad
            | OPCode::ALoad
            | OPCode::IStore
            | OPCode::LStore
            | OPCode::FStore
            | OPCode::DStore
            | OPCode::AStore
            | OPCode::Ret => Ok(Instruction::Var {
                opcode,
                var: self.u16()?,
            }),
            _ => Err(InterpreterError::malformed(
                self.start,
                format!("wide cannot modify {opcode}"),
            )),
        }
    }

    /// Resolve a branch offset relative to the current instruction.
    fn target(&self, delta: i64) -> Result<Label> {
        let target = self.start as i64 + delta;
        let len = self.cursor.get_ref().len() as i64;
        if target < 0 || target >= len {
            return Err(InterpreterError::malformed(
                self.start,
                format!("branch target {target} out of bounds"),
            ));
        }
        Ok(Label(target as u32))
    }

    /// Skip the padding preceding switch operands.
    fn remaining(&self) -> usize {
        let code = self.cursor.get_ref();
        code.len().saturating_sub(self.cursor.position() as usize)
    }

    fn align(&mut self) -> Result<()> {
        while self.cursor.position() % 4 != 0 {
            self.u8()?;
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        let start = self.start;
        self.cursor
            .read_u8()
            .map_err(|_| InterpreterError::malformed(start, "truncated instruction"))
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    fn u16(&mut self) -> Result<u16> {
        let start = self.start;
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| InterpreterError::malformed(start, "truncated instruction"))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    fn i32(&mut self) -> Result<i32> {
        let start = self.start;
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(|_| InterpreterError::malformed(start, "truncated instruction"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_decode_factorial() {
        let code = [
            4, 60, 5, 61, 28, 26, 163, 0, 13, 27, 28, 104, 60, 132, 2, 1, 167,
            255, 244, 27, 172,
        ];
        let insts = decode(&code, &ConstantPool::default()).unwrap();
        let offsets: Vec<usize> = insts.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4, 5, 6, 9, 10, 11, 12, 13, 16, 19, 20]);
        assert_eq!(
            insts[1].1,
            Instruction::Var {
                opcode: OPCode::IStore,
                var: 1
            }
        );
        assert_eq!(
            insts[6].1,
            Instruction::Jump {
                opcode: OPCode::IfICmpGt,
                label: Label(19)
            }
        );
        assert_eq!(insts[11].1, Instruction::IInc { var: 2, incr: 1 });
        assert_eq!(insts[12].1.label(), Some(Label(4)));
        assert_eq!(insts[14].1, Instruction::Simple(OPCode::IReturn));
    }

    #[test]
    fn can_decode_wide_and_switches() {
        let code = [
            0xc4, 0x84, 0x01, 0x00, 0xff, 0x9c, // wide iinc 256 -100
            0x03, // iconst_0
            0xaa, // tableswitch at 7, operands start at 8
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0x00, 0x00, // nop; nop
        ];
        let insts = decode(&code, &ConstantPool::default()).unwrap();
        assert_eq!(insts[0].1, Instruction::IInc { var: 256, incr: -100 });
        match &insts[2].1 {
            Instruction::TableSwitch {
                default,
                low,
                high,
                labels,
            } => {
                assert_eq!(*default, Label(7));
                assert_eq!((*low, *high), (0, 0));
                assert_eq!(labels, &vec![Label(7)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(insts.len(), 5);
    }

    #[test]
    fn rejects_bad_bytecode() {
        let pool = ConstantPool::default();
        assert!(matches!(
            decode(&[0xcb], &pool),
            Err(InterpreterError::UnknownOpcode(0xcb))
        ));
        assert!(matches!(
            decode(&[0x11, 0x01], &pool),
            Err(InterpreterError::MalformedBytecode { offset: 0, .. })
        ));
        assert!(matches!(
            decode(&[0xa7, 0x00, 0x10], &pool),
            Err(InterpreterError::MalformedBytecode { .. })
        ));
        assert!(matches!(
            decode(&[0x12, 0x01], &pool),
            Err(InterpreterError::UnresolvedConstant(1))
        ));
    }

    #[test]
    fn rejects_oversized_switch_tables() {
        let pool = ConstantPool::default();
        let mut table = vec![0xaa, 0, 0, 0, 0, 0, 0, 0];
        table.extend_from_slice(&i32::MIN.to_be_bytes());
        table.extend_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(
            decode(&table, &pool),
            Err(InterpreterError::MalformedBytecode { offset: 0, .. })
        ));

        let mut lookup = vec![0xab, 0, 0, 0, 0, 0, 0, 0];
        lookup.extend_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(
            decode(&lookup, &pool),
            Err(InterpreterError::MalformedBytecode { offset: 0, .. })
        ));
    }

    #[test]
    fn formats_references_as_descriptors() {
        let method =
            MethodDescriptor::new("com/Foo", "baz", "(I)V", false).unwrap();
        assert_eq!(method.to_string(), "Lcom/Foo;.baz(I)V");
        assert!(MethodDescriptor::new("com/Foo", "baz", "I", false).is_err());
    }
}
