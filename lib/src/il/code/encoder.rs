//! Lower method bodies to bytes
//!
//! The output is the instruction stream of a method body, as it would appear in the container:
//! little-endian operands, the most compact encoding for every operand, and metadata references
//! replaced by tokens handed out by a [`TokenPool`].

use super::{jump_encoding, BranchForm, BranchKind, InstrId, MethodBody, Op};
use crate::il::{Error, FullName, TypeSig};
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::Result as IoResult;

/// Utility trait for serializing data inside method bodies
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_i8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_u16::<LittleEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_i32::<LittleEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_u32::<LittleEndian>(*self)
    }
}

/// Metadata token: table number in the top byte, row (starting at 1) in the lower three
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Token(pub u32);

impl Token {
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}

impl Serialize for Token {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.0.serialize(writer)
    }
}

/// Hands out tokens for the metadata referenced from method bodies
///
/// The same entity always gets the same token, and entities are keyed by their full name, so
/// tokens stay stable across all the bodies encoded with one pool.
#[derive(Default, Debug)]
pub struct TokenPool {
    tables: HashMap<u8, HashMap<String, Token>>,
}

impl TokenPool {
    pub const TYPE_REF: u8 = 0x01;
    pub const MEMBER_REF: u8 = 0x0A;
    pub const TYPE_SPEC: u8 = 0x1B;
    pub const USER_STRING: u8 = 0x70;

    pub fn new() -> TokenPool {
        TokenPool::default()
    }

    /// Get (or allocate) the token for an entry in a table
    pub fn token(&mut self, table: u8, key: &str) -> Result<Token, Error> {
        let entries = self.tables.entry(table).or_default();
        if let Some(token) = entries.get(key) {
            return Ok(*token);
        }
        let row = entries.len() as u32 + 1;
        if row > 0x00FF_FFFF {
            return Err(Error::TokenOverflow { table });
        }
        let token = Token((table as u32) << 24 | row);
        entries.insert(key.to_owned(), token);
        Ok(token)
    }

    pub fn string_token(&mut self, string: &str) -> Result<Token, Error> {
        self.token(Self::USER_STRING, string)
    }

    pub fn member_token(&mut self, member: &impl FullName) -> Result<Token, Error> {
        self.token(Self::MEMBER_REF, &member.full_name())
    }

    /// Named types are type references, everything else needs a type specification
    pub fn type_token(&mut self, ty: &TypeSig<'_>) -> Result<Token, Error> {
        let table = match ty {
            TypeSig::Named(_) => Self::TYPE_REF,
            _ => Self::TYPE_SPEC,
        };
        self.token(table, &ty.full_name())
    }

    /// Number of entries allocated in a table
    pub fn len(&self, table: u8) -> usize {
        self.tables.get(&table).map_or(0, HashMap::len)
    }
}

/// Encoded method body
#[derive(Debug)]
pub struct EncodedBody {
    pub code: Vec<u8>,

    /// Maximum evaluation stack depth
    pub max_stack: u16,

    pub init_locals: bool,

    /// Byte offset of every instruction
    pub instruction_offsets: HashMap<InstrId, u32>,
}

impl<'g> MethodBody<'g> {
    /// Lower the body to bytes
    ///
    /// Branch forms are used as they are, so this should happen after `optimize_macros`. The stack
    /// is verified along the way to compute `max_stack`.
    pub fn encode(&self, returns_value: bool, tokens: &mut TokenPool) -> Result<EncodedBody, Error> {
        let max_stack = self.verify_stack(returns_value)?;
        let max_stack = u16::try_from(max_stack).map_err(|_| Error::MaxStackOverflow(max_stack))?;

        let offsets = jump_encoding::offsets(&self.instructions);
        let instruction_offsets: HashMap<InstrId, u32> = self
            .instructions
            .iter()
            .zip(&offsets)
            .map(|(insn, offset)| (insn.id, *offset as u32))
            .collect();

        let mut code: Vec<u8> = Vec::with_capacity(offsets[self.instructions.len()]);
        for (idx, instruction) in self.instructions.iter().enumerate() {
            let end_offset = offsets[idx + 1] as i64;
            let displacement = |target: &InstrId| -> Result<i64, Error> {
                let target_offset = instruction_offsets
                    .get(target)
                    .ok_or(Error::UnknownInstruction(*target))?;
                Ok(*target_offset as i64 - end_offset)
            };
            encode_op(&instruction.op, instruction.id, &mut code, tokens, displacement)?;
            debug_assert_eq!(code.len(), offsets[idx + 1], "{:?}", instruction);
        }

        Ok(EncodedBody {
            code,
            max_stack,
            init_locals: self.init_locals,
            instruction_offsets,
        })
    }
}

/// Write one instruction
fn encode_op<'g>(
    op: &Op<'g>,
    id: InstrId,
    code: &mut Vec<u8>,
    tokens: &mut TokenPool,
    displacement: impl Fn(&InstrId) -> Result<i64, Error>,
) -> Result<(), Error> {
    match op {
        Op::Nop => 0x00u8.serialize(code)?,
        Op::LdNull => 0x14u8.serialize(code)?,
        Op::LdStr(string) => {
            0x72u8.serialize(code)?;
            tokens.string_token(string)?.serialize(code)?;
        }
        Op::LdcI4(value @ -1..=8) => ((0x16 + *value) as u8).serialize(code)?,
        Op::LdcI4(value @ -128..=127) => {
            0x1Fu8.serialize(code)?;
            (*value as i8).serialize(code)?;
        }
        Op::LdcI4(value) => {
            0x20u8.serialize(code)?;
            value.serialize(code)?;
        }
        Op::LdArg(idx) => encode_slot(code, *idx, Some(0x02), 0x0E, 0x09)?,
        Op::LdArgA(idx) => encode_slot(code, *idx, None, 0x0F, 0x0A)?,
        Op::StArg(idx) => encode_slot(code, *idx, None, 0x10, 0x0B)?,
        Op::LdLoc(idx) => encode_slot(code, *idx, Some(0x06), 0x11, 0x0C)?,
        Op::LdLocA(idx) => encode_slot(code, *idx, None, 0x12, 0x0D)?,
        Op::StLoc(idx) => encode_slot(code, *idx, Some(0x0A), 0x13, 0x0E)?,
        Op::Dup => 0x25u8.serialize(code)?,
        Op::Pop => 0x26u8.serialize(code)?,
        Op::Ceq => {
            0xFEu8.serialize(code)?;
            0x01u8.serialize(code)?;
        }
        Op::Add => 0x58u8.serialize(code)?,
        Op::Sub => 0x59u8.serialize(code)?,
        Op::LdIndRef => 0x50u8.serialize(code)?,
        Op::StIndRef => 0x51u8.serialize(code)?,
        Op::LdObj(ty) => {
            0x71u8.serialize(code)?;
            tokens.type_token(ty)?.serialize(code)?;
        }
        Op::Box(ty) => {
            0x8Cu8.serialize(code)?;
            tokens.type_token(ty)?.serialize(code)?;
        }
        Op::LdFld(field) => {
            let opcode: u8 = if field.is_static() { 0x7E } else { 0x7B };
            opcode.serialize(code)?;
            tokens.member_token(*field)?.serialize(code)?;
        }
        Op::LdFldA(field) => {
            let opcode: u8 = if field.is_static() { 0x7F } else { 0x7C };
            opcode.serialize(code)?;
            tokens.member_token(*field)?.serialize(code)?;
        }
        Op::StFld(field) => {
            let opcode: u8 = if field.is_static() { 0x80 } else { 0x7D };
            opcode.serialize(code)?;
            tokens.member_token(*field)?.serialize(code)?;
        }
        Op::Call(method) => {
            0x28u8.serialize(code)?;
            tokens.member_token(*method)?.serialize(code)?;
        }
        Op::CallVirt(method) => {
            0x6Fu8.serialize(code)?;
            tokens.member_token(*method)?.serialize(code)?;
        }
        Op::NewObj(constructor) => {
            0x73u8.serialize(code)?;
            tokens.member_token(*constructor)?.serialize(code)?;
        }
        Op::Branch(kind, BranchForm::Short, target) => {
            let opcode: u8 = match kind {
                BranchKind::Always => 0x2B,
                BranchKind::False => 0x2C,
                BranchKind::True => 0x2D,
                BranchKind::Leave => 0xDE,
            };
            let displacement = displacement(target)?;
            let displacement = i8::try_from(displacement).map_err(|_| Error::BranchOutOfRange {
                instruction: id,
                displacement,
            })?;
            opcode.serialize(code)?;
            displacement.serialize(code)?;
        }
        Op::Branch(kind, BranchForm::Long, target) => {
            let opcode: u8 = match kind {
                BranchKind::Always => 0x38,
                BranchKind::False => 0x39,
                BranchKind::True => 0x3A,
                BranchKind::Leave => 0xDD,
            };
            let displacement = displacement(target)?;
            let displacement = i32::try_from(displacement).map_err(|_| {
                Error::BranchOutOfRange {
                    instruction: id,
                    displacement,
                }
            })?;
            opcode.serialize(code)?;
            displacement.serialize(code)?;
        }
        Op::Switch(targets) => {
            0x45u8.serialize(code)?;
            (targets.len() as u32).serialize(code)?;
            for target in targets {
                let displacement = displacement(target)?;
                let displacement = i32::try_from(displacement).map_err(|_| {
                    Error::BranchOutOfRange {
                        instruction: id,
                        displacement,
                    }
                })?;
                displacement.serialize(code)?;
            }
        }
        Op::Ret => 0x2Au8.serialize(code)?,
        Op::Throw => 0x7Au8.serialize(code)?,
        Op::EndFinally => 0xDCu8.serialize(code)?,
    }
    Ok(())
}

/// Write an argument or local slot access
///
/// Slots 0 to 3 have dedicated one-byte opcodes for some instructions, slots up to 255 fit the
/// `.s` form, anything else takes the two-byte `0xFE` prefixed opcode.
fn encode_slot(
    code: &mut Vec<u8>,
    idx: u16,
    compact_base: Option<u8>,
    short_opcode: u8,
    long_opcode: u8,
) -> IoResult<()> {
    match (compact_base, idx) {
        (Some(base), 0..=3) => (base + idx as u8).serialize(code),
        (_, 0..=255) => {
            short_opcode.serialize(code)?;
            (idx as u8).serialize(code)
        }
        _ => {
            0xFEu8.serialize(code)?;
            long_opcode.serialize(code)?;
            idx.serialize(code)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_forms() {
        let mut body = MethodBody::new();
        let ret = body.fresh_id();
        body.push(Op::LdArg(1));
        body.push(Op::Branch(BranchKind::True, BranchForm::Short, ret));
        body.push(Op::LdStr(String::from("text")));
        body.push(Op::Pop);
        body.push(Op::LdcI4(100));
        body.push(Op::StLoc(300));
        body.push_with_id(ret, Op::Ret);

        let mut tokens = TokenPool::new();
        let encoded = body.encode(false, &mut tokens).unwrap();
        assert_eq!(
            encoded.code,
            vec![
                0x03, // ldarg.1
                0x2D, 0x0C, // brtrue.s +12
                0x72, 0x01, 0x00, 0x00, 0x70, // ldstr
                0x26, // pop
                0x1F, 0x64, // ldc.i4.s 100
                0xFE, 0x0E, 0x2C, 0x01, // stloc 300
                0x2A, // ret
            ]
        );
        assert_eq!(encoded.max_stack, 1);
        assert_eq!(encoded.instruction_offsets[&ret], 15);
        assert_eq!(tokens.len(TokenPool::USER_STRING), 1);
    }

    #[test]
    fn long_and_backward_branches() {
        let mut body = MethodBody::new();
        let top = body.push(Op::Nop);
        body.push(Op::Branch(BranchKind::Always, BranchForm::Long, top));

        let encoded = body.encode(false, &mut TokenPool::new()).unwrap();
        assert_eq!(encoded.code, vec![0x00, 0x38, 0xFA, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn out_of_range_short_branch() {
        let mut body = MethodBody::new();
        let target = body.fresh_id();
        body.push(Op::Branch(BranchKind::Always, BranchForm::Short, target));
        for _ in 0..200 {
            body.push(Op::Nop);
        }
        body.push_with_id(target, Op::Ret);

        assert!(matches!(
            body.encode(false, &mut TokenPool::new()),
            Err(Error::BranchOutOfRange {
                displacement: 200,
                ..
            })
        ));
    }

    #[test]
    fn tokens_are_stable() {
        let mut tokens = TokenPool::new();
        let first = tokens.string_token("a").unwrap();
        let second = tokens.string_token("b").unwrap();
        assert_eq!(tokens.string_token("a").unwrap(), first);
        assert_eq!(first.table(), TokenPool::USER_STRING);
        assert_eq!((first.row(), second.row()), (1, 2));
    }
}
