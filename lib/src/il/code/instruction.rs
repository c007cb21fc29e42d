//! Instructions of a method body
//!
//! The representation is slightly different from the encoded one to make rewriting convenient:
//!
//!   - Compact encodings (`ldarg.0`, `ldc.i4.s`, `stloc.2`, ...) don't show up at all. They are
//!     picked by the encoder from the operand value.
//!
//!   - Branches are one instruction with a kind and a form. The form (one-byte or four-byte
//!     displacement) is the only thing that changes when branches are normalised before a rewrite
//!     and minimised after.
//!
//!   - Branch operands are instruction identities, never offsets.
//!

use super::InstrId;
use crate::il::type_graph::{FieldData, MethodData};
use crate::il::TypeSig;
use std::slice;

/// Something with a known encoded size in bytes
pub trait Width {
    fn width(&self) -> usize;
}

/// Condition under which a branch is taken
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BranchKind {
    /// `br`
    Always,

    /// `brtrue` (value is non-zero or non-null)
    True,

    /// `brfalse` (value is zero or null)
    False,

    /// `leave` (exits a protected region, emptying the stack)
    Leave,
}

/// Encoding of a branch displacement
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BranchForm {
    /// One-byte signed displacement (`br.s`, `brtrue.s`, ...)
    Short,

    /// Four-byte signed displacement
    Long,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op<'g> {
    Nop,
    LdNull,
    LdStr(String),
    LdcI4(i32),
    LdArg(u16), // covers `ldarg`, `ldarg.s`, and `ldarg.{0,3}`
    LdArgA(u16),
    StArg(u16),
    LdLoc(u16), // covers `ldloc`, `ldloc.s`, and `ldloc.{0,3}`
    LdLocA(u16),
    StLoc(u16),
    Dup,
    Pop,
    Ceq,
    Add,
    Sub,
    LdIndRef,
    StIndRef,
    LdObj(TypeSig<'g>),
    Box(TypeSig<'g>),
    LdFld(&'g FieldData<'g>), // also used for static fields
    LdFldA(&'g FieldData<'g>),
    StFld(&'g FieldData<'g>),
    Call(&'g MethodData<'g>),
    CallVirt(&'g MethodData<'g>),
    NewObj(&'g MethodData<'g>),
    Branch(BranchKind, BranchForm, InstrId),
    Switch(Vec<InstrId>),
    Ret,
    Throw,
    EndFinally,
}

impl<'g> Op<'g> {
    /// Instructions this one may jump to (not including falling through)
    pub fn branch_targets(&self) -> &[InstrId] {
        match self {
            Op::Branch(_, _, target) => slice::from_ref(target),
            Op::Switch(targets) => targets,
            _ => &[],
        }
    }

    pub fn branch_targets_mut(&mut self) -> &mut [InstrId] {
        match self {
            Op::Branch(_, _, target) => slice::from_mut(target),
            Op::Switch(targets) => targets,
            _ => &mut [],
        }
    }

    /// Does control never continue to the next instruction?
    pub fn is_unconditional_jump(&self) -> bool {
        matches!(
            self,
            Op::Branch(BranchKind::Always | BranchKind::Leave, _, _)
                | Op::Ret
                | Op::Throw
                | Op::EndFinally
        )
    }

    /// Encoded size in bytes, using the most compact form for the operand
    pub fn width(&self) -> usize {
        match self {
            Op::Nop | Op::LdNull | Op::Dup | Op::Pop | Op::Add | Op::Sub => 1,
            Op::LdIndRef | Op::StIndRef | Op::Ret | Op::Throw | Op::EndFinally => 1,
            Op::Ceq => 2,
            Op::LdStr(_) => 5,
            Op::LdcI4(-1..=8) => 1,
            Op::LdcI4(-128..=127) => 2,
            Op::LdcI4(_) => 5,
            Op::LdArg(0..=3) | Op::LdLoc(0..=3) | Op::StLoc(0..=3) => 1,
            Op::LdArg(0..=255) | Op::LdLoc(0..=255) | Op::StLoc(0..=255) => 2,
            Op::LdArgA(0..=255) | Op::StArg(0..=255) | Op::LdLocA(0..=255) => 2,
            Op::LdArg(_) | Op::LdLoc(_) | Op::StLoc(_) => 4,
            Op::LdArgA(_) | Op::StArg(_) | Op::LdLocA(_) => 4,
            Op::LdObj(_) | Op::Box(_) => 5,
            Op::LdFld(_) | Op::LdFldA(_) | Op::StFld(_) => 5,
            Op::Call(_) | Op::CallVirt(_) | Op::NewObj(_) => 5,
            Op::Branch(_, BranchForm::Short, _) => 2,
            Op::Branch(_, BranchForm::Long, _) => 5,
            Op::Switch(targets) => 1 + 4 + 4 * targets.len(),
        }
    }
}

/// Instruction in a method body, along with its identity
#[derive(Clone, Debug)]
pub struct Instruction<'g> {
    pub id: InstrId,
    pub op: Op<'g>,
}

impl<'g> Width for Instruction<'g> {
    fn width(&self) -> usize {
        self.op.width()
    }
}
