//! Synthesize null guards
//!
//! Every guard has the same shape:
//!
//! ```text,ignore,no_run
//!     <load the value>                  // debug builds only:
//!     ldnull                            //   Debug.Assert(value != null, message)
//!     ceq
//!     ldc.i4.0
//!     ceq
//!     ldstr message
//!     call Debug::Assert(bool, string)
//!     <load the value>
//!     brtrue continuation
//!     pop                               // only if the value was duplicated off the stack
//!     <construct the exception>
//!     <terminator>                      // `throw`, or `call SetException; ret`
//! ```
//!
//! On the non-null path, a guard leaves the evaluation stack exactly as it found it.

use crate::il::code::{BranchForm, BranchKind, InstrId, Instruction, MethodBody, Op};
use crate::il::type_graph::{MethodData, SystemLibrary};
use crate::il::TypeSig;

/// Value checked by a guard
#[derive(Copy, Clone, Debug)]
pub enum GuardSubject<'a, 'g> {
    /// Argument slot (by-ref slots are dereferenced)
    Argument(u16, &'a TypeSig<'g>),

    /// Value on top of the stack (duplicated, so it stays there)
    StackTop(&'a TypeSig<'g>),
}

/// Exception raised when the value is null
#[derive(Copy, Clone, Debug)]
pub enum GuardError<'a> {
    /// `ArgumentNullException(parameterName, message)`
    ArgumentNull { parameter_name: &'a str },

    /// `InvalidOperationException(message)`
    InvalidOperation,
}

/// How control leaves a failed guard
#[derive(Copy, Clone, Debug)]
pub enum Terminator<'g> {
    Throw,

    /// Hand the exception to a fault-reporting call, then return normally
    ///
    /// The call's receiver must already be on the stack underneath the checked value.
    ReportFault { set_exception: &'g MethodData<'g> },
}

pub struct GuardSynthesizer<'a, 'g> {
    pub system: &'a SystemLibrary<'g>,
    pub debug_build: bool,
}

impl<'a, 'g> GuardSynthesizer<'a, 'g> {
    /// Build a guard fragment, with fresh instruction identities from the body
    ///
    /// The fragment is not inserted. On success it jumps to `continuation`.
    pub fn build(
        &self,
        body: &mut MethodBody<'g>,
        subject: GuardSubject<'_, 'g>,
        message: &str,
        error: GuardError<'_>,
        continuation: InstrId,
        terminator: Terminator<'g>,
    ) -> Vec<Instruction<'g>> {
        let mut ops = vec![];

        if self.debug_build {
            load_subject(&mut ops, subject);
            ops.push(Op::LdNull);
            ops.push(Op::Ceq);
            ops.push(Op::LdcI4(0));
            ops.push(Op::Ceq);
            ops.push(Op::LdStr(message.to_owned()));
            ops.push(Op::Call(self.system.members.debug_assert));
        }

        load_subject(&mut ops, subject);
        ops.push(Op::Branch(BranchKind::True, BranchForm::Long, continuation));

        if let GuardSubject::StackTop(_) = subject {
            ops.push(Op::Pop);
        }

        let members = &self.system.members;
        match error {
            GuardError::ArgumentNull { parameter_name } => {
                ops.push(Op::LdStr(parameter_name.to_owned()));
                ops.push(Op::LdStr(message.to_owned()));
                ops.push(Op::NewObj(members.argument_null_exception_init_param_message));
            }
            GuardError::InvalidOperation => {
                ops.push(Op::LdStr(message.to_owned()));
                ops.push(Op::NewObj(members.invalid_operation_exception_init_message));
            }
        }

        match terminator {
            Terminator::Throw => ops.push(Op::Throw),
            Terminator::ReportFault { set_exception } => {
                ops.push(Op::Call(set_exception));
                ops.push(Op::Ret);
            }
        }

        ops.into_iter().map(|op| body.instruction(op)).collect()
    }

    /// Guard the value about to be returned (or handed to a result-reporting call) at `index`
    ///
    /// Everything that jumped to the instruction at `index` now goes through the guard first.
    pub fn inject_return_guard(
        &self,
        body: &mut MethodBody<'g>,
        index: usize,
        value_type: &TypeSig<'g>,
        message: &str,
        terminator: Terminator<'g>,
        document: Option<&str>,
    ) {
        let continuation = body.instructions[index].id;
        let fragment = self.build(
            body,
            GuardSubject::StackTop(value_type),
            message,
            GuardError::InvalidOperation,
            continuation,
            terminator,
        );
        insert_hidden_at_return_point(body, index, fragment, document);
    }
}

/// Insert a fragment before the return point at `index`, hidden from the debugger
pub fn insert_hidden_at_return_point<'g>(
    body: &mut MethodBody<'g>,
    index: usize,
    fragment: Vec<Instruction<'g>>,
    document: Option<&str>,
) {
    if let Some(first) = fragment.first() {
        body.debug_info.hide(first.id, document);
    }
    log::debug!("Inserting {} guard instructions at {}", fragment.len(), index);
    body.insert_at_return_point(index, fragment);
}

/// Insert a fragment at the start of the body, hidden from the debugger
pub fn prepend_hidden<'g>(
    body: &mut MethodBody<'g>,
    fragment: Vec<Instruction<'g>>,
    document: Option<&str>,
) {
    if let Some(first) = fragment.first() {
        body.debug_info.hide(first.id, document);
    }
    log::debug!("Prepending {} guard instructions", fragment.len());
    body.prepend(fragment);
}

/// Push the value to test for null
///
/// Generic values are boxed, since `brtrue` needs an object reference.
fn load_subject<'g>(ops: &mut Vec<Op<'g>>, subject: GuardSubject<'_, 'g>) {
    match subject {
        GuardSubject::Argument(slot, ty) => {
            ops.push(Op::LdArg(slot));
            match ty {
                TypeSig::ByRef(element) if element.is_generic_param() => {
                    ops.push(Op::LdObj((**element).clone()));
                    ops.push(Op::Box((**element).clone()));
                }
                TypeSig::ByRef(_) => ops.push(Op::LdIndRef),
                ty if ty.is_generic_param() => ops.push(Op::Box(ty.clone())),
                _ => (),
            }
        }
        GuardSubject::StackTop(ty) => {
            ops.push(Op::Dup);
            if ty.is_generic_param() {
                ops.push(Op::Box(ty.clone()));
            }
        }
    }
}
