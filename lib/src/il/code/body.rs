use super::{
    jump_encoding, BranchForm, InstrId, InstrIdGenerator, Instruction, Op,
    SIGNED_8BIT_JUMP_RANGE,
};
use crate::il::debug_info::DebugInfo;
use crate::il::type_graph::TypeData;
use crate::il::{Error, TypeSig};

/// Local variable slot
#[derive(Clone, Debug)]
pub struct Variable<'g> {
    pub name: String,
    pub ty: TypeSig<'g>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerKind<'g> {
    Catch(&'g TypeData<'g>),
    Finally,
}

/// Protected region and its handler
///
/// End boundaries are exclusive: they name the first instruction _after_ the region, or are
/// `None` when the region runs to the end of the body.
#[derive(Clone, Debug)]
pub struct ExceptionHandler<'g> {
    pub kind: HandlerKind<'g>,
    pub try_start: InstrId,
    pub try_end: InstrId,
    pub handler_start: InstrId,
    pub handler_end: Option<InstrId>,
}

impl<'g> ExceptionHandler<'g> {
    /// Boundaries of the regions, as mutable references
    pub fn boundaries_mut(&mut self) -> impl Iterator<Item = &mut InstrId> {
        [
            Some(&mut self.try_start),
            Some(&mut self.try_end),
            Some(&mut self.handler_start),
            self.handler_end.as_mut(),
        ]
        .into_iter()
        .flatten()
    }

    /// Boundaries of the regions
    pub fn boundaries(&self) -> impl Iterator<Item = InstrId> {
        [
            Some(self.try_start),
            Some(self.try_end),
            Some(self.handler_start),
            self.handler_end,
        ]
        .into_iter()
        .flatten()
    }
}

/// Body of a method
///
/// Instructions are kept in a flat vector. Every instruction has an identity that other parts of
/// the body (branches, exception handlers, sequence points) use to refer to it, so instructions
/// can be inserted anywhere without having to patch offsets.
#[derive(Clone, Debug)]
pub struct MethodBody<'g> {
    pub instructions: Vec<Instruction<'g>>,
    pub variables: Vec<Variable<'g>>,
    pub exception_handlers: Vec<ExceptionHandler<'g>>,

    /// Must locals be zero-initialised on entry?
    pub init_locals: bool,

    pub debug_info: DebugInfo,

    id_generator: InstrIdGenerator,
}

impl<'g> MethodBody<'g> {
    pub fn new() -> MethodBody<'g> {
        MethodBody {
            instructions: vec![],
            variables: vec![],
            exception_handlers: vec![],
            init_locals: false,
            debug_info: DebugInfo::default(),
            id_generator: InstrIdGenerator::new(InstrId::FIRST),
        }
    }

    /// Reserve an identity ahead of pushing the instruction that will carry it
    ///
    /// This is how forward branches get their target.
    pub fn fresh_id(&mut self) -> InstrId {
        self.id_generator.fresh_id()
    }

    /// Build an instruction with a fresh identity, without placing it in the body
    pub fn instruction(&mut self, op: Op<'g>) -> Instruction<'g> {
        Instruction {
            id: self.fresh_id(),
            op,
        }
    }

    /// Append an instruction at the end of the body
    pub fn push(&mut self, op: Op<'g>) -> InstrId {
        let instruction = self.instruction(op);
        let id = instruction.id;
        self.instructions.push(instruction);
        id
    }

    /// Append an instruction with an identity obtained earlier from `fresh_id`
    pub fn push_with_id(&mut self, id: InstrId, op: Op<'g>) {
        self.instructions.push(Instruction { id, op });
    }

    /// Position of an instruction
    pub fn index_of(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|insn| insn.id == id)
    }

    /// Position of an instruction that must be in the body
    pub fn position(&self, id: InstrId) -> Result<usize, Error> {
        self.index_of(id).ok_or(Error::UnknownInstruction(id))
    }

    pub fn first_id(&self) -> Option<InstrId> {
        self.instructions.first().map(|insn| insn.id)
    }

    /// Insert a fragment at the start of the body
    ///
    /// Nothing is retargeted: jumps back to the old first instruction skip the fragment.
    pub fn prepend(&mut self, fragment: Vec<Instruction<'g>>) {
        self.instructions.splice(0..0, fragment);
    }

    /// Insert a fragment immediately before the return point at `index`
    ///
    /// Every existing branch, switch target and exception handler boundary naming the return
    /// instruction is moved to the first instruction of the fragment, so all paths reaching the
    /// return now go through the fragment. The fragment itself is not touched: its own jumps to
    /// the return instruction stay as they are.
    pub fn insert_at_return_point(&mut self, index: usize, fragment: Vec<Instruction<'g>>) {
        let (return_point, fragment_start) = match (self.instructions.get(index), fragment.first())
        {
            (Some(return_point), Some(fragment_start)) => (return_point.id, fragment_start.id),
            _ => return,
        };
        self.retarget(return_point, fragment_start);
        self.instructions.splice(index..index, fragment);
    }

    /// Move every reference to `from` over to `to`
    fn retarget(&mut self, from: InstrId, to: InstrId) {
        for instruction in &mut self.instructions {
            for target in instruction.op.branch_targets_mut() {
                if *target == from {
                    *target = to;
                }
            }
        }
        for handler in &mut self.exception_handlers {
            for boundary in handler.boundaries_mut() {
                if *boundary == from {
                    *boundary = to;
                }
            }
        }
    }

    /// Switch every branch to its long form
    ///
    /// Done before rewriting, so that inserting instructions can never push a displacement out of
    /// range.
    pub fn simplify_macros(&mut self) {
        jump_encoding::widen_branches(&mut self.instructions);
    }

    /// Switch branches back to the short form wherever the displacement allows
    pub fn optimize_macros(&mut self) {
        jump_encoding::shrink_branches(&mut self.instructions, &SIGNED_8BIT_JUMP_RANGE);
    }

    /// Do all the branches use the long form?
    pub fn is_simplified(&self) -> bool {
        self.instructions
            .iter()
            .all(|insn| !matches!(insn.op, Op::Branch(_, BranchForm::Short, _)))
    }

    /// Re-establish the debug information invariants after instructions were inserted
    pub fn update_debug_info(&mut self) {
        self.debug_info
            .update(&self.instructions, self.variables.len());
    }

    /// Check that every identity referenced in the body belongs to an instruction of the body
    pub fn check_references(&self) -> Result<(), Error> {
        for instruction in &self.instructions {
            for target in instruction.op.branch_targets() {
                self.position(*target)?;
            }
        }
        for handler in &self.exception_handlers {
            for boundary in handler.boundaries() {
                self.position(boundary)?;
            }
        }
        Ok(())
    }
}

impl<'g> Default for MethodBody<'g> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::code::BranchKind;

    fn targets_of(body: &MethodBody<'_>) -> Vec<Option<usize>> {
        body.instructions
            .iter()
            .flat_map(|insn| insn.op.branch_targets().to_vec())
            .map(|target| body.index_of(target))
            .collect()
    }

    #[test]
    fn return_point_insertion_retargets_existing_jumps() {
        let mut body = MethodBody::new();
        let ret = body.fresh_id();
        body.push(Op::LdNull);
        body.push(Op::Dup);
        body.push(Op::Branch(BranchKind::False, BranchForm::Long, ret));
        body.push(Op::Pop);
        body.push(Op::LdStr(String::from("present")));
        body.push_with_id(ret, Op::Ret);

        let guard_start = body.instruction(Op::Dup);
        let guard_start_id = guard_start.id;
        let fragment = vec![
            guard_start,
            body.instruction(Op::Branch(BranchKind::True, BranchForm::Long, ret)),
            body.instruction(Op::Pop),
            body.instruction(Op::Throw),
        ];
        let index = body.position(ret).unwrap();
        body.insert_at_return_point(index, fragment);

        // The old jump goes to the fragment, the fragment's own jump still goes to `ret`
        assert_eq!(targets_of(&body), vec![Some(5), Some(9)]);
        assert_eq!(body.index_of(guard_start_id), Some(5));
        assert!(body.check_references().is_ok());
    }

    #[test]
    fn prepend_does_not_retarget() {
        let mut body = MethodBody::new();
        let first = body.push(Op::Nop);
        body.push(Op::Branch(BranchKind::Always, BranchForm::Long, first));

        let fragment = vec![body.instruction(Op::LdNull), body.instruction(Op::Pop)];
        body.prepend(fragment);

        assert_eq!(body.first_id().map(|id| id == first), Some(false));
        assert_eq!(targets_of(&body), vec![Some(2)]);
    }

    #[test]
    fn return_point_insertion_moves_handler_boundaries() {
        let mut body = MethodBody::new();
        let try_start = body.push(Op::Nop);
        let ret = body.fresh_id();
        body.push(Op::Branch(BranchKind::Leave, BranchForm::Long, ret));
        let handler_start = body.push(Op::Pop);
        body.push(Op::Branch(BranchKind::Leave, BranchForm::Long, ret));
        body.push_with_id(ret, Op::Ret);
        body.exception_handlers.push(ExceptionHandler {
            kind: HandlerKind::Finally,
            try_start,
            try_end: handler_start,
            handler_start,
            handler_end: Some(ret),
        });

        let fragment = vec![body.instruction(Op::Nop)];
        let fragment_start = fragment[0].id;
        body.insert_at_return_point(4, fragment);

        assert_eq!(body.exception_handlers[0].handler_end, Some(fragment_start));
        assert_eq!(targets_of(&body), vec![Some(4), Some(4)]);
    }

    #[test]
    fn unknown_references_are_reported() {
        let mut body = MethodBody::new();
        let dangling = body.fresh_id();
        body.push(Op::Branch(BranchKind::Always, BranchForm::Short, dangling));
        assert!(matches!(
            body.check_references(),
            Err(Error::UnknownInstruction(id)) if id == dangling
        ));
        assert!(!body.is_simplified());
        body.simplify_macros();
        assert!(body.is_simplified());
    }
}
