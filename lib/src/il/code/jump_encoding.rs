//! Choose between the short and long encodings of branches
//!
//! Every branch can be encoded with a one-byte or with a four-byte signed displacement. While a
//! body is being rewritten, all branches use the long form (see [`widen_branches`]): that way no
//! amount of inserted code can make a displacement too big. Once the rewrite is over,
//! [`shrink_branches`] switches as many branches as possible back to the short form.
//!
//! ### Termination
//!
//! Shrinking a branch takes 3 bytes out of the body. That can only make other displacements
//! smaller, so a branch that fits in the short form never stops fitting. This makes the process
//! monotone: each round shrinks at least one more branch or stops, and there are finitely many
//! branches.
//!
//! Since shrinking only ever helps, all the branches found to fit during a round can be shrunk
//! together, even though the offsets used to decide were computed before any of them shrank.
//!
//! ### Displacements
//!
//! Displacements are relative to the end of the branch instruction:
//!
//! ```text,ignore,no_run
//!     0: ldarg.0
//!     1: brtrue.s 5     // displacement 2 (5 - (1 + 2))
//!     3: ldnull
//!     4: throw
//!     5: ret
//! ```
//!

use super::{BranchForm, Instruction, Op, Width};
use std::collections::HashMap;
use std::ops::{RangeBounds, RangeInclusive};

/// Range of relative jump offsets supported by the short branch forms
pub const SIGNED_8BIT_JUMP_RANGE: RangeInclusive<i64> =
    RangeInclusive::new(i8::MIN as i64, i8::MAX as i64);

/// Width in bytes saved by switching a branch from the long to the short form
const SHRINK_SAVING: usize = 3;

/// Byte offset of each instruction, plus the total size at the end
pub fn offsets(instructions: &[Instruction<'_>]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut current_offset = 0;
    for instruction in instructions {
        offsets.push(current_offset);
        current_offset += instruction.width();
    }
    offsets.push(current_offset);
    offsets
}

/// Switch every branch to the long form
pub fn widen_branches(instructions: &mut [Instruction<'_>]) {
    for instruction in instructions {
        if let Op::Branch(_, form, _) = &mut instruction.op {
            *form = BranchForm::Long;
        }
    }
}

/// Switch long branches to the short form until no other branch fits
///
/// The `short_jump_range` parameter should always be `SIGNED_8BIT_JUMP_RANGE` - it is a parameter
/// only for unit testing purposes. Branches to instructions outside of the body are left alone.
pub fn shrink_branches(instructions: &mut [Instruction<'_>], short_jump_range: &impl RangeBounds<i64>) {
    loop {
        let offsets = offsets(instructions);
        let index_of: HashMap<_, usize> = instructions
            .iter()
            .enumerate()
            .map(|(idx, insn)| (insn.id, idx))
            .collect();

        let shrinkable: Vec<usize> = instructions
            .iter()
            .enumerate()
            .filter_map(|(idx, insn)| match insn.op {
                Op::Branch(_, BranchForm::Long, target) => {
                    let target_idx = *index_of.get(&target)?;
                    let start = offsets[idx];
                    let mut target_offset = offsets[target_idx];
                    if target_idx > idx {
                        target_offset -= SHRINK_SAVING;
                    }
                    let displacement = target_offset as i64 - (start + 2) as i64;
                    if short_jump_range.contains(&displacement) {
                        Some(idx)
                    } else {
                        None
                    }
                }
                _ => None,
            })
            .collect();

        if shrinkable.is_empty() {
            return;
        }
        for idx in shrinkable {
            if let Op::Branch(_, form, _) = &mut instructions[idx].op {
                *form = BranchForm::Short;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::code::{BranchKind, InstrId, InstrIdGenerator};

    struct Builder<'g> {
        ids: InstrIdGenerator,
        instructions: Vec<Instruction<'g>>,
    }

    impl<'g> Builder<'g> {
        fn new() -> Self {
            Builder {
                ids: InstrIdGenerator::new(InstrId::FIRST),
                instructions: vec![],
            }
        }

        fn fresh(&mut self) -> InstrId {
            self.ids.fresh_id()
        }

        fn push(&mut self, op: Op<'g>) -> InstrId {
            let id = self.ids.fresh_id();
            self.instructions.push(Instruction { id, op });
            id
        }

        fn push_with_id(&mut self, id: InstrId, op: Op<'g>) {
            self.instructions.push(Instruction { id, op });
        }

        /// `count` one-byte filler instructions
        fn filler(&mut self, count: usize) {
            for _ in 0..count {
                self.push(Op::Nop);
            }
        }
    }

    fn forms(instructions: &[Instruction<'_>]) -> Vec<BranchForm> {
        instructions
            .iter()
            .filter_map(|insn| match insn.op {
                Op::Branch(_, form, _) => Some(form),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn no_branches() {
        let mut builder = Builder::new();
        builder.filler(4);
        builder.push(Op::Ret);
        shrink_branches(&mut builder.instructions, &SIGNED_8BIT_JUMP_RANGE);
        assert_eq!(offsets(&builder.instructions), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn near_and_far() {
        let mut builder = Builder::new();
        let near = builder.fresh();
        let far = builder.fresh();
        builder.push(Op::Branch(BranchKind::True, BranchForm::Long, near));
        builder.push(Op::Branch(BranchKind::Always, BranchForm::Long, far));
        builder.push_with_id(near, Op::Nop);
        builder.filler(200);
        builder.push_with_id(far, Op::Ret);

        shrink_branches(&mut builder.instructions, &SIGNED_8BIT_JUMP_RANGE);
        assert_eq!(forms(&builder.instructions), vec![BranchForm::Short, BranchForm::Long]);
    }

    #[test]
    fn backward_branches() {
        let mut builder = Builder::new();
        let top = builder.push(Op::Nop);
        builder.filler(10);
        builder.push(Op::Branch(BranchKind::Always, BranchForm::Long, top));
        builder.push(Op::Ret);

        shrink_branches(&mut builder.instructions, &SIGNED_8BIT_JUMP_RANGE);
        assert_eq!(forms(&builder.instructions), vec![BranchForm::Short]);
    }

    #[test]
    fn shrinking_one_branch_lets_another_fit() {
        // Range is tiny so that it is easy to line up: the outer jump only fits once the inner
        // one has shrunk.
        //
        //  0: br L2
        //  5: br L1
        // 10: nop
        // 11: L1: nop
        // 12: L2: ret
        let mut builder = Builder::new();
        let l1 = builder.fresh();
        let l2 = builder.fresh();
        builder.push(Op::Branch(BranchKind::Always, BranchForm::Long, l2));
        builder.push(Op::Branch(BranchKind::Always, BranchForm::Long, l1));
        builder.filler(1);
        builder.push_with_id(l1, Op::Nop);
        builder.push_with_id(l2, Op::Ret);

        // Outer jump: as short, displacement is 12 - 3 - 2 = 7 before the inner jump shrinks,
        // and 4 after. Inner jump: 11 - 3 - 7 = 1.
        shrink_branches(&mut builder.instructions, &(0..=4));
        assert_eq!(forms(&builder.instructions), vec![BranchForm::Short, BranchForm::Short]);
        assert_eq!(offsets(&builder.instructions), vec![0, 2, 4, 5, 6, 7]);

        // Without the second round, the outer jump would have stayed long
        let mut instructions = builder.instructions.clone();
        widen_branches(&mut instructions);
        assert_eq!(forms(&instructions), vec![BranchForm::Long, BranchForm::Long]);
        shrink_branches(&mut instructions, &(0..=1));
        assert_eq!(forms(&instructions), vec![BranchForm::Long, BranchForm::Short]);
    }

    #[test]
    fn boundary_displacements() {
        // Forward displacement of exactly 127 fits, 128 does not
        for (filler, expected) in [(127, BranchForm::Short), (128, BranchForm::Long)] {
            let mut builder = Builder::new();
            let target = builder.fresh();
            builder.push(Op::Branch(BranchKind::Always, BranchForm::Long, target));
            builder.filler(filler);
            builder.push_with_id(target, Op::Ret);

            shrink_branches(&mut builder.instructions, &SIGNED_8BIT_JUMP_RANGE);
            assert_eq!(forms(&builder.instructions), vec![expected]);
        }
    }
}
