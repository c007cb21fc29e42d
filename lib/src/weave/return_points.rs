use crate::il::code::{Instruction, Op};

/// Positions of the instructions matching a predicate, last one first
///
/// Visiting in descending order means that inserting a fragment before the point just visited
/// never shifts the points still to come. Iteration is lazy, and cloning the iterator restarts
/// from where the clone was taken.
#[derive(Clone)]
pub struct InstructionPoints<'a, 'g> {
    instructions: &'a [Instruction<'g>],

    /// Instructions before this index haven't been looked at yet
    remaining: usize,

    predicate: fn(&Op<'g>) -> bool,
}

impl<'a, 'g> InstructionPoints<'a, 'g> {
    pub fn new(
        instructions: &'a [Instruction<'g>],
        predicate: fn(&Op<'g>) -> bool,
    ) -> InstructionPoints<'a, 'g> {
        InstructionPoints {
            instructions,
            remaining: instructions.len(),
            predicate,
        }
    }
}

impl<'a, 'g> Iterator for InstructionPoints<'a, 'g> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.remaining > 0 {
            self.remaining -= 1;
            if (self.predicate)(&self.instructions[self.remaining].op) {
                return Some(self.remaining);
            }
        }
        None
    }
}

/// Positions of the `ret` instructions, last one first
pub fn return_points<'a, 'g>(instructions: &'a [Instruction<'g>]) -> InstructionPoints<'a, 'g> {
    InstructionPoints::new(instructions, |op| matches!(op, Op::Ret))
}
