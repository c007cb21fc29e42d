use super::{BranchKind, HandlerKind, MethodBody, Op};
use crate::il::Error;

/// Number of values an instruction pops and pushes
///
/// `leave`, `throw` and `endfinally` also empty whatever is left on the stack, which is handled
/// separately in [`MethodBody::verify_stack`].
pub fn stack_effect(op: &Op<'_>) -> (usize, usize) {
    match op {
        Op::Nop => (0, 0),
        Op::LdNull | Op::LdStr(_) | Op::LdcI4(_) => (0, 1),
        Op::LdArg(_) | Op::LdArgA(_) | Op::LdLoc(_) | Op::LdLocA(_) => (0, 1),
        Op::StArg(_) | Op::StLoc(_) | Op::Pop => (1, 0),
        Op::Dup => (1, 2),
        Op::Ceq | Op::Add | Op::Sub => (2, 1),
        Op::LdIndRef | Op::LdObj(_) | Op::Box(_) => (1, 1),
        Op::StIndRef => (2, 0),
        Op::LdFld(field) | Op::LdFldA(field) => {
            if field.is_static() {
                (0, 1)
            } else {
                (1, 1)
            }
        }
        Op::StFld(field) => {
            if field.is_static() {
                (1, 0)
            } else {
                (2, 0)
            }
        }
        Op::Call(method) | Op::CallVirt(method) => (
            method.parameters.len() + method.has_this() as usize,
            !method.return_type.is_void() as usize,
        ),
        Op::NewObj(constructor) => (constructor.parameters.len(), 1),
        Op::Branch(BranchKind::True | BranchKind::False, _, _) => (1, 0),
        Op::Branch(BranchKind::Always | BranchKind::Leave, _, _) => (0, 0),
        Op::Switch(_) => (1, 0),
        Op::Ret => (0, 0),
        Op::Throw => (1, 0),
        Op::EndFinally => (0, 0),
    }
}

impl<'g> MethodBody<'g> {
    /// Compute the evaluation stack depth before every reachable instruction
    ///
    /// This is a much weaker check than type verification, but it is enough to catch the ways a
    /// rewrite can go wrong: a path that pops too much, two paths meeting with different depths,
    /// or a return that leaves extra values behind. Returns the maximum stack depth.
    pub fn verify_stack(&self, returns_value: bool) -> Result<usize, Error> {
        let mut depths: Vec<Option<usize>> = vec![None; self.instructions.len()];
        let mut worklist: Vec<(usize, usize)> = vec![];
        let mut max_depth = 0;

        if !self.instructions.is_empty() {
            worklist.push((0, 0));
        }
        for handler in &self.exception_handlers {
            let handler_depth = match handler.kind {
                HandlerKind::Catch(_) => 1,
                HandlerKind::Finally => 0,
            };
            worklist.push((self.position(handler.handler_start)?, handler_depth));
        }

        while let Some((idx, depth)) = worklist.pop() {
            let instruction = &self.instructions[idx];
            match depths[idx] {
                Some(expected) if expected == depth => continue,
                Some(expected) => {
                    return Err(Error::InconsistentStackDepth {
                        instruction: instruction.id,
                        expected,
                        found: depth,
                    })
                }
                None => depths[idx] = Some(depth),
            }
            max_depth = max_depth.max(depth);

            if let Op::Ret = instruction.op {
                if depth != returns_value as usize {
                    return Err(Error::BadReturnDepth {
                        instruction: instruction.id,
                        depth,
                    });
                }
                continue;
            }

            let (pops, pushes) = stack_effect(&instruction.op);
            if pops > depth {
                return Err(Error::StackUnderflow {
                    instruction: instruction.id,
                    depth,
                    pops,
                });
            }
            let next_depth = depth - pops + pushes;
            max_depth = max_depth.max(next_depth);

            for target in instruction.op.branch_targets() {
                let target_depth = match instruction.op {
                    Op::Branch(BranchKind::Leave, _, _) => 0,
                    _ => next_depth,
                };
                worklist.push((self.position(*target)?, target_depth));
            }

            if !instruction.op.is_unconditional_jump() {
                if idx + 1 >= self.instructions.len() {
                    return Err(Error::FallsOffEnd);
                }
                worklist.push((idx + 1, next_depth));
            }
        }

        Ok(max_depth)
    }
}
