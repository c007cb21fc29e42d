//! Sequence points and scopes
//!
//! Sequence points map instructions back to source lines. A sequence point on the special line
//! [`HIDDEN_LINE`] tells debuggers to step over the instructions it covers, which is how injected
//! code stays invisible when stepping through a method.

use crate::il::code::{InstrId, Instruction};
use std::collections::HashMap;

/// Line number of hidden sequence points
pub const HIDDEN_LINE: u32 = 0xfeefee;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SequencePoint {
    /// First instruction covered by this sequence point
    pub instruction: InstrId,

    /// Source document
    pub document: String,

    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SequencePoint {
    /// Sequence point telling debuggers to step over an instruction
    pub fn hidden(instruction: InstrId, document: impl Into<String>) -> SequencePoint {
        SequencePoint {
            instruction,
            document: document.into(),
            start_line: HIDDEN_LINE,
            start_column: 0,
            end_line: HIDDEN_LINE,
            end_column: 0,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.start_line == HIDDEN_LINE
    }
}

/// Range of instructions in which some local variables are visible
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Scope {
    pub start: InstrId,

    /// Last instruction in the scope (inclusive)
    pub end: InstrId,

    /// Local variable slots visible in the scope
    pub variables: Vec<u16>,
}

/// Debug information of one method body
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DebugInfo {
    pub sequence_points: Vec<SequencePoint>,
    pub scope: Option<Scope>,
}

impl DebugInfo {
    /// Document of the first sequence point, if the method has any debug information
    pub fn document(&self) -> Option<&str> {
        self.sequence_points
            .first()
            .map(|sequence_point| sequence_point.document.as_str())
    }

    /// Hide an instruction from the debugger
    ///
    /// Without a document there is nothing to attach the sequence point to, so nothing happens.
    pub fn hide(&mut self, instruction: InstrId, document: Option<&str>) {
        if let Some(document) = document {
            self.sequence_points
                .push(SequencePoint::hidden(instruction, document));
        }
    }

    /// Re-establish invariants after instructions were inserted or removed
    ///
    ///   - sequence points on instructions no longer in the body are dropped
    ///   - sequence points are ordered by instruction position
    ///   - every local variable is in the method scope
    ///   - the scope covers the whole body
    ///
    pub fn update(&mut self, instructions: &[Instruction<'_>], variable_count: usize) {
        let positions: HashMap<InstrId, usize> = instructions
            .iter()
            .enumerate()
            .map(|(idx, insn)| (insn.id, idx))
            .collect();

        self.sequence_points
            .retain(|sequence_point| positions.contains_key(&sequence_point.instruction));
        self.sequence_points
            .sort_by_key(|sequence_point| positions[&sequence_point.instruction]);

        if let Some(scope) = &mut self.scope {
            if let (Some(first), Some(last)) = (instructions.first(), instructions.last()) {
                scope.start = first.id;
                scope.end = last.id;
            }
            for variable in 0..variable_count as u16 {
                if !scope.variables.contains(&variable) {
                    scope.variables.push(variable);
                }
            }
        }
    }
}
