use super::code::InstrId;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// An operand, exception handler or sequence point names an instruction not in the body
    UnknownInstruction(InstrId),

    /// Instruction pops more values than the evaluation stack holds
    StackUnderflow {
        instruction: InstrId,
        depth: usize,
        pops: usize,
    },

    /// Two control-flow paths reach the same instruction with different stack depths
    InconsistentStackDepth {
        instruction: InstrId,
        expected: usize,
        found: usize,
    },

    /// A `ret` is reached with something other than just the return value on the stack
    BadReturnDepth { instruction: InstrId, depth: usize },

    /// Control reaches the end of the body without a terminating instruction
    FallsOffEnd,

    /// The chosen branch form cannot encode the displacement (indicates a bug)
    BranchOutOfRange {
        instruction: InstrId,
        displacement: i64,
    },

    /// Method needs a deeper evaluation stack than the encoding supports
    MaxStackOverflow(usize),

    /// Too many distinct entries in one token table
    TokenOverflow { table: u8 },

    /// A member the rewrite depends on is missing
    MissingMember(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::UnknownInstruction(id) => write!(f, "unknown instruction {:?}", id),
            Error::StackUnderflow {
                instruction,
                depth,
                pops,
            } => write!(
                f,
                "stack underflow at {:?}: depth is {} but {} values are popped",
                instruction, depth, pops
            ),
            Error::InconsistentStackDepth {
                instruction,
                expected,
                found,
            } => write!(
                f,
                "inconsistent stack depth at {:?}: {} versus {}",
                instruction, expected, found
            ),
            Error::BadReturnDepth { instruction, depth } => {
                write!(f, "return at {:?} with stack depth {}", instruction, depth)
            }
            Error::FallsOffEnd => f.write_str("control falls off the end of the method body"),
            Error::BranchOutOfRange {
                instruction,
                displacement,
            } => write!(
                f,
                "branch at {:?} cannot encode displacement {}",
                instruction, displacement
            ),
            Error::MaxStackOverflow(depth) => write!(f, "stack depth {} is too large", depth),
            Error::TokenOverflow { table } => write!(f, "token table 0x{:02x} is full", table),
            Error::MissingMember(name) => write!(f, "missing member '{}'", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
