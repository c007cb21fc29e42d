mod body;
mod encoder;
mod instr_id;
mod instruction;
pub mod jump_encoding;
mod stack;

pub use body::*;
pub use encoder::*;
pub use instr_id::*;
pub use instruction::*;
pub use jump_encoding::SIGNED_8BIT_JUMP_RANGE;
pub use stack::*;
