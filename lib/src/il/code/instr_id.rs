use std::fmt;

/// Opaque identity of an instruction in a method body
///
/// Branches, exception handlers and sequence points refer to instructions through these instead
/// of through positions, so inserting instructions never invalidates a reference.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct InstrId(u32);

impl InstrId {
    /// First identity handed out in a fresh body
    pub const FIRST: InstrId = InstrId(0);

    /// Get the next fresh identity
    pub fn next(&self) -> InstrId {
        InstrId(self.0 + 1)
    }
}

/// Generates new instruction identities
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of identities as the original. This is what makes it safe to clone a whole body,
/// rewrite the clone, and then swap it in for the original.
#[derive(Clone, Debug)]
pub struct InstrIdGenerator(InstrId);

impl InstrIdGenerator {
    pub fn new(start: InstrId) -> InstrIdGenerator {
        InstrIdGenerator(start)
    }

    /// Generate a fresh identity
    pub fn fresh_id(&mut self) -> InstrId {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl fmt::Debug for InstrId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("i{}", self.0))
    }
}
