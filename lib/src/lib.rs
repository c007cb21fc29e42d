//! Inject null guards into already compiled method bodies
//!
//! The crate is split in two layers:
//!
//!   - [`il`] models the instruction-based container: a type graph with method signatures and
//!     bodies, the instructions themselves, debug information, byte encoding, and a textual
//!     assembly format used to load and print modules
//!
//!   - [`weave`] is the rewriting engine: it decides which parameters, return values and out
//!     parameters must not be null, synthesizes the checks and splices them into the bodies
//!

pub mod il;
pub mod weave;
