//! Inject null guards into the methods of a module
//!
//! For every method that is processed:
//!
//!   - reference-type parameters get a check at method entry that throws
//!     `ArgumentNullException`
//!   - reference-type return values and `out` parameters get a check at every return point that
//!     throws `InvalidOperationException`
//!   - `async` methods get their result checked inside the state machine, faulting the task
//!   - property accessors get the same checks, with messages naming the property
//!
//! Slots marked `AllowNull`/`CanBeNull` are left alone (or, in explicit mode, only slots marked
//! `NotNull` are checked).

mod errors;
mod existing_guard;
mod guard;
mod method;
mod module;
mod policy;
mod property;
mod return_points;
mod settings;
mod state_machine;

pub use errors::*;
pub use existing_guard::*;
pub use guard::*;
pub use method::*;
pub use module::*;
pub use policy::*;
pub use property::*;
pub use return_points::*;
pub use settings::*;
pub use state_machine::*;
