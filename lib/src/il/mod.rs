//! Manipulate compiled method bodies
//!
//! ### Simple example
//!
//! Consider a method that falls back to a default when its argument is null:
//!
//! ```csharp,ignore,no_run
//! public class Greeter {
//!     public string Greet(string name) => name ?? "nobody";
//! }
//! ```
//!
//! Declaring it in a type graph and encoding its body can be done as follows:
//!
//! ```
//! use nullguard::il::type_graph::*;
//! use nullguard::il::code::{BranchForm, BranchKind, MethodBody, Op, TokenPool};
//! use nullguard::il::*;
//!
//! # fn generate_method() -> Result<(), Error> {
//! // Setup the type graph, add in the system library types
//! let type_graph_arenas = TypeGraphArenas::new();
//! let type_graph = TypeGraph::new(&type_graph_arenas);
//! let system = type_graph.insert_system_types();
//!
//! // Declare the type and its method in the type graph
//! let class = type_graph.add_type(TypeData::new(
//!     "Samples",
//!     "Greeter",
//!     TypeKind::Class,
//!     TypeAccessFlags::PUBLIC,
//!     None,
//! ));
//! class.base_type.set(Some(system.classes.object));
//! let string = TypeSig::Named(system.classes.string);
//! let greet = type_graph.add_method(MethodData::new(
//!     class,
//!     "Greet",
//!     MethodAccessFlags::PUBLIC,
//!     string.clone(),
//!     vec![ParameterData::new("name", string)],
//! ));
//!
//! // Build the body (argument 0 is the receiver)
//! let mut body = MethodBody::new();
//! let present = body.fresh_id();
//! body.push(Op::LdArg(1));
//! body.push(Op::Branch(BranchKind::True, BranchForm::Short, present));
//! body.push(Op::LdStr(String::from("nobody")));
//! body.push(Op::Ret);
//! body.push_with_id(present, Op::LdArg(1));
//! body.push(Op::Ret);
//! assert_eq!(body.verify_stack(true)?, 1);
//!
//! // Encode it into bytes
//! let encoded = body.encode(true, &mut TokenPool::new())?;
//! assert_eq!(encoded.code.len(), 11);
//!
//! // Attach the body to the method
//! *greet.body.borrow_mut() = Some(body);
//! # Ok(())
//! # }
//! ```

mod access_flags;
mod attributes;
pub mod code;
pub mod debug_info;
mod errors;
mod module;
pub mod text;
pub mod type_graph;
mod types;

pub use access_flags::*;
pub use attributes::*;
pub use errors::*;
pub use module::*;
pub use types::*;
