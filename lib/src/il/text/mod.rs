//! Textual assembly format
//!
//! Modules are written one declaration or instruction per line:
//!
//! ```text,ignore,no_run
//! .document "Sample.cs"
//! .class public Samples.SimpleClass
//!   .method public string Echo(string a)
//!     .line 12 9 12 20
//!     ldarg a
//!     ret
//!   .end
//! .end
//! ```
//!
//! [`load_module`] parses a module and adds its types to a type graph. [`print_module`] renders a
//! module back into the same syntax, so a rewritten module can be loaded again.

use std::error::Error;
use std::fmt;

mod lexer;
mod loader;
mod parser;
mod printer;

pub use loader::load_module;
pub use printer::print_module;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Line on which the error was found (1-based)
    pub line: usize,

    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl Error for ParseError {}
