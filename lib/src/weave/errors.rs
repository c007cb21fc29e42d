use crate::il;
use crate::il::text::ParseError;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    Il(il::Error),
    Parse(ParseError),

    /// Validation flags that don't name known flags
    InvalidFlags(String),

    /// Processing one method failed (and the run stops)
    ProcessingMethod { method: String, source: Box<Error> },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Il(err) => err.fmt(f),
            Error::Parse(err) => err.fmt(f),
            Error::InvalidFlags(flags) => write!(f, "invalid validation flags '{}'", flags),
            Error::ProcessingMethod { method, .. } => {
                write!(f, "An error occurred processing method '{}'.", method)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Il(err) => Some(err),
            Error::Parse(err) => Some(err),
            Error::InvalidFlags(_) => None,
            Error::ProcessingMethod { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<il::Error> for Error {
    fn from(err: il::Error) -> Error {
        Error::Il(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}
