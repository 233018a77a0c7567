use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;

use crate::SpaceId;

/// The top-level result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An Error type encapsulating the issues that may come up while
/// managing database spaces.
///
/// Engine-reported failures of individual primitives (a reset that
/// did not take, an add the engine refused) are not errors: those
/// operations return `false` or `None` and leave the registry
/// untouched.
#[derive(Debug)]
pub enum Error {
    /// The operation referenced a space that the registry does not know.
    UnknownSpace(SpaceId),
    /// An ingestion path is missing or is not a directory.
    NotADirectory(PathBuf),
    /// The engine raised instead of reporting a status.
    Engine(String),
    /// A read error happened while walking the file system.
    Io(io::Error),
}

use Error::*;

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        match (self, other) {
            (UnknownSpace(l), UnknownSpace(r)) => l == r,
            (NotADirectory(l), NotADirectory(r)) => l == r,
            (Engine(l), Engine(r)) => l == r,
            // io errors are never considered equal
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Error {
        Error::Io(io_error)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownSpace(id) => {
                write!(f, "unknown database space id: {}", id)
            }
            NotADirectory(path) => write!(
                f,
                "'{}' does not exist or is not a directory",
                path.display()
            ),
            Engine(e) => write!(f, "image engine error: {}", e),
            Io(e) => write!(f, "IO error: {}", e),
        }
    }
}
