use std::{error::Error, fmt::Display, path::PathBuf};

use crate::error::BlochError;

/// Errors surfaced while turning files into a merged program.
#[derive(Debug)]
pub enum LoadError {
    Io {
        path: PathBuf,
        message: String,
    },
    /// A pipeline error in one of the loaded files.
    Language {
        path: PathBuf,
        error: BlochError,
    },
    ImportCycle {
        path: PathBuf,
    },
    /// Imported modules contribute declarations only.
    ImportedTopLevel {
        path: PathBuf,
    },
    NoMain {
        path: PathBuf,
    },
    MultipleMains {
        path: PathBuf,
    },
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io { path, message } => {
                write!(f, "could not read '{}': {message}", path.display())
            }
            LoadError::Language { path, error } => {
                write!(f, "{}: {error}", path.display())
            }
            LoadError::ImportCycle { path } => {
                write!(f, "import cycle involving '{}'", path.display())
            }
            LoadError::ImportedTopLevel { path } => {
                write!(
                    f,
                    "imported module '{}' may only contain classes and functions",
                    path.display()
                )
            }
            LoadError::NoMain { path } => {
                write!(f, "'{}' does not define a main function", path.display())
            }
            LoadError::MultipleMains { path } => {
                write!(f, "'{}' defines more than one main function", path.display())
            }
        }
    }
}

impl Error for LoadError {}
