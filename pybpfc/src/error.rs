use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A source location used to annotate diagnostics. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Crate-wide error type. One variant per error-taxonomy category.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{span}: syntax error: {message}")]
    Syntax { span: Span, message: String },

    #[error("{span}: type error: {message}")]
    Type { span: Span, message: String },

    #[error("{span}: semantic error: {message}")]
    Semantic { span: Span, message: String },

    #[error("external compiler failed: {message}")]
    External { message: String },

    #[error("failed to read source file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn syntax(span: Span, message: impl Into<String>) -> Self {
        Error::Syntax {
            span,
            message: message.into(),
        }
    }

    pub fn ty(span: Span, message: impl Into<String>) -> Self {
        Error::Type {
            span,
            message: message.into(),
        }
    }

    pub fn semantic(span: Span, message: impl Into<String>) -> Self {
        Error::Semantic {
            span,
            message: message.into(),
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        Error::External {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
