use std::fmt;

use thiserror::Error;

use crate::datatype::RecTyKind;
use crate::tablegen::Rule;

/// Where in the record description a parse problem was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub col: usize,
}

impl Location {
    pub fn new(file: &str, (line, col): (usize, usize)) -> Self {
        Self {
            file: file.to_string(),
            line,
            col,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

#[derive(Error, Debug)]
pub enum TableGenError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Parse error at {location}: {message}")]
    Parse { message: String, location: Location },
    #[error("No {kind} named '{name}'")]
    NotFound { kind: &'static str, name: String },
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: RecTyKind, found: RecTyKind },
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Field '{field}' has no value")]
    Unset { field: String },
}

pub type Result<T> = std::result::Result<T, TableGenError>;

impl TableGenError {
    pub fn parse(message: impl Into<String>, location: &Location) -> Self {
        Self::Parse {
            message: message.into(),
            location: location.clone(),
        }
    }
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

// Helper conversions
impl From<config::ConfigError> for TableGenError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<pest::error::Error<Rule>> for TableGenError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        let (line, col) = match e.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        let file = e.path().unwrap_or("<source>").to_string();
        let message = e.variant.message().into_owned();
        Self::Parse {
            message,
            location: Location { file, line, col },
        }
    }
}
