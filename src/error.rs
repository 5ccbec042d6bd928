//! Error taxonomy shared by the pipeline stages.
//!
//! Validation failures are not errors in this sense: they are data
//! (`validate::ValidationError`) and never abort anything.
use thiserror::Error;

use crate::path::Path;

/// Which host buffer a parse failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffer {
    Schema,
    UiSchema,
    Data,
}

impl std::fmt::Display for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Buffer::Schema => "Schema",
            Buffer::UiSchema => "UI Schema",
            Buffer::Data => "Form Data",
        })
    }
}

/// Malformed JSON in one of the three buffers.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{buffer} Error: {message} at line {line} column {column}")]
pub struct ParseError {
    pub buffer: Buffer,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn from_json(buffer: Buffer, error: &serde_json::Error) -> Self {
        Self {
            buffer,
            message: error.to_string(),
            line: error.line(),
            column: error.column(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("unresolved reference `{token}` at {at}")]
    UnresolvedRef { token: String, at: String },

    #[error("identity token `{token}` is declared more than once")]
    DuplicateId { token: String },

    #[error("`{keyword}` at {at} must be a non-empty array of schemas")]
    MalformedComposition { keyword: &'static str, at: String },

    #[error("invalid pattern `{pattern}` at {at}: {reason}")]
    InvalidPattern { pattern: String, at: String, reason: String },

    #[error("malformed schema at {at}: {reason}")]
    Malformed { at: String, reason: String },
}

/// Anything that stops a schema buffer from producing a resolved schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("cannot step into {found} at `{at}`")]
    NotAContainer { at: Path, found: &'static str },

    #[error("index {index} out of bounds at `{at}` (len {len})")]
    IndexOutOfBounds { at: Path, index: usize, len: usize },

    #[error("`{at}` is not an array")]
    NotAnArray { at: Path },

    #[error("no schema describes `{at}`")]
    UnknownPath { at: Path },

    #[error("`{at}` has no variant {branch}")]
    NoSuchVariant { at: Path, branch: usize },

    #[error("unknown preset `{key}`")]
    UnknownPreset { key: String },
}

/// A preset provider or record store failed; affects only its own view.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("failed to fetch {what}: {reason}")]
    Fetch { what: &'static str, reason: String },

    #[error("invalid {what} payload: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("unknown table `{0}`")]
    UnknownTable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Data(ParseError),
    #[error(transparent)]
    Edit(#[from] EditError),
}
