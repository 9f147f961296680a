//! Error types for schema resolution, unification and projection.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Conflicts raised while combining schemas.
///
/// These carry no location; [`ResolveError::from_unify`] attaches the
/// document and path of the composition being collapsed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnifyError {
    #[error("type mismatch: cannot intersect {left} with {right}")]
    TypeMismatch { left: Value, right: Value },

    #[error("conflicting const values {left} and {right}")]
    ConstConflict { left: Value, right: Value },

    #[error("enum intersection is empty: {left:?} and {right:?}")]
    EmptyEnumIntersection { left: Vec<Value>, right: Vec<Value> },

    #[error("const {value} is not one of {allowed:?}")]
    ConstExcluded { value: Value, allowed: Vec<Value> },

    #[error("cannot intersect distinct references {left} and {right}")]
    RefConflict { left: String, right: String },

    #[error("cannot combine positional tuple items")]
    TupleMerge,
}

/// Errors during resolution and projection.
#[derive(Debug, Error)]
pub enum ResolveError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid document: {message}")]
    InvalidDocument { message: String },

    // Schema errors (exit code 2)
    #[error("unresolved reference \"{reference}\" at {path} in {document}")]
    UnresolvedReference {
        document: String,
        path: String,
        reference: String,
    },

    #[error("irreconcilable union at {path} in {document}: {source}")]
    IrreconcilableUnion {
        document: String,
        path: String,
        #[source]
        source: UnifyError,
    },

    #[error("unsupported tuple at {path} in {document}: {message}")]
    UnsupportedTuple {
        document: String,
        path: String,
        message: String,
    },

    #[error("malformed schema at {path} in {document}: {message}")]
    MalformedSchema {
        document: String,
        path: String,
        message: String,
    },

    #[error("no schema or method named \"{name}\" in {document}")]
    UnknownTarget { document: String, name: String },
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::FileNotFound { .. } | ResolveError::ReadError { .. } => 3,
            _ => 2,
        }
    }

    /// Attach a location to a unification conflict.
    ///
    /// Tuple merges surface as [`ResolveError::UnsupportedTuple`]; every other
    /// conflict is an [`ResolveError::IrreconcilableUnion`].
    pub fn from_unify(source: UnifyError, document: &str, path: &str) -> Self {
        match source {
            UnifyError::TupleMerge => ResolveError::UnsupportedTuple {
                document: document.to_string(),
                path: path.to_string(),
                message: source.to_string(),
            },
            source => ResolveError::IrreconcilableUnion {
                document: document.to_string(),
                path: path.to_string(),
                source,
            },
        }
    }

    /// Title of the document the error was found in, when known.
    pub fn document(&self) -> Option<&str> {
        match self {
            ResolveError::UnresolvedReference { document, .. }
            | ResolveError::IrreconcilableUnion { document, .. }
            | ResolveError::UnsupportedTuple { document, .. }
            | ResolveError::MalformedSchema { document, .. }
            | ResolveError::UnknownTarget { document, .. } => Some(document),
            _ => None,
        }
    }

    /// JSON pointer of the offending schema within its document, when known.
    pub fn path(&self) -> Option<&str> {
        match self {
            ResolveError::UnresolvedReference { path, .. }
            | ResolveError::IrreconcilableUnion { path, .. }
            | ResolveError::UnsupportedTuple { path, .. }
            | ResolveError::MalformedSchema { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Serializable summary of an error, used for aggregated module reports.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorReport {
    /// Document title, empty when the error is not tied to a document.
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Method whose parameters or result failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorReport {
    pub fn in_method(mut self, name: impl Into<String>) -> Self {
        self.method = Some(name.into());
        self
    }
}

impl From<&ResolveError> for ErrorReport {
    fn from(err: &ResolveError) -> Self {
        Self {
            document: err.document().unwrap_or_default().to_string(),
            path: err.path().map(String::from),
            method: None,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{} {}: {}", self.document, method, self.message),
            None => write!(f, "{}: {}", self.document, self.message),
        }
    }
}
