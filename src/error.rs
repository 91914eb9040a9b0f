//! Error types for manifest parsing and validation.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::validate::Diagnostic;

/// Where a value came from: a line of the manifest file or an environment
/// variable that overrode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Line(usize),
    Env(String),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Line(line) => write!(f, "line {}", line),
            Origin::Env(name) => write!(f, "environment variable {}", name),
        }
    }
}

/// Everything that can go wrong between reading a manifest and handing a
/// validated [`BuildManifest`](crate::BuildManifest) to the caller.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("[{section}] \"{key}\" is missing")]
    MissingRequiredKey { section: String, key: String },

    #[error("{origin}: \"{key}\" references undefined key \"{reference}\"")]
    InvalidReference {
        key: String,
        reference: String,
        origin: Origin,
    },

    #[error("{origin}: placeholders in \"{key}\" nest too deeply (circular reference?)")]
    ReferenceDepth { key: String, origin: Origin },

    #[error("{origin}: invalid value {value:?} for \"{key}\": {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
        origin: Origin,
    },

    #[error("manifest has {} error(s){}", .0.len(), first_message(.0))]
    Validation(Vec<Diagnostic>),

    #[error("source directory {} does not exist", .0.display())]
    SourceDirMissing(PathBuf),

    #[error("invalid pattern {pattern:?} in \"{key}\": {reason}")]
    Pattern {
        key: String,
        pattern: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

fn first_message(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .first()
        .map(|d| format!(", first: {}", d))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ManifestError>;
