//! Error types shared across the data access layer.
//!
//! Every failure the core can produce surfaces as a [`MarvinError`]. Each
//! variant maps onto one [`ErrorKind`], which is what presentation layers
//! (and the remote API envelope) use to classify a failure without matching
//! on payloads.

use crate::fits::FitsError;
use crate::origin::Origin;
use crate::remote::RemoteError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a [`MarvinError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or ambiguous input: identifiers, coordinates, selectors.
    Identifier,
    /// Requested analysis version predates a component's minimum.
    VersionIncompatibility,
    /// No backend could serve the request.
    OriginResolution,
    /// Operation not permitted under the current origin.
    Capability,
    /// Valid request, but the map, channel, VAC or object is absent.
    NotFound,
    /// A multi-item request where at least one item failed.
    PartialFailure,
    /// Two associated objects disagree on their spatial grid.
    ShapeMismatch,
    /// Local filesystem failure.
    Io,
    /// Failure reading or writing a FITS product.
    Fits,
    /// Transport or protocol failure talking to the remote API.
    Remote,
    /// Database session failure.
    Database,
    /// Invalid or unreadable configuration.
    Config,
    /// Data present but inconsistent with the data model.
    InvalidData,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Identifier => "identifier",
            ErrorKind::VersionIncompatibility => "version incompatibility",
            ErrorKind::OriginResolution => "origin resolution",
            ErrorKind::Capability => "capability",
            ErrorKind::NotFound => "not found",
            ErrorKind::PartialFailure => "partial failure",
            ErrorKind::ShapeMismatch => "shape mismatch",
            ErrorKind::Io => "io",
            ErrorKind::Fits => "fits",
            ErrorKind::Remote => "remote",
            ErrorKind::Database => "database",
            ErrorKind::Config => "config",
            ErrorKind::InvalidData => "invalid data",
        };
        write!(f, "{name}")
    }
}

/// One failed item of a multi-item request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// The item as the caller named it, e.g. `"unknown_param:x"`.
    pub item: String,
    /// Classification of the underlying failure.
    pub kind: ErrorKind,
    /// Rendered underlying error.
    pub reason: String,
}

/// One origin the resolver considered and why it was not used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginAttempt {
    pub origin: Origin,
    pub reason: String,
}

fn join_attempts(attempts: &[OriginAttempt]) -> String {
    if attempts.is_empty() {
        return "none".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.origin, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.item, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced by the data access layer.
#[derive(Error, Debug)]
pub enum MarvinError {
    /// Malformed or ambiguous input.
    #[error("invalid input: {0}")]
    Identifier(String),

    /// Requested analysis version is older than the component supports.
    #[error("{component} requires at least dapver='{minimum}'")]
    VersionIncompatibility {
        component: String,
        requested: String,
        minimum: String,
    },

    /// No backend could satisfy the request.
    #[error("no data available for {target} with {versions}; attempted: {}", join_attempts(.attempted))]
    OriginResolution {
        target: String,
        versions: String,
        attempted: Vec<OriginAttempt>,
    },

    /// Operation not permitted for the object's origin.
    #[error("{operation} is not permitted for {origin} origin: {reason}")]
    Capability {
        operation: String,
        origin: Origin,
        reason: String,
    },

    /// The requested item does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// At least one item of a multi-item request failed.
    #[error("{context}: {}", join_failures(.failures))]
    PartialFailure {
        context: String,
        failures: Vec<ItemFailure>,
    },

    /// Two associated objects do not share a spatial grid.
    #[error("{related} has shape {found:?} but parent has shape {expected:?}")]
    ShapeMismatch {
        related: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl MarvinError {
    /// Classify this error.
    ///
    /// Errors relayed from the remote API keep the kind the server reported.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarvinError::Identifier(_) => ErrorKind::Identifier,
            MarvinError::VersionIncompatibility { .. } => ErrorKind::VersionIncompatibility,
            MarvinError::OriginResolution { .. } => ErrorKind::OriginResolution,
            MarvinError::Capability { .. } => ErrorKind::Capability,
            MarvinError::NotFound(_) => ErrorKind::NotFound,
            MarvinError::PartialFailure { .. } => ErrorKind::PartialFailure,
            MarvinError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            MarvinError::Io(_) => ErrorKind::Io,
            MarvinError::Fits(_) => ErrorKind::Fits,
            MarvinError::Remote(RemoteError::Rejected { kind, .. }) => *kind,
            MarvinError::Remote(_) => ErrorKind::Remote,
            MarvinError::Database(_) => ErrorKind::Database,
            MarvinError::Config(_) => ErrorKind::Config,
            MarvinError::InvalidData(_) => ErrorKind::InvalidData,
        }
    }

    /// Summarise this error as a failed item of a multi-item request.
    pub fn as_item_failure(&self, item: impl Into<String>) -> ItemFailure {
        ItemFailure {
            item: item.into(),
            kind: self.kind(),
            reason: self.to_string(),
        }
    }
}

/// Result type for data access operations
pub type MarvinResult<T> = Result<T, MarvinError>;
