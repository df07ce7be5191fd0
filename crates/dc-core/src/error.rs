//! Error types for recoverable document failures.
//!
//! Programming errors (an unregistered element kind, a snapshot handed to the
//! wrong specification) are not represented here; they panic.

use crate::id::ElementId;
use thiserror::Error;

/// Recoverable document errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No element with this id exists in the diagram.
    #[error("unknown element: {0}")]
    UnknownElement(ElementId),

    /// A structural edit named a parent that does not exist.
    #[error("unknown parent: {0}")]
    UnknownParent(ElementId),

    /// An element with this id is already part of the diagram.
    #[error("duplicate element id: {0}")]
    DuplicateId(ElementId),

    /// The child kind cannot be attached to this parent kind.
    #[error("{child} cannot be a child of {parent}")]
    InvalidChild { parent: ElementId, child: ElementId },

    /// An element references another element that does not exist.
    #[error("{from} references missing element {to}")]
    DanglingReference { from: ElementId, to: ElementId },

    /// Encoding or decoding a persisted value failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The CRDT store holds no diagram to load.
    #[error("CRDT store holds no diagram")]
    EmptyStore,

    /// A caller-supplied mutation failed.
    #[error("mutation failed: {0}")]
    Mutation(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, Error>;
