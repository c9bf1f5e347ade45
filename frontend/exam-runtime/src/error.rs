use thiserror::Error;

use crate::dom::NodeId;
use crate::models::PermissionKind;

/// Errors surfaced by the exam runtime to its host.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {message}")]
    BadResponse {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0:?} permission is required for this section")]
    PermissionDenied(PermissionKind),

    #[error("unknown section: {0}")]
    UnknownSection(String),

    #[error("local store error: {0}")]
    Store(String),
}

impl RuntimeError {
    /// Network failures and 5xx replies; everything else fails the same way
    /// on a second try.
    pub fn is_transient(&self) -> bool {
        match self {
            RuntimeError::Request { .. } => true,
            RuntimeError::BadResponse { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failures of document tree manipulation. The highlight engine catches all
/// of them; they never reach the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    NodeNotFound(NodeId),

    #[error("node {0:?} is not a text node")]
    NotText(NodeId),

    #[error("node {0:?} is not an element")]
    NotElement(NodeId),

    #[error("offset {offset} is out of bounds for node {node:?}")]
    InvalidOffset { node: NodeId, offset: usize },

    #[error("range partially selects a non-text node")]
    PartiallySelected,

    #[error("range is collapsed")]
    EmptyRange,

    #[error("node {0:?} has no parent")]
    Detached(NodeId),

    #[error("node {0:?} cannot be inserted there")]
    HierarchyRequest(NodeId),
}

/// A browser capability was missing or refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("{0} is not supported in this environment")]
    Unsupported(&'static str),

    #[error("{0}")]
    Denied(String),
}
