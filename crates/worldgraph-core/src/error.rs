use thiserror::Error;

use crate::admission::Admission;

/// Stable error kinds surfaced to callers.
///
/// Transports map these to distinct statuses so a caller can tell "your world
/// does not exist" from "temporarily unavailable" from "rate limited".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    QuotaExceeded,
    InvalidInput,
    UpstreamUnavailable,
    DegradedIndex,
}

impl ErrorKind {
    /// HTTP-equivalent status for the kind.
    ///
    /// `DegradedIndex` accompanies a committed mutation, so it stays a success status.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::QuotaExceeded => 429,
            ErrorKind::InvalidInput => 400,
            ErrorKind::UpstreamUnavailable => 503,
            ErrorKind::DegradedIndex => 200,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::DegradedIndex => "degraded_index",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorldgraphError {
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("quota exceeded for feature `{feature}`")]
    QuotaExceeded { feature: String, admission: Admission },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },
    #[error("mutation committed but indexing failed: {message}")]
    DegradedIndex { message: String },
}

impl WorldgraphError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn quota_exceeded(feature: impl Into<String>, admission: Admission) -> Self {
        Self::QuotaExceeded {
            feature: feature.into(),
            admission,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::DegradedIndex {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorldgraphError::NotFound { .. } => ErrorKind::NotFound,
            WorldgraphError::Conflict { .. } => ErrorKind::Conflict,
            WorldgraphError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            WorldgraphError::InvalidInput { .. } => ErrorKind::InvalidInput,
            WorldgraphError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            WorldgraphError::DegradedIndex { .. } => ErrorKind::DegradedIndex,
        }
    }

    /// The admission decision attached to a quota denial, if any.
    pub fn admission(&self) -> Option<&Admission> {
        match self {
            WorldgraphError::QuotaExceeded { admission, .. } => Some(admission),
            _ => None,
        }
    }
}

pub type WorldgraphResult<T> = Result<T, WorldgraphError>;

impl From<rusqlite::Error> for WorldgraphError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::QueryReturnedNoRows => WorldgraphError::not_found(value.to_string()),
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                WorldgraphError::conflict(value.to_string())
            }
            _ => WorldgraphError::upstream(format!("storage engine: {value}")),
        }
    }
}

impl From<std::io::Error> for WorldgraphError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => WorldgraphError::not_found(value.to_string()),
            std::io::ErrorKind::AlreadyExists => WorldgraphError::conflict(value.to_string()),
            _ => WorldgraphError::upstream(format!("filesystem: {value}")),
        }
    }
}

impl From<reqwest::Error> for WorldgraphError {
    fn from(value: reqwest::Error) -> Self {
        WorldgraphError::upstream(format!("http: {value}"))
    }
}

impl From<serde_json::Error> for WorldgraphError {
    fn from(value: serde_json::Error) -> Self {
        WorldgraphError::invalid(value.to_string())
    }
}
