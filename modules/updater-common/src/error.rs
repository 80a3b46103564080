use std::fmt;

use thiserror::Error;
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Startup configuration failures. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// The three external dependencies, named as they appear in health reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Api {
    EventBus,
    Query,
    Command,
}

impl Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            Api::EventBus => "EventBus",
            Api::Query => "QueryAPI",
            Api::Command => "CommandAPI",
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency was unreachable, answered with an error, or sent something
/// that could not be understood.
#[derive(Debug, Error)]
#[error("{api} unavailable: {source}")]
pub struct UpstreamError {
    pub api: Api,
    #[source]
    pub source: BoxError,
}

impl UpstreamError {
    pub fn new(api: Api, source: impl Into<BoxError>) -> Self {
        Self {
            api,
            source: source.into(),
        }
    }

    pub fn query(source: impl Into<BoxError>) -> Self {
        Self::new(Api::Query, source)
    }

    pub fn command(source: impl Into<BoxError>) -> Self {
        Self::new(Api::Command, source)
    }
}

/// Single-engagement lookup failures.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("engagement {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Outcome of a failed dispatch. Callers decide whether to retry.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("engagement {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<LookupError> for DispatchError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound(uuid) => DispatchError::NotFound(uuid),
            LookupError::Upstream(e) => DispatchError::Upstream(e),
        }
    }
}
