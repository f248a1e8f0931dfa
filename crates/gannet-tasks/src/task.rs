use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A unit of asynchronous work. The payload names rows, never carries
/// them: re-delivery after a crash re-reads current state, which is what
/// keeps the handlers idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    SyncIndex {
        index_id: i64,
    },
    Build {
        build_id: i64,
        force: bool,
    },
    /// `index_slugs` records the request's ordered index set; the
    /// compiled-requirements row itself only knows its platform.
    Compile {
        compiled_id: i64,
        index_slugs: Vec<String>,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncIndex { .. } => "sync",
            Self::Build { .. } => "build",
            Self::Compile { .. } => "compile",
        }
    }

    pub(crate) fn to_payload(&self) -> Result<String, TaskError> {
        serde_json::to_string(self).map_err(|err| TaskError::BadPayload(err.to_string()))
    }

    pub(crate) fn from_payload(payload: &str) -> Result<Self, TaskError> {
        serde_json::from_str(payload).map_err(|err| TaskError::BadPayload(err.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Unusable task payload: {0}")]
    BadPayload(String),

    #[error(transparent)]
    Store(#[from] gannet_store::StoreError),

    #[error(transparent)]
    Client(#[from] gannet_client::Error),

    #[error(transparent)]
    Build(#[from] gannet_build::BuildError),

    #[error(transparent)]
    Resolve(#[from] gannet_resolver::ResolveError),

    #[error("Task failed after {attempts} attempts: {message}")]
    Exhausted { attempts: i64, message: String },

    #[error("Invalid index URL: {0}")]
    BadIndexUrl(#[from] url::ParseError),
}

impl TaskError {
    /// Transport failures and single-build failures are retried with
    /// backoff; everything else is terminal for the attempt.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Self::Client(err) => err.is_transient(),
            Self::Build(gannet_build::BuildError::Failed { .. }) => true,
            Self::Build(gannet_build::BuildError::Request(_)) => true,
            Self::Build(gannet_build::BuildError::Io(_)) => true,
            Self::Store(gannet_store::StoreError::NotFound(_)) => false,
            Self::Store(_) => true,
            Self::BadPayload(_)
            | Self::Build(_)
            | Self::Resolve(_)
            | Self::Exhausted { .. }
            | Self::BadIndexUrl(_) => false,
        }
    }
}
