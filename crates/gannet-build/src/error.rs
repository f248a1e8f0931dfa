use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The container exited non-zero, produced no artifact, or timed out.
    /// The log is recorded on the build row before this surfaces.
    #[error("Build failed: {reason}")]
    Failed { reason: String, log: String },

    #[error("Invalid platform spec: {0}")]
    BadSpec(#[source] serde_json::Error),

    #[error("Invalid build metadata: {0}")]
    BadMetadata(String),

    #[error("External URL carries no usable `#egg=name==version` fragment: {0}")]
    BadExternalUrl(String),

    #[error(transparent)]
    Store(#[from] gannet_store::StoreError),

    #[error(transparent)]
    Storage(#[from] gannet_storage::StorageError),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub(crate) fn failed(reason: impl Into<String>, log: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            log: log.into(),
        }
    }
}
