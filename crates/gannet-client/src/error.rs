use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The upstream does not know the package name.
    #[error("Package `{0}` was not found in the upstream index")]
    PackageNotFound(String),

    /// An invalid URL was provided or derived.
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Received some unexpected JSON from {url}")]
    BadJson {
        source: serde_json::Error,
        url: String,
    },

    #[error("Malformed XML-RPC response: {0}")]
    BadXml(String),

    #[error("Upstream violated the index protocol: {0}")]
    Protocol(String),

    #[error("Upstream XML-RPC fault {code}: {message}")]
    Fault { code: i64, message: String },
}

impl Error {
    pub(crate) fn from_json_err(err: serde_json::Error, url: String) -> Self {
        Self::BadJson { source: err, url }
    }

    /// Whether retrying at the task layer can help: transport failures and
    /// server errors, as opposed to a definite answer from the upstream.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .is_some_and(|status| status.is_server_error())
            }
            Self::Middleware(reqwest_middleware::Error::Reqwest(err)) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .is_some_and(|status| status.is_server_error())
            }
            // Middleware-level failures are retry exhaustion; retrying again
            // later is still the right call.
            Self::Middleware(reqwest_middleware::Error::Middleware(_)) => true,
            Self::PackageNotFound(_)
            | Self::UrlParse(_)
            | Self::BadJson { .. }
            | Self::BadXml(_)
            | Self::Protocol(_)
            | Self::Fault { .. } => false,
        }
    }
}
