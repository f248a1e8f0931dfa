use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No version of `{requirement}` satisfies the constraints (candidates: {})", candidates.join(", "))]
    UnsatisfiedDependency {
        requirement: String,
        candidates: Vec<String>,
    },

    #[error("Cannot merge incompatible requirements: {}", requirements.join(" and "))]
    IncompatibleRequirements { requirements: Vec<String> },

    #[error("Compilation did not converge within {rounds} rounds")]
    CompilationDidNotConverge { rounds: usize },

    #[error("Build failed: {reason}")]
    Build { reason: String, log: String },

    #[error("Invalid requirement `{line}`: {message}")]
    BadRequirement { line: String, message: String },

    #[error("Build metadata is unusable: {0}")]
    Metadata(String),

    #[error(transparent)]
    Store(#[from] gannet_store::StoreError),
}

impl ResolveError {
    /// The stable kind name recorded in compilation logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsatisfiedDependency { .. } => "UnsatisfiedDependency",
            Self::IncompatibleRequirements { .. } => "IncompatibleRequirements",
            Self::CompilationDidNotConverge { .. } => "CompilationDidNotConverge",
            Self::Build { .. } => "BuildFailed",
            Self::BadRequirement { .. } => "BadRequirement",
            Self::Metadata(_) => "BadMetadata",
            Self::Store(_) => "StoreError",
        }
    }
}

impl From<gannet_build::BuildError> for ResolveError {
    fn from(err: gannet_build::BuildError) -> Self {
        match err {
            gannet_build::BuildError::Failed { reason, log } => Self::Build { reason, log },
            gannet_build::BuildError::BadMetadata(message) => Self::Metadata(message),
            gannet_build::BuildError::Store(err) => Self::Store(err),
            other => Self::Build {
                reason: other.to_string(),
                log: String::new(),
            },
        }
    }
}
