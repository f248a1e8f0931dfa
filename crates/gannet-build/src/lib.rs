//! The build executor: materializes a release for a platform by invoking an
//! isolated container, then commits the artifact, its digest and its
//! extracted metadata in one step.

pub use crate::container::ContainerSpec;
pub use crate::error::BuildError;
pub use crate::executor::BuildExecutor;
pub use crate::external::ExternalBuild;
pub use crate::metadata::run_requirements;

mod container;
mod error;
mod executor;
mod external;
mod locks;
mod metadata;
