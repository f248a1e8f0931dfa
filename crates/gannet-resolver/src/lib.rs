//! The dependency resolver: compiles a set of top-level requirements into a
//! fully pinned, transitively closed requirement set for one platform,
//! building artifacts on demand to discover transitive dependencies.

pub use crate::driver::BuildDriver;
pub use crate::error::ResolveError;
pub use crate::formatter::GraphFormatter;
pub use crate::graph::DependencyGraph;

mod driver;
mod error;
mod finder;
mod formatter;
mod graph;
mod requirement;
