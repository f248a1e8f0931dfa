//! Clients for upstream package indexes.
//!
//! Two backends exist: `simple-xmlrpc` (a PyPI-style index with a JSON
//! release listing and an XML-RPC changelog) and `dev-index` (a devpi-style
//! index speaking the PEP 691 simple JSON API). Both expose the same
//! capability set: list a package's releases, list one version's releases,
//! and stream change events keyed by a monotonic serial.

pub use crate::client::{ChangeEvent, IndexBackend, IndexClient, IndexClientBuilder};
pub use crate::descriptor::{best_release, DistKind, ReleaseDescriptor};
pub use crate::error::Error;

mod client;
mod descriptor;
mod dev_index;
mod error;
mod pypi;
mod xmlrpc;
