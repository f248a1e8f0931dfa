//! The proxy server: HTTP surface, configuration and worker bootstrap.

pub mod logging;
pub mod server;
pub mod settings;
