//! vhostmux
//!
//! Runs one web-server instance per vhost definition, each on its own port,
//! behind a generated reverse-proxy fragment. Instances are tracked through
//! pid files and stale ones from earlier runs are stopped.

pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
pub mod ports;
pub mod proxy;
pub mod reconciler;
pub mod supervisor;
pub mod terminator;
pub mod vhost;

pub use config::Config;
pub use error::{MuxError, Result};
pub use manager::{Multiplexer, RunReport};
pub use vhost::{VhostDescriptor, VhostScanner};
