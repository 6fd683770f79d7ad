//! Herald daemon library
//!
//! This module provides the components behind `heraldd`:
//! - configuration loading
//! - HTTP adapters for the platform gateway and persona service
//! - the admin REST API
//! - server lifecycle and graceful shutdown

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod server;

pub use collaborators::{HttpPersona, HttpPlatform};
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
