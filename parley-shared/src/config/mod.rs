//! # Configuration
//!
//! Server configuration: profile defaults, file formats, and environment
//! overrides.

pub mod server;
