//! tratto: an HTTP service that turns Mermaid diagram text into raster images.
//!
//! The crate is split the way the binary consumes it: [`config`] resolves
//! layered settings, [`application::render`] holds the two rendering
//! strategies behind one trait, and [`infra`] carries the HTTP surface and
//! the telemetry bootstrap.

pub mod application;
pub mod config;
pub mod infra;
