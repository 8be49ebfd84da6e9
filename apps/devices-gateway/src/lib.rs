#![forbid(unsafe_code)]

//! Devices gateway composition: configuration, telemetry, and the HTTP
//! pipeline. The binary in `main.rs` wires real backends; integration tests
//! assemble the same pipeline over in-memory substitutes.

pub mod config;
pub mod server;
pub mod telemetry;
