#![forbid(unsafe_code)]

//! Shared utilities for the devices gateway.

pub mod humantime_serde;
