#![forbid(unsafe_code)]

//! Device domain module.
//!
//! The REST surface under `/v1/devices` translates admitted requests into
//! unary calls on the downstream `devices.v1.DeviceService`. The seam is the
//! [`rpc::DevicesRpc`] trait: production wires the gRPC client through the
//! resilience adapter, tests substitute an in-memory implementation.

pub mod api;
pub mod model;
pub mod proto;
pub mod rpc;
pub mod testing;
