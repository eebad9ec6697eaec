#![forbid(unsafe_code)]

//! Tool-augmented chat streaming.
//!
//! Multiplexes assistant prose and structured tool events onto one
//! line-framed stream (server side) and rebuilds the tool-call lifecycle
//! from arbitrarily chunked input (client side).

pub mod codec;
pub mod config;
pub mod errors;
pub mod frame;
pub mod invocation;
pub mod marker;
pub mod model;
pub mod orchestrator;
pub mod server;
pub mod tools;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
