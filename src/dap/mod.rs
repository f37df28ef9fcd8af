//! Debug Adapter Protocol (DAP) implementation
//!
//! Client side of DAP: Content-Length framing, message types, and a client
//! that correlates requests with responses over a spawned adapter's stdio or
//! a TCP socket.

pub mod client;
pub mod codec;
pub mod types;

pub use client::{ClientState, DapClient};
pub use types::*;
