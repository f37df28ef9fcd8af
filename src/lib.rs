//! debug-bridge - a Debug Adapter Protocol client with a CDP bridge
//!
//! [`dap::DapClient`] talks to DAP adapters over stdio or TCP.
//! [`cdp::CdpAdapter`] speaks the Chrome DevTools Protocol to a JavaScript
//! runtime and presents it through the same [`backend::DebugBackend`]
//! contract, so a session consumer cannot tell the two apart.

pub mod backend;
pub mod cdp;
pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;

pub use backend::{DebugBackend, ExitReason, Notification, NotificationReceiver};
pub use cli::driver::BreakpointLocation;
pub use common::{Error, Result};
