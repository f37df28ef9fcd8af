//! Common utilities shared by the DAP client, the CDP adapter and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod pending;

use std::sync::{Mutex, MutexGuard};

pub use error::{BestEffort, Error, Result};

/// Lock a std mutex, recovering the guard if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Parse a "listening at:" address from adapter output.
/// Handles IPv6 format [::]:PORT by converting to 127.0.0.1:PORT
pub fn parse_listen_address(line: &str) -> Option<String> {
    let addr_start = line.find("listening at:")?;
    let addr = line[addr_start + "listening at:".len()..].trim();
    if addr.is_empty() {
        return None;
    }
    match addr.strip_prefix("[::]:") {
        Some(port) => Some(format!("127.0.0.1:{}", port)),
        None => Some(addr.to_string()),
    }
}
