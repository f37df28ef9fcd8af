//! Chrome DevTools Protocol support
//!
//! A hand-built WebSocket client carries CDP to a JavaScript runtime's
//! inspector; [`CdpAdapter`] translates that session into DAP shapes.

pub mod adapter;
pub mod handles;
pub mod protocol;
pub mod scripts;
pub mod urls;
pub mod websocket;

pub use adapter::{discover_websocket_url, AdapterState, CdpAdapter, CdpOptions};
pub use websocket::{WebSocketClient, WsEvent};
