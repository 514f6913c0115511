//! Relay server: HTTP health + Telegram webhook on one port, plus the dispatch loop.

mod inbound;
mod server;

pub use inbound::run_dispatch_loop;
pub use server::{run_relay, RelayState};
