//! hostrelay core library: allow-list, command catalog, execution engine, output
//! normalization, request routing, the Telegram channel and the relay server.

pub mod auth;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod disk;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod output;
pub mod platform;
pub mod router;
