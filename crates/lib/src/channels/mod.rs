//! Communication channels (Telegram).
//!
//! Channel trait and registry so the relay can start/stop channel connectors and route
//! replies. Inbound requests are sent to the dispatch loop, which answers through the
//! registered handle of the originating channel.

mod inbound;
mod registry;
mod telegram;

pub use inbound::{InboundKind, InboundMessage};
pub use registry::{ChannelHandle, ChannelRegistry};
pub use telegram::{
    reply_markup_json, TelegramChannel, TelegramUpdate, TELEGRAM_API_BASE, TELEGRAM_CHANNEL_ID,
};
