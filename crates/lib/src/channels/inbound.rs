//! Inbound request from a channel: delivered to the dispatch loop.

use crate::auth::Principal;
use crate::error::RequestSource;

/// The three request shapes a chat can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// Typed text: a quick-action label or a slash command.
    Text(String),
    /// Inline button press. `query_id` must be answered so the client stops its spinner.
    Callback { query_id: String, data: String },
    /// Raw `web_app_data.data` string from the control panel.
    WebApp(String),
}

impl InboundKind {
    pub fn source(&self) -> RequestSource {
        match self {
            InboundKind::Text(_) => RequestSource::Text,
            InboundKind::Callback { .. } => RequestSource::Callback,
            InboundKind::WebApp(_) => RequestSource::WebApp,
        }
    }
}

/// A request plus where its reply must go.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub conversation_id: String,
    pub principal: Principal,
    pub kind: InboundKind,
}
