//! Error types for request handling and startup configuration.

use std::time::Duration;

use crate::auth::Principal;

/// Which inbound shape a rejected selector came from. Decides the wording of the rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    /// Typed message text (quick-action label or slash command).
    Text,
    /// Inline button callback data.
    Callback,
    /// JSON payload sent by the control panel mini-app.
    WebApp,
}

/// Failure of a single request. Every variant is converted to reply text before it reaches a chat.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("principal {0} is not on the allow-list")]
    Unauthorized(Principal),

    #[error("unknown selector {selector:?} ({origin:?})")]
    UnknownCommand {
        origin: RequestSource,
        selector: String,
    },

    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("execution failed: {0}")]
    ExecutionFault(String),
}

impl RelayError {
    /// Text shown to the operator. Unauthorized carries no detail about the allow-list.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Unauthorized(_) => "❌ Unauthorized".to_string(),
            RelayError::UnknownCommand { origin, .. } => match origin {
                RequestSource::Text => {
                    "🤔 Not understood. Send /menu for the quick actions.".to_string()
                }
                RequestSource::Callback => "❌ Unknown action".to_string(),
                RequestSource::WebApp => "❌ Unknown command".to_string(),
            },
            RelayError::Timeout(d) => format!("❌ Timeout (>{}s)", d.as_secs().max(1)),
            RelayError::ExecutionFault(detail) => format!("❌ Error: {}", detail),
        }
    }
}

/// Startup configuration problems. These are the only failures that end the process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} not set")]
    Missing { name: &'static str },

    #[error("ALLOWED_USER_IDS is not a list of numeric ids: {0}")]
    InvalidAllowList(String),

    #[error(transparent)]
    Load(#[from] anyhow::Error),
}
