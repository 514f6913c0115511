//! Request router: normalize the three inbound shapes into one [`Route`].
//!
//! - button callbacks carry a fixed action id (`disk`, `mem`, ...)
//! - typed text is the exact label of a quick-action button, or a slash command
//! - the control panel mini-app sends `{"command": "...", "custom_cmd": "..."}`

use serde::Deserialize;

use crate::catalog::CommandKey;
use crate::error::{RelayError, RequestSource};

/// Payload `command` value that bypasses the catalog.
pub const CUSTOM_COMMAND: &str = "custom";

/// Callback id that re-renders the action menu.
pub const MENU_CALLBACK: &str = "menu";

/// A quick action: inline button callback id and reply-keyboard label for one catalog key.
#[derive(Debug, Clone, Copy)]
pub struct QuickAction {
    pub callback: &'static str,
    pub label: &'static str,
    pub key: CommandKey,
}

pub const QUICK_ACTIONS: &[QuickAction] = &[
    QuickAction {
        callback: "sysinfo",
        label: "🖥 System",
        key: CommandKey::SystemInfo,
    },
    QuickAction {
        callback: "disk",
        label: "💾 Disk",
        key: CommandKey::DiskSpace,
    },
    QuickAction {
        callback: "uptime",
        label: "⏱ Uptime",
        key: CommandKey::Uptime,
    },
    QuickAction {
        callback: "procs",
        label: "📊 Processes",
        key: CommandKey::Processes,
    },
    QuickAction {
        callback: "temp",
        label: "🌡 Temp",
        key: CommandKey::Temperature,
    },
    QuickAction {
        callback: "mem",
        label: "🧠 Memory",
        key: CommandKey::Memory,
    },
    QuickAction {
        callback: "logs",
        label: "📜 Logs",
        key: CommandKey::Logs,
    },
];

/// What to execute: a catalog entry, or literal shell text supplied by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Catalog(CommandKey),
    /// Runs arbitrary shell text. The allow-list is the only thing standing in front of this.
    Custom(String),
}

impl Selector {
    pub fn key(&self) -> Option<CommandKey> {
        match self {
            Selector::Catalog(k) => Some(*k),
            Selector::Custom(_) => None,
        }
    }
}

/// Outcome of routing one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Run(Selector),
    /// `/start`: welcome text and the control panel button.
    Start,
    /// Show the available actions again.
    Menu,
}

/// Structured payload from the control panel mini-app.
#[derive(Debug, Clone, Deserialize)]
pub struct WebAppPayload {
    pub command: String,
    #[serde(default)]
    pub custom_cmd: Option<String>,
}

pub fn route_callback(data: &str) -> Result<Route, RelayError> {
    if data == MENU_CALLBACK {
        return Ok(Route::Menu);
    }
    QUICK_ACTIONS
        .iter()
        .find(|a| a.callback == data)
        .map(|a| Route::Run(Selector::Catalog(a.key)))
        .ok_or_else(|| RelayError::UnknownCommand {
            origin: RequestSource::Callback,
            selector: data.to_string(),
        })
}

pub fn route_text(text: &str) -> Result<Route, RelayError> {
    let text = text.trim();
    if let Some(cmd) = text.strip_prefix('/') {
        // "/start@my_bot" in group chats
        let name = cmd.split('@').next().unwrap_or_default();
        match name {
            "start" => return Ok(Route::Start),
            "menu" => return Ok(Route::Menu),
            _ => {}
        }
    }
    QUICK_ACTIONS
        .iter()
        .find(|a| a.label == text)
        .map(|a| Route::Run(Selector::Catalog(a.key)))
        .ok_or_else(|| RelayError::UnknownCommand {
            origin: RequestSource::Text,
            selector: text.to_string(),
        })
}

pub fn route_web_app(data: &str) -> Result<Route, RelayError> {
    let unknown = |selector: String| RelayError::UnknownCommand {
        origin: RequestSource::WebApp,
        selector,
    };
    let payload: WebAppPayload = serde_json::from_str(data).map_err(|e| {
        log::debug!("web app payload not understood: {}", e);
        unknown(data.to_string())
    })?;
    if payload.command == CUSTOM_COMMAND {
        let cmd = payload.custom_cmd.unwrap_or_default();
        let cmd = cmd.trim();
        if cmd.is_empty() {
            return Err(unknown(CUSTOM_COMMAND.to_string()));
        }
        return Ok(Route::Run(Selector::Custom(cmd.to_string())));
    }
    CommandKey::from_name(&payload.command)
        .map(|k| Route::Run(Selector::Catalog(k)))
        .ok_or_else(|| unknown(payload.command))
}
