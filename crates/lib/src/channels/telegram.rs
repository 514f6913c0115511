//! Telegram channel: long-poll getUpdates (or webhook), sendMessage and answerCallbackQuery via Bot API.

use crate::auth::Principal;
use crate::channels::inbound::{InboundKind, InboundMessage};
use crate::channels::registry::ChannelHandle;
use crate::dispatch::{Markup, Reply};
use crate::router::{MENU_CALLBACK, QUICK_ACTIONS};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const TELEGRAM_CHANNEL_ID: &str = "telegram";
const LONG_POLL_TIMEOUT: u64 = 30;
const ALLOWED_UPDATES: &str = r#"["message","callback_query"]"#;

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub web_app_data: Option<TelegramWebAppData>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

/// Data sent by the control panel mini-app (`Telegram.WebApp.sendData`).
#[derive(Debug, Deserialize)]
pub struct TelegramWebAppData {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

impl TelegramUpdate {
    /// Extract the request, if the update carries one we handle. The principal is always the
    /// sender (`from`), never the chat.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        if let Some(q) = self.callback_query {
            let chat_id = q.message.as_ref().map(|m| m.chat.id).unwrap_or(q.from.id);
            return Some(InboundMessage {
                channel_id: TELEGRAM_CHANNEL_ID.to_string(),
                conversation_id: chat_id.to_string(),
                principal: Principal(q.from.id),
                kind: InboundKind::Callback {
                    query_id: q.id,
                    data: q.data.unwrap_or_default(),
                },
            });
        }
        let msg = self.message?;
        let from = msg.from?;
        let kind = if let Some(w) = msg.web_app_data {
            InboundKind::WebApp(w.data)
        } else {
            InboundKind::Text(msg.text?)
        };
        Some(InboundMessage {
            channel_id: TELEGRAM_CHANNEL_ID.to_string(),
            conversation_id: msg.chat.id.to_string(),
            principal: Principal(from.id),
            kind,
        })
    }
}

/// Bot API `reply_markup` for a reply. `webapp_url` is the control panel.
pub fn reply_markup_json(markup: &Markup, webapp_url: &str) -> Option<Value> {
    match markup {
        Markup::None => None,
        Markup::Actions => {
            let mut rows = vec![vec![json!({
                "text": "🚀 Open Control Panel",
                "web_app": { "url": webapp_url }
            })]];
            for pair in QUICK_ACTIONS.chunks(2) {
                rows.push(
                    pair.iter()
                        .map(|a| json!({ "text": a.label, "callback_data": a.callback }))
                        .collect(),
                );
            }
            rows.push(vec![json!({ "text": "☰ Menu", "callback_data": MENU_CALLBACK })]);
            Some(json!({ "inline_keyboard": rows }))
        }
        Markup::QuickKeys => {
            // web_app_data only arrives from web apps opened via a reply keyboard button.
            let mut rows = vec![vec![json!({
                "text": "🚀 Control Panel",
                "web_app": { "url": webapp_url }
            })]];
            for pair in QUICK_ACTIONS.chunks(2) {
                rows.push(pair.iter().map(|a| json!({ "text": a.label })).collect());
            }
            Some(json!({
                "keyboard": rows,
                "resize_keyboard": true,
                "is_persistent": true
            }))
        }
        Markup::Visualize(url) => Some(json!({
            "inline_keyboard": [[{ "text": "📊 Visualize", "web_app": { "url": url } }]]
        })),
    }
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: String,
    api_base: String,
    webapp_url: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: String, api_base: String, webapp_url: String) -> Self {
        Self {
            id: TELEGRAM_CHANNEL_ID.to_string(),
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
            webapp_url,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Start the getUpdates long-poll loop and forward requests to the dispatch loop.
    /// Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx, shutdown).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(&self, offset: Option<i64>) -> Result<(Vec<TelegramUpdate>, Option<i64>), String> {
        let url = format!(
            "{}?timeout={}",
            self.method_url("getUpdates"),
            LONG_POLL_TIMEOUT
        );
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self
            .client
            .get(&url)
            .query(&[("allowed_updates", ALLOWED_UPDATES)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("getUpdates failed: {} {}", status, body));
        }
        let data: GetUpdatesResponse = res.json().await.map_err(|e| e.to_string())?;
        if !data.ok {
            return Err("getUpdates returned ok: false".to_string());
        }
        let next_offset = data
            .result
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1);
        Ok((data.result, next_offset))
    }

    async fn post(&self, method: &str, body: &Value) -> Result<(), String> {
        let res = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("{} failed: {} {}", method, status, body));
        }
        Ok(())
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), String> {
        let mut body = json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"]
        });
        if let Some(s) = secret {
            body["secret_token"] = Value::String(s.to_string());
        }
        self.post("setWebhook", &body).await
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), String> {
        self.post("deleteWebhook", &json!({})).await
    }

    /// Send an HTML-formatted message with optional keyboard.
    pub async fn send_message(&self, chat_id: &str, reply: &Reply) -> Result<(), String> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": reply.text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = reply_markup_json(&reply.markup, &self.webapp_url) {
            body["reply_markup"] = markup;
        }
        self.post("sendMessage", &body).await
    }

    pub async fn answer_callback_query(&self, query_id: &str) -> Result<(), String> {
        self.post("answerCallbackQuery", &json!({ "callback_query_id": query_id }))
            .await
    }
}

async fn run_get_updates_loop(
    channel: Arc<TelegramChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    shutdown: CancellationToken,
) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = channel.get_updates(offset) => r,
        };
        match polled {
            Ok((updates, next)) => {
                offset = next;
                for u in updates {
                    let Some(inbound) = u.into_inbound() else {
                        continue;
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(tokio::time::Duration::from_secs(2)) => {}
                }
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_reply(&self, conversation_id: &str, reply: &Reply) -> Result<(), String> {
        self.send_message(conversation_id, reply).await
    }

    async fn answer_callback(&self, query_id: &str) -> Result<(), String> {
        self.answer_callback_query(query_id).await
    }
}
