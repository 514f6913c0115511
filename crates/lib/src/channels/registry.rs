//! Channel registry: register and lookup channels by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dispatch::Reply;

/// Handle to a running channel (stop, deliver replies).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Deliver a reply to a conversation (e.g. Telegram chat_id).
    async fn send_reply(&self, conversation_id: &str, reply: &Reply) -> Result<(), String>;
    /// Acknowledge a button press. Channels without callbacks keep the default no-op.
    async fn answer_callback(&self, _query_id: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Registry of channel ids to handles. Shared by the relay server and the dispatch loop.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, id: String, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id.clone(), handle) {
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        let g = self.inner.read().await;
        g.get(id).cloned()
    }

    /// Stop every registered channel.
    pub async fn stop_all(&self) {
        let g = self.inner.read().await;
        for handle in g.values() {
            handle.stop();
        }
    }
}
