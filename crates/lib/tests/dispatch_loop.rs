//! Integration test: the dispatch loop answers requests independently of each other.

use async_trait::async_trait;
use hostrelay::auth::{AllowList, Principal};
use hostrelay::catalog::Catalog;
use hostrelay::channels::{ChannelHandle, ChannelRegistry, InboundKind, InboundMessage};
use hostrelay::dispatch::{Dispatcher, Reply};
use hostrelay::exec::{ExecLimits, Executor};
use hostrelay::gateway::run_dispatch_loop;
use hostrelay::platform::{HostEnvironment, HostPlatform};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHANNEL: &str = "mock";

/// Collects every reply as (conversation id, reply).
struct MockChannel {
    sent: mpsc::UnboundedSender<(String, Reply)>,
}

#[async_trait]
impl ChannelHandle for MockChannel {
    fn id(&self) -> &str {
        CHANNEL
    }

    fn stop(&self) {}

    async fn send_reply(&self, conversation_id: &str, reply: &Reply) -> Result<(), String> {
        self.sent
            .send((conversation_id.to_string(), reply.clone()))
            .map_err(|e| e.to_string())
    }
}

struct Harness {
    inbound_tx: mpsc::Sender<InboundMessage>,
    replies: mpsc::UnboundedReceiver<(String, Reply)>,
    shutdown: CancellationToken,
    dispatch: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

async fn harness(command_timeout: Duration, grace: Duration) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = HostEnvironment {
        platform: HostPlatform::current(),
        sandboxed: false,
    };
    let catalog = Arc::new(Catalog::for_host(&host, Vec::new()));
    let limits = ExecLimits {
        command_timeout,
        ..ExecLimits::default()
    };
    let executor = Executor::new(catalog, dir.path().to_path_buf(), limits);
    let dispatcher = Dispatcher::new(
        Arc::new(AllowList::new([1])),
        executor,
        "https://panel.test",
    );

    let (sent_tx, replies) = mpsc::unbounded_channel();
    let registry = Arc::new(ChannelRegistry::new());
    registry
        .register(CHANNEL.to_string(), Arc::new(MockChannel { sent: sent_tx }))
        .await;

    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let dispatch = tokio::spawn(run_dispatch_loop(
        dispatcher,
        registry,
        inbound_rx,
        shutdown.clone(),
        grace,
    ));
    Harness {
        inbound_tx,
        replies,
        shutdown,
        dispatch,
        _dir: dir,
    }
}

fn message(conversation: &str, principal: i64, kind: InboundKind) -> InboundMessage {
    InboundMessage {
        channel_id: CHANNEL.to_string(),
        conversation_id: conversation.to_string(),
        principal: Principal(principal),
        kind,
    }
}

fn custom(cmd: &str) -> InboundKind {
    InboundKind::WebApp(serde_json::json!({ "command": "custom", "custom_cmd": cmd }).to_string())
}

async fn collect(replies: &mut mpsc::UnboundedReceiver<(String, Reply)>, n: usize) -> Vec<(String, Reply)> {
    let mut out = Vec::new();
    while out.len() < n {
        match tokio::time::timeout(Duration::from_secs(10), replies.recv()).await {
            Ok(Some(r)) => out.push(r),
            _ => break,
        }
    }
    out
}

#[cfg(unix)]
#[tokio::test]
async fn fast_request_is_not_blocked_by_a_slow_one() {
    let mut h = harness(Duration::from_secs(1), Duration::from_secs(5)).await;
    h.inbound_tx
        .send(message("slow", 1, custom("sleep 5")))
        .await
        .unwrap();
    h.inbound_tx
        .send(message("fast", 1, custom("echo fast")))
        .await
        .unwrap();

    let got = collect(&mut h.replies, 4).await;
    assert_eq!(got.len(), 4, "replies: {:?}", got);

    let results: Vec<&(String, Reply)> = got
        .iter()
        .filter(|(_, r)| !r.text.starts_with("⚙️ Running"))
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "fast");
    assert!(results[0].1.text.contains("fast"));
    assert_eq!(results[1].0, "slow");
    assert!(results[1].1.text.contains("Timeout"), "{}", results[1].1.text);

    drop(h.inbound_tx);
    tokio::time::timeout(Duration::from_secs(5), h.dispatch)
        .await
        .expect("loop stops when inbound closes")
        .unwrap();
}

#[tokio::test]
async fn unauthorized_principal_gets_a_single_refusal() {
    let mut h = harness(Duration::from_secs(5), Duration::from_secs(5)).await;
    h.inbound_tx
        .send(message("c1", 99, InboundKind::Text("🧠 Memory".into())))
        .await
        .unwrap();
    drop(h.inbound_tx);
    tokio::time::timeout(Duration::from_secs(5), h.dispatch)
        .await
        .expect("loop drains and stops")
        .unwrap();

    let mut got = Vec::new();
    while let Ok(r) = h.replies.try_recv() {
        got.push(r);
    }
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, "c1");
    assert!(got[0].1.text.contains("Unauthorized"));
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_aborts_requests_after_grace() {
    let mut h = harness(Duration::from_secs(60), Duration::from_millis(200)).await;
    h.inbound_tx
        .send(message("c1", 1, custom("sleep 30")))
        .await
        .unwrap();
    let notice = collect(&mut h.replies, 1).await;
    assert_eq!(notice.len(), 1);
    assert!(notice[0].1.text.starts_with("⚙️ Running"));

    h.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), h.dispatch)
        .await
        .expect("loop stops within grace")
        .unwrap();
    assert!(h.replies.try_recv().is_err());
}
