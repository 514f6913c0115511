//! Dispatch loop: one receiver of inbound requests; each request is handled on its own task.
//!
//! The loop only receives and spawns, so a hanging host command never delays intake. Replies go
//! back through the originating channel's handle; completion order across requests is not kept.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::channels::{ChannelHandle, ChannelRegistry, InboundKind, InboundMessage};
use crate::dispatch::{running_notice, Dispatcher, Prepared, Reply};

/// Receive until shutdown or until every sender is gone, then drain in-flight requests.
/// On shutdown, requests still running after `grace` are aborted, which kills their children.
pub async fn run_dispatch_loop(
    dispatcher: Dispatcher,
    channels: Arc<ChannelRegistry>,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    shutdown: CancellationToken,
    grace: Duration,
) {
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let cancelled = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break true,
            msg = inbound_rx.recv() => match msg {
                Some(msg) => {
                    in_flight.spawn(process_inbound_message(
                        dispatcher.clone(),
                        channels.clone(),
                        msg,
                    ));
                }
                None => break false,
            },
            Some(res) = in_flight.join_next(), if !in_flight.is_empty() => log_join(res),
        }
    };
    inbound_rx.close();

    if !cancelled {
        while let Some(res) = in_flight.join_next().await {
            log_join(res);
        }
        log::info!("dispatch loop stopped: inbound closed");
        return;
    }

    log::info!(
        "dispatch loop stopping: waiting up to {}s for {} request(s)",
        grace.as_secs(),
        in_flight.len()
    );
    let drained = tokio::time::timeout(grace, async {
        while let Some(res) = in_flight.join_next().await {
            log_join(res);
        }
    })
    .await;
    if drained.is_err() {
        log::warn!(
            "shutdown grace elapsed, aborting {} running request(s)",
            in_flight.len()
        );
        in_flight.shutdown().await;
    }
    log::info!("dispatch loop stopped");
}

fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            log::error!("request task panicked: {}", e);
        }
    }
}

/// Handle one request: answer the button press, send the "running" notice, run, send the result.
async fn process_inbound_message(dispatcher: Dispatcher, channels: Arc<ChannelRegistry>, msg: InboundMessage) {
    let Some(handle) = channels.get(&msg.channel_id).await else {
        log::warn!("inbound: no channel registered for {}", msg.channel_id);
        return;
    };
    if let InboundKind::Callback { query_id, .. } = &msg.kind {
        if let Err(e) = handle.answer_callback(query_id).await {
            log::debug!("inbound: answer_callback failed: {}", e);
        }
    }
    match dispatcher.prepare(msg.principal, &msg.kind).await {
        Prepared::Reply(reply) => deliver(handle.as_ref(), &msg.conversation_id, &reply).await,
        Prepared::Job { job, source } => {
            deliver(handle.as_ref(), &msg.conversation_id, &running_notice(&job)).await;
            let reply = dispatcher.run(&job, source).await;
            deliver(handle.as_ref(), &msg.conversation_id, &reply).await;
        }
    }
}

async fn deliver(handle: &dyn ChannelHandle, conversation_id: &str, reply: &Reply) {
    if let Err(e) = handle.send_reply(conversation_id, reply).await {
        log::warn!("inbound: send_reply to {} failed: {}", conversation_id, e);
    }
}
