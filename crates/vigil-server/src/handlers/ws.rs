//! WebSocket transport for live job streams.
//!
//! The socket writer drains a [`ChannelSink`], so the core never touches the
//! socket. The first text frame from the client is the identify message.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use vigil_core::lifecycle::{ChannelSink, ClientSink, LiveRegistry, SinkFrame, bind_client};

use crate::state::AppState;

/// GET /ws/tasks
pub async fn tasks(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let registry = Arc::clone(state.ctx().tasks.live());
    ws.on_upgrade(move |socket| serve(socket, registry))
}

/// GET /ws/operations
pub async fn operations(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let registry = Arc::clone(state.ctx().operations.live());
    ws.on_upgrade(move |socket| serve(socket, registry))
}

/// GET /ws/logs
pub async fn logs(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let registry = Arc::clone(&state.ctx().logs);
    ws.on_upgrade(move |socket| serve(socket, registry))
}

async fn serve<S: Send + 'static>(socket: WebSocket, registry: Arc<LiveRegistry<S>>) {
    let (mut sender, mut receiver) = socket.split();
    let (sink, frames) = ChannelSink::new();

    let mut writer = tokio::spawn(async move {
        let mut frames = frames;
        while let Some(message) = next_message(&mut frames).await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let Some(identify) = first_text(&mut receiver).await else {
        writer.abort();
        return;
    };
    let own: Arc<dyn ClientSink> = sink.clone();
    let id = match bind_client(&*registry, &identify, sink) {
        Ok(id) => id,
        Err(e) => {
            debug!(kind = registry.kind(), error = %e, "live stream bind rejected");
            // The rejection frame and close are already queued.
            let _ = writer.await;
            return;
        }
    };
    debug!(kind = registry.kind(), id, "live stream attached");

    tokio::select! {
        // The job ended or another session replaced this one.
        _ = &mut writer => {}
        _ = drain_client(&mut receiver) => {
            registry.detach_if(id, &own);
            writer.abort();
            debug!(kind = registry.kind(), id, "live stream client went away");
        }
    }
}

async fn next_message(frames: &mut mpsc::UnboundedReceiver<SinkFrame>) -> Option<Message> {
    Some(to_message(frames.recv().await?))
}

fn to_message(frame: SinkFrame) -> Message {
    match frame {
        SinkFrame::Text(text) => Message::Text(text.into()),
        SinkFrame::Close(reason) => Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: reason.into(),
        })),
    }
}

async fn first_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = receiver.next().await {
        match msg.ok()? {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Read until the client closes; clients send nothing after identifying.
async fn drain_client(receiver: &mut SplitStream<WebSocket>) {
    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
