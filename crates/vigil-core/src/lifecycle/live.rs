//! In-memory companions of running jobs.
//!
//! One [`LiveRegistry`] exists per job family (tasks, operations, log
//! streams). An entry lives exactly as long as its job: created when the job
//! starts, removed by [`LiveRegistry::close`] when it finishes. Clients come
//! and go independently; losing a client never affects the job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::model::ClientMessage;
use crate::error::{Result, VigilError};
use crate::platform::lock_unpoisoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// A connected client able to receive text frames.
pub trait ClientSink: Send + Sync {
    /// Queue a frame without blocking.
    fn send_text(&self, text: String) -> std::result::Result<(), SinkClosed>;

    /// Ask the transport to end the session.
    fn close(&self, reason: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkFrame {
    Text(String),
    Close(String),
}

/// Sink backed by an unbounded channel. The transport (or a test) drains
/// the receiving half.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkFrame>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SinkFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ClientSink for ChannelSink {
    fn send_text(&self, text: String) -> std::result::Result<(), SinkClosed> {
        self.tx.send(SinkFrame::Text(text)).map_err(|_| SinkClosed)
    }

    fn close(&self, reason: &str) {
        let _ = self.tx.send(SinkFrame::Close(reason.to_string()));
    }
}

pub struct LiveSession<S> {
    id: u64,
    rebind: Option<mpsc::UnboundedSender<()>>,
    client: Option<Arc<dyn ClientSink>>,
    pub state: S,
}

impl<S> LiveSession<S> {
    fn new(id: u64, state: S) -> Self {
        Self {
            id,
            rebind: None,
            client: None,
            state,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn bind_rebind(&mut self, tx: mpsc::UnboundedSender<()>) {
        self.rebind = Some(tx);
    }

    /// Attach `client`, replacing any previous one, and wake the job's
    /// rebind listener.
    pub fn attach(&mut self, client: Arc<dyn ClientSink>) {
        if let Some(old) = self.client.replace(client) {
            old.close("replaced by a new session");
        }
        if let Some(tx) = &self.rebind {
            let _ = tx.send(());
        }
    }

    /// Detach only if `client` is the one currently attached.
    pub fn detach_if(&mut self, client: &Arc<dyn ClientSink>) -> bool {
        let owned = self
            .client
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(client)));
        if owned {
            self.client = None;
        }
        owned
    }

    pub fn is_attached(&self) -> bool {
        self.client.is_some()
    }

    /// Deliver a pre-encoded frame. A failed send detaches the client.
    pub fn send_text(&mut self, text: String) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        match client.send_text(text) {
            Ok(()) => true,
            Err(SinkClosed) => {
                tracing::debug!(job_id = self.id, "client went away, detaching");
                self.client = None;
                false
            }
        }
    }

    pub fn close(&mut self, reason: &str) {
        if let Some(client) = self.client.take() {
            client.close(reason);
        }
        self.rebind = None;
    }
}

pub struct LiveRegistry<S> {
    kind: &'static str,
    entries: Mutex<HashMap<u64, LiveSession<S>>>,
}

impl<S: Send> LiveRegistry<S> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register a live entry for job `id` and return the receiving end of
    /// its rebind channel.
    pub fn open(&self, id: u64, state: S) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = LiveSession::new(id, state);
        session.bind_rebind(tx);
        let previous = lock_unpoisoned(&self.entries, self.kind).insert(id, session);
        if let Some(mut previous) = previous {
            previous.close("superseded");
        }
        rx
    }

    pub fn contains(&self, id: u64) -> bool {
        lock_unpoisoned(&self.entries, self.kind).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries, self.kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = lock_unpoisoned(&self.entries, self.kind).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn attach(&self, id: u64, client: Arc<dyn ClientSink>) -> Result<()> {
        let mut entries = lock_unpoisoned(&self.entries, self.kind);
        let session = entries.get_mut(&id).ok_or(VigilError::NoSuchJob(id))?;
        session.attach(client);
        tracing::debug!(kind = self.kind, job_id = id, "client attached");
        Ok(())
    }

    /// Detach `client` from `id` unless a newer session has replaced it.
    pub fn detach_if(&self, id: u64, client: &Arc<dyn ClientSink>) -> bool {
        lock_unpoisoned(&self.entries, self.kind)
            .get_mut(&id)
            .is_some_and(|session| session.detach_if(client))
    }

    pub fn is_attached(&self, id: u64) -> bool {
        lock_unpoisoned(&self.entries, self.kind)
            .get(&id)
            .is_some_and(|s| s.is_attached())
    }

    /// Fire-and-forget delivery to the attached client, if any.
    pub fn send(&self, id: u64, message: &ClientMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(kind = self.kind, job_id = id, error = %e, "cannot encode message");
                return false;
            }
        };
        match lock_unpoisoned(&self.entries, self.kind).get_mut(&id) {
            Some(session) => session.send_text(text),
            None => false,
        }
    }

    pub fn with_state<T>(&self, id: u64, f: impl FnOnce(&mut S) -> T) -> Option<T> {
        lock_unpoisoned(&self.entries, self.kind)
            .get_mut(&id)
            .map(|s| f(&mut s.state))
    }

    /// Detach the client, close the rebind channel and drop the entry.
    pub fn close(&self, id: u64, reason: &str) {
        let removed = lock_unpoisoned(&self.entries, self.kind).remove(&id);
        if let Some(mut session) = removed {
            session.close(reason);
            tracing::debug!(kind = self.kind, job_id = id, reason, "live entry closed");
        }
    }

    pub fn close_all(&self, reason: &str) {
        let drained: Vec<LiveSession<S>> = lock_unpoisoned(&self.entries, self.kind)
            .drain()
            .map(|(_, s)| s)
            .collect();
        for mut session in drained {
            session.close(reason);
        }
    }
}
