//! Cross-context refresh notifications.
//!
//! Several independent participants (tabs, processes, workers) may share one
//! session. When one of them refreshes, the others drain their own queues
//! without refreshing again. The signal is advisory only.
//!
//! # Design Decisions
//! - The notifier is a trait so any pub/sub transport can stand in
//! - [`BroadcastHub`] is the in-process implementation; each named channel is
//!   one `tokio::sync::broadcast` sender
//! - A participant never receives its own publications

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Message exchanged between participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionSignal {
    #[serde(rename = "TOKEN_REFRESHED")]
    RefreshCompleted,
}

/// Publish/subscribe capability over an opaque channel.
pub trait SessionNotifier: Send + Sync + 'static {
    fn publish(&self, signal: SessionSignal);

    /// Signals published by other participants from now on.
    fn subscribe(&self) -> BoxStream<'static, SessionSignal>;
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    signal: SessionSignal,
}

const CHANNEL_CAPACITY: usize = 16;

/// Registry of named in-process channels.
#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Envelope>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `name` as a new participant.
    pub fn channel(&self, name: &str) -> HubChannel {
        let tx = self
            .channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        HubChannel {
            origin: Uuid::new_v4(),
            name: name.to_string(),
            tx,
        }
    }
}

/// One participant's handle on a hub channel.
#[derive(Debug, Clone)]
pub struct HubChannel {
    origin: Uuid,
    name: String,
    tx: broadcast::Sender<Envelope>,
}

impl SessionNotifier for HubChannel {
    fn publish(&self, signal: SessionSignal) {
        let envelope = Envelope {
            origin: self.origin,
            signal,
        };
        // No receivers just means nobody else is listening.
        if self.tx.send(envelope).is_err() {
            tracing::trace!(channel = %self.name, "No other participants on channel");
        }
    }

    fn subscribe(&self) -> BoxStream<'static, SessionSignal> {
        let origin = self.origin;
        let name = self.name.clone();
        let rx = self.tx.subscribe();

        stream::unfold(rx, move |mut rx| {
            let name = name.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) if envelope.origin == origin => continue,
                        Ok(envelope) => return Some((envelope.signal, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %name, skipped, "Notifier lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }
}
