//! Live stream relay.
//!
//! ```text
//!                      Arc<Relay>
//!            streams: HashMap<"app/name", StreamEntry>
//!                          │
//!        ┌─────────────────┼─────────────────┐
//!        ▼                 ▼                 ▼
//!   [Publisher]        [Subscriber]      [Subscriber]
//!   send(packet) ──►  mpsc::Receiver    mpsc::Receiver
//! ```
//!
//! Every subscriber has its own bounded channel. A subscriber that falls behind
//! loses packets instead of slowing the publisher down. Metadata and the
//! AAC/AVC sequence headers are cached and replayed to late joiners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::av::{Packet, PacketKind};
use crate::flv;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("stream {0} already has a publisher")]
    AlreadyPublishing(String),
}

struct Sink {
    id: u64,
    tx: mpsc::Sender<Packet>,
}

#[derive(Default)]
struct StreamEntry {
    publisher: Option<u64>,
    sinks: Vec<Sink>,
    metadata: Option<Packet>,
    audio_header: Option<Packet>,
    video_header: Option<Packet>,
}

impl StreamEntry {
    fn cached(&self) -> impl Iterator<Item = &Packet> {
        [&self.metadata, &self.audio_header, &self.video_header]
            .into_iter()
            .flatten()
    }

    fn is_unused(&self) -> bool {
        self.publisher.is_none() && self.sinks.is_empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Relay {
    streams: Mutex<HashMap<String, Arc<Mutex<StreamEntry>>>>,
    sink_capacity: usize,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new(sink_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(HashMap::new()),
            // room for the replayed headers at least
            sink_capacity: sink_capacity.max(4),
            next_id: AtomicU64::new(1),
        })
    }

    fn entry(&self, key: &str) -> Arc<Mutex<StreamEntry>> {
        lock(&self.streams)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Claims `key` for a publisher. Fails if another publisher holds it.
    pub fn publish(self: &Arc<Self>, key: &str) -> Result<Publisher, RelayError> {
        let mut streams = lock(&self.streams);
        let entry = streams.entry(key.to_string()).or_default().clone();
        let mut guard = lock(&entry);
        if guard.publisher.is_some() {
            return Err(RelayError::AlreadyPublishing(key.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        guard.publisher = Some(id);
        info!(stream = key, publisher = id, subscribers = guard.sinks.len(), "publisher registered");
        drop(guard);
        drop(streams);

        Ok(Publisher {
            relay: Arc::clone(self),
            key: key.to_string(),
            id,
            entry,
        })
    }

    /// Adds a subscriber to `key`. The stream does not need a publisher yet.
    pub fn subscribe(self: &Arc<Self>, key: &str) -> Subscriber {
        let entry = self.entry(key);
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut guard = lock(&entry);
        let mut replayed = 0;
        for packet in guard.cached() {
            if tx.try_send(packet.clone()).is_ok() {
                replayed += 1;
            }
        }
        guard.sinks.push(Sink { id, tx });
        info!(stream = key, subscriber = id, replayed, "subscriber added");

        Subscriber {
            relay: Arc::clone(self),
            key: key.to_string(),
            id,
            rx,
        }
    }

    pub fn stream_count(&self) -> usize {
        lock(&self.streams).len()
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        lock(&self.streams)
            .get(key)
            .map_or(0, |entry| lock(entry).sinks.len())
    }

    pub fn has_publisher(&self, key: &str) -> bool {
        lock(&self.streams)
            .get(key)
            .is_some_and(|entry| lock(entry).publisher.is_some())
    }

    /// Drops the registry slot once nobody references the stream.
    fn release(&self, key: &str, update: impl FnOnce(&mut StreamEntry)) {
        let mut streams = lock(&self.streams);
        let Some(entry) = streams.get(key) else {
            return;
        };
        let unused = {
            let mut guard = lock(entry);
            update(&mut guard);
            guard.is_unused()
        };
        if unused {
            streams.remove(key);
            debug!(stream = key, "stream removed");
        }
    }
}

/// Publishing half of a stream. Dropping it closes every subscriber channel.
pub struct Publisher {
    relay: Arc<Relay>,
    key: String,
    id: u64,
    entry: Arc<Mutex<StreamEntry>>,
}

impl Publisher {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Caches headers and fans `packet` out to all subscribers.
    pub fn send(&self, packet: Packet) {
        let mut entry = lock(&self.entry);

        match packet.kind {
            PacketKind::Metadata => match flv::metadata_name(&packet.payload) {
                Ok(_) => entry.metadata = Some(packet.clone()),
                Err(e) => debug!(stream = %self.key, error = %e, "metadata not cached"),
            },
            PacketKind::Audio if packet.is_sequence_header() => {
                entry.audio_header = Some(packet.clone())
            }
            PacketKind::Video if packet.is_sequence_header() => {
                entry.video_header = Some(packet.clone())
            }
            _ => {}
        }

        let key = &self.key;
        entry.sinks.retain(|sink| match sink.tx.try_send(packet.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(stream = %key, subscriber = sink.id, "subscriber lagging, packet dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(stream = %key, subscriber = sink.id, "subscriber gone");
                false
            }
        });
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let id = self.id;
        self.relay.release(&self.key, |entry| {
            if entry.publisher == Some(id) {
                entry.publisher = None;
                // dropping the senders ends every subscriber's recv loop
                entry.sinks.clear();
                entry.metadata = None;
                entry.audio_header = None;
                entry.video_header = None;
            }
        });
        info!(stream = %self.key, publisher = id, "publisher left");
    }
}

pub struct Subscriber {
    relay: Arc<Relay>,
    key: String,
    id: u64,
    rx: mpsc::Receiver<Packet>,
}

impl Subscriber {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next packet, or `None` once the publisher has left.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let id = self.id;
        self.relay
            .release(&self.key, |entry| entry.sinks.retain(|sink| sink.id != id));
        debug!(stream = %self.key, subscriber = id, "subscriber removed");
    }
}
