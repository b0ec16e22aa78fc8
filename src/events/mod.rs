//! Extraction notifications over tokio::sync::broadcast
//!
//! The orchestrator reports zip bombs, encrypted content, user-facing
//! messages and newly cataloged files through [`ArtifactSink`]. The
//! [`EventBus`] implementation fans them out to any number of subscribers.

use crate::archive::security_detector::SecurityViolation;
use crate::models::{ContentItem, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Maximum number of events to buffer in the channel
const EVENT_BUFFER_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Everything an `unpack` call can report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UnpackEvent {
    /// Notable item: the archive tree was abandoned as a zip bomb
    ZipBombSuspected {
        job_id: JobId,
        item_id: i64,
        root_id: i64,
        /// Catalog path of the archive being unpacked
        archive_path: String,
        violation: SecurityViolation,
    },
    /// Encrypted entries were found and skipped
    EncryptionDetected {
        item_id: i64,
        archive_path: String,
        /// Every file entry was encrypted, not just some
        fully_encrypted: bool,
        skipped_entries: usize,
    },
    UserMessage {
        level: MessageLevel,
        item_id: i64,
        message: String,
    },
    /// Files added to or updated in the catalog by one `unpack` call
    ContentAdded { item_id: i64, items: Vec<ContentItem> },
}

impl UnpackEvent {
    fn type_name(&self) -> &'static str {
        match self {
            UnpackEvent::ZipBombSuspected { .. } => "ZipBombSuspected",
            UnpackEvent::EncryptionDetected { .. } => "EncryptionDetected",
            UnpackEvent::UserMessage { .. } => "UserMessage",
            UnpackEvent::ContentAdded { .. } => "ContentAdded",
        }
    }
}

/// Destination for artifacts and notifications
pub trait ArtifactSink: Send + Sync {
    fn publish(&self, event: UnpackEvent);
}

/// Event bus with named subscribers and per-type statistics
pub struct EventBus {
    sender: broadcast::Sender<UnpackEvent>,
    /// Kept alive so sends never fail for lack of receivers
    _receiver: broadcast::Receiver<UnpackEvent>,
    subscribers: Arc<parking_lot::Mutex<HashMap<String, std::time::Instant>>>,
    stats: Arc<parking_lot::Mutex<EventStats>>,
}

#[derive(Debug, Default, Clone)]
pub struct EventStats {
    pub total_events_sent: u64,
    pub total_subscribers: u64,
    pub events_by_type: HashMap<String, u64>,
    pub dropped_events: u64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            sender,
            _receiver: receiver,
            subscribers: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            stats: Arc::new(parking_lot::Mutex::new(EventStats::default())),
        }
    }

    /// Emit an event to all subscribers; returns the receiver count
    pub fn emit(&self, event: UnpackEvent) -> usize {
        {
            let mut stats = self.stats.lock();
            stats.total_events_sent += 1;
            *stats
                .events_by_type
                .entry(event.type_name().to_string())
                .or_insert(0) += 1;
        }
        debug!(event_type = event.type_name(), "Emitting event");

        match self.sender.send(event) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to send event");
                self.stats.lock().dropped_events += 1;
                0
            }
        }
    }

    /// 订阅事件；同名订阅者视为重新订阅
    pub fn subscribe(&self, subscriber_name: &str) -> broadcast::Receiver<UnpackEvent> {
        let receiver = self.sender.subscribe();
        let mut subscribers = self.subscribers.lock();
        if subscribers
            .insert(subscriber_name.to_string(), std::time::Instant::now())
            .is_some()
        {
            debug!(subscriber_name, "Existing subscriber renewed");
        } else {
            debug!(subscriber_name, "New subscriber registered");
        }
        self.stats.lock().total_subscribers = subscribers.len() as u64;
        receiver
    }

    pub fn unsubscribe(&self, subscriber_name: &str) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.remove(subscriber_name).is_some() {
            info!(subscriber_name, "Subscriber removed");
        }
        self.stats.lock().total_subscribers = subscribers.len() as u64;
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.lock().clone()
    }

    pub fn clear_stats(&self) {
        *self.stats.lock() = EventStats::default();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactSink for EventBus {
    fn publish(&self, event: UnpackEvent) {
        self.emit(event);
    }
}
