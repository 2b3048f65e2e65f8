use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::judge::VerdictStatus;

/// Events the coordinator pushes to the participants of a match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MatchEvent {
    /// One participant's submission was judged
    Progress {
        participant_id: i64,
        status: VerdictStatus,
        passed: usize,
        total: usize,
    },
    /// The match is decided; emitted at most once per match
    Completed { winner_id: i64 },
}

/// Push-notification boundary towards connected participants
///
/// Implementations must deliver at least once and preserve, per match
/// id, the order in which the coordinator hands events over. The
/// coordinator never depends on exactly-once semantics.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, match_id: i64, event: MatchEvent) -> anyhow::Result<()>;

    /// Releases per-match resources once no more events will follow
    fn forget(&self, _match_id: i64) {}
}

/// Fan-out sink backed by one broadcast channel per match
///
/// The transport layer subscribes per match and forwards events to its
/// client connections. Events for matches nobody is subscribed to are
/// dropped, which the at-least-once contract permits for participants
/// that are not connected.
pub struct BroadcastSink {
    channels: Mutex<HashMap<i64, broadcast::Sender<MatchEvent>>>,
    capacity: usize,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, match_id: i64) -> broadcast::Receiver<MatchEvent> {
        let mut channels = self.channels.lock();
        channels
            .entry(match_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn deliver(&self, match_id: i64, event: MatchEvent) -> anyhow::Result<()> {
        let sender = {
            let mut channels = self.channels.lock();
            channels
                .entry(match_id)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .clone()
        };

        if sender.send(event).is_err() {
            log::debug!("No subscribers for match {match_id}, event dropped");
        }
        Ok(())
    }

    /// Drops the channel of a finished match; subscribers drain what was
    /// already sent and then observe the channel as closed
    fn forget(&self, match_id: i64) {
        self.channels.lock().remove(&match_id);
    }
}
