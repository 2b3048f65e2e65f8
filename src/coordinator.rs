use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::events::{EventSink, MatchEvent};
use crate::judge::{Verdict, VerdictStatus};

/// Lifecycle of a match; `Completed` is terminal and never regresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Active,
    Completed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Snapshot of a match as stored by the calling layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub id: i64,
    pub player_one: i64,
    pub player_two: i64,
    pub status: MatchStatus,
    pub winner_id: Option<i64>,
}

/// What one resolve call meant for the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionResult {
    /// No such match, foreign participant, or nothing left to decide
    NotApplicable,
    /// The verdict was recorded but did not decide the match
    Acknowledged,
    /// This submission won; emitted exactly once per match
    MatchCompleted { winner_id: i64 },
}

struct MatchState {
    players: [i64; 2],
    status: MatchStatus,
    winner_id: Option<i64>,
}

/// Owns per-match state and decides, at most once per match, which
/// submission wins
///
/// Two fully-accepted verdicts from the two participants may arrive
/// concurrently; only the caller that observes `Active` under the
/// per-match lock commits the `Active -> Completed` transition and
/// emits the completion event. Locks are per match, so unrelated
/// matches resolve independently.
pub struct MatchCoordinator {
    matches: RwLock<HashMap<i64, Arc<Mutex<MatchState>>>>,
    sink: Arc<dyn EventSink>,
}

impl MatchCoordinator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            matches: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Registers a match with the coordinator
    ///
    /// Idempotent: an already registered match keeps its in-memory
    /// state, which may be further along than the caller's snapshot.
    pub fn register(&self, record: &MatchRecord) {
        let mut matches = self.matches.write();
        matches.entry(record.id).or_insert_with(|| {
            Arc::new(Mutex::new(MatchState {
                players: [record.player_one, record.player_two],
                status: record.status,
                winner_id: record.winner_id,
            }))
        });
    }

    /// Evicts a match whose completion has been made durable
    ///
    /// Only safe once storage reflects the completed state: a later
    /// register call rebuilds the entry from the stored record, so an
    /// evicted match that is still `active` on disk could be won again.
    pub fn forget(&self, match_id: i64) {
        self.matches.write().remove(&match_id);
        self.sink.forget(match_id);
    }

    /// Returns the coordinator's current view of a match
    pub fn snapshot(&self, match_id: i64) -> Option<MatchRecord> {
        let state = self.matches.read().get(&match_id).cloned()?;
        let state = state.lock();
        Some(MatchRecord {
            id: match_id,
            player_one: state.players[0],
            player_two: state.players[1],
            status: state.status,
            winner_id: state.winner_id,
        })
    }

    /// Applies one judged submission to its match
    ///
    /// The decision happens under the per-match lock with nothing but
    /// field checks and assignment inside; events are emitted after the
    /// commit and a committed transition is never rolled back when
    /// delivery fails.
    pub async fn resolve(
        &self,
        match_id: i64,
        participant_id: i64,
        verdict: &Verdict,
    ) -> CompletionResult {
        let state = { self.matches.read().get(&match_id).cloned() };
        let Some(state) = state else {
            return CompletionResult::NotApplicable;
        };

        let accepted = verdict.status == VerdictStatus::Accepted;

        let decision = {
            let mut state = state.lock();
            if !state.players.contains(&participant_id) {
                return CompletionResult::NotApplicable;
            }
            match state.status {
                // lost the race against the other participant; still
                // gets its own progress event below
                MatchStatus::Completed if accepted => CompletionResult::Acknowledged,
                MatchStatus::Completed => return CompletionResult::NotApplicable,
                MatchStatus::Active if accepted => {
                    state.status = MatchStatus::Completed;
                    state.winner_id = Some(participant_id);
                    CompletionResult::MatchCompleted {
                        winner_id: participant_id,
                    }
                }
                // non-accepted verdicts and pending matches only record
                // progress
                _ => CompletionResult::Acknowledged,
            }
        };

        self.emit(
            match_id,
            MatchEvent::Progress {
                participant_id,
                status: verdict.status,
                passed: verdict.passed,
                total: verdict.total,
            },
        )
        .await;

        if let CompletionResult::MatchCompleted { winner_id } = decision {
            self.emit(match_id, MatchEvent::Completed { winner_id }).await;
        }

        decision
    }

    async fn emit(&self, match_id: i64, event: MatchEvent) {
        // operator-visible channel; never surfaced as a judging error
        if let Err(e) = self.sink.deliver(match_id, event).await {
            log::error!("Event delivery for match {match_id} failed: {e}");
        }
    }
}
