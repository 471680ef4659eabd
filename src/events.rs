//! Per-pool event fan-out.
//!
//! Every pool has its own broadcast channel. Delivery is at-most-once: a
//! subscriber that falls behind or reconnects misses events and has to re-fetch
//! state. Events carry ids and deltas only.

use crate::entities::{encouragement::EncouragementKind, withdrawal::WithdrawalStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{trace, warn};

/// Event name: a contribution was committed
pub const CONTRIBUTION_NEW: &str = "contribution.new";
/// Event name: an encouragement was sent about the pool
pub const MESSAGE_NEW: &str = "message.new";
/// Event name: a member changed their penalty agreement
pub const PENALTY_CONSENSUS_CHANGED: &str = "penalty.consensusChanged";
/// Event name: a withdrawal was requested
pub const WITHDRAWAL_REQUESTED: &str = "withdrawal.requested";
/// Event name: a withdrawal reached a terminal status
pub const WITHDRAWAL_STATUS_CHANGED: &str = "withdrawal.statusChanged";

/// What happened, with just enough data for a subscriber to refresh its view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventPayload {
    /// See [`CONTRIBUTION_NEW`]
    ContributionNew {
        /// Ledger row id
        contribution_id: i64,
        /// Contributor
        user_id: i64,
        /// Amount added to the pool
        amount_cents: i64,
        /// Pool total after the commit
        pool_total_cents: i64,
        /// Points earned
        points_awarded: i64,
        /// Contributor's streak in this pool
        current_streak: u32,
    },
    /// See [`MESSAGE_NEW`]
    MessageNew {
        /// Encouragement id
        encouragement_id: i64,
        /// Sender
        from_user_id: i64,
        /// Recipient
        to_user_id: i64,
        /// Tone
        kind: EncouragementKind,
    },
    /// See [`PENALTY_CONSENSUS_CHANGED`]
    PenaltyConsensusChanged {
        /// Member that changed their flag
        user_id: i64,
        /// New flag value
        agreed: bool,
        /// Members that agreed
        agreed_count: u64,
        /// Members in the pool
        total_members: u64,
        /// Every member agreed
        all_agreed: bool,
    },
    /// See [`WITHDRAWAL_REQUESTED`]
    WithdrawalRequested {
        /// Withdrawal id
        withdrawal_id: i64,
        /// Requester
        user_id: i64,
        /// Requested cents
        requested_cents: i64,
        /// Penalty withheld
        penalty_cents: i64,
    },
    /// See [`WITHDRAWAL_STATUS_CHANGED`]
    WithdrawalStatusChanged {
        /// Withdrawal id
        withdrawal_id: i64,
        /// Requester
        user_id: i64,
        /// New status
        status: WithdrawalStatus,
    },
}

impl EventPayload {
    /// Canonical event name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ContributionNew { .. } => CONTRIBUTION_NEW,
            Self::MessageNew { .. } => MESSAGE_NEW,
            Self::PenaltyConsensusChanged { .. } => PENALTY_CONSENSUS_CHANGED,
            Self::WithdrawalRequested { .. } => WITHDRAWAL_REQUESTED,
            Self::WithdrawalStatusChanged { .. } => WITHDRAWAL_STATUS_CHANGED,
        }
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEvent {
    /// Channel the event was published on
    pub pool_id: i64,
    /// Position in the channel, starting at 1 and increasing by one per publish
    pub sequence: u64,
    /// When the event was published
    pub published_at: DateTime<Utc>,
    /// What happened
    pub payload: EventPayload,
}

impl PoolEvent {
    /// Canonical event name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.payload.name()
    }
}

#[derive(Debug)]
struct Channel {
    sender: broadcast::Sender<PoolEvent>,
    last_sequence: u64,
}

/// Broadcast bus with one channel per pool.
#[derive(Debug, Clone)]
pub struct EventBus {
    capacity: usize,
    channels: Arc<Mutex<HashMap<i64, Channel>>>,
}

impl EventBus {
    /// Creates a bus whose channels buffer `capacity` events per subscriber.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribes to a pool's channel, creating it if needed.
    pub async fn join(&self, pool_id: i64, subscriber_id: i64) -> Subscription {
        let mut channels = self.channels.lock().await;
        let channel = channels.entry(pool_id).or_insert_with(|| Channel {
            sender: broadcast::channel(self.capacity).0,
            last_sequence: 0,
        });
        trace!(pool_id, subscriber_id, "Subscriber joined");
        Subscription {
            pool_id,
            subscriber_id,
            receiver: channel.sender.subscribe(),
            missed: 0,
        }
    }

    /// Publishes to a pool's channel and returns the assigned sequence number.
    ///
    /// Never waits on subscribers. Publishing to a channel nobody joined still
    /// advances its sequence.
    pub async fn publish(&self, pool_id: i64, payload: EventPayload, published_at: DateTime<Utc>) -> u64 {
        let mut channels = self.channels.lock().await;
        let channel = channels.entry(pool_id).or_insert_with(|| Channel {
            sender: broadcast::channel(self.capacity).0,
            last_sequence: 0,
        });
        channel.last_sequence += 1;
        let event = PoolEvent {
            pool_id,
            sequence: channel.last_sequence,
            published_at,
            payload,
        };
        let name = event.name();
        // No receivers is not an error
        let delivered = channel.sender.send(event).unwrap_or(0);
        trace!(pool_id, sequence = channel.last_sequence, event = name, delivered, "Published");
        channel.last_sequence
    }

    /// Number of live subscribers on a pool's channel.
    pub async fn subscriber_count(&self, pool_id: i64) -> usize {
        self.channels
            .lock()
            .await
            .get(&pool_id)
            .map_or(0, |c| c.sender.receiver_count())
    }
}

/// A subscriber's handle on one pool channel.
#[derive(Debug)]
pub struct Subscription {
    pool_id: i64,
    subscriber_id: i64,
    receiver: broadcast::Receiver<PoolEvent>,
    missed: u64,
}

impl Subscription {
    /// Pool this subscription listens to
    #[must_use]
    pub const fn pool_id(&self) -> i64 {
        self.pool_id
    }

    /// Who subscribed
    #[must_use]
    pub const fn subscriber_id(&self) -> i64 {
        self.subscriber_id
    }

    /// Events dropped because this subscriber fell behind
    #[must_use]
    pub const fn missed(&self) -> u64 {
        self.missed
    }

    /// Waits for the next event. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<PoolEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    warn!(
                        pool_id = self.pool_id,
                        subscriber_id = self.subscriber_id,
                        skipped,
                        "Subscriber lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<PoolEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => self.missed += skipped,
                Err(_) => return None,
            }
        }
    }
}
