//! Leader-side fan-out of accepted writes.
//!
//! Every peer has its own delivery task fed by an ordered queue. The leader
//! enqueues one REPLICATION per peer while it still holds its write gate, so
//! each peer receives writes in timestamp order, then waits for the
//! acknowledgments without the gate. Each delivery gets its own short-lived
//! connection and must finish within the round-trip limit counted from the
//! moment it was enqueued; a delivery whose deadline passed while it waited
//! behind a slow one is reported as timed out without being sent. There is no
//! retry and nothing is rolled back: the caller decides what a partial
//! fan-out means for the client.

use std::{net::SocketAddr, time::Duration};

use futures::future::join_all;
use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};

use crate::{
    config::Timeouts,
    message::{Message, MessageKind, Timestamp},
    shutdown::ShutdownToken,
    wire::{self, WireError},
};

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Transport(#[from] WireError),
    #[error("no acknowledgment within {0:?}")]
    TimedOut(Duration),
    #[error("peer answered {0} instead of REPLICATION_OK")]
    UnexpectedReply(MessageKind),
    #[error("cancelled by shutdown")]
    Cancelled,
}

/// Outcome of one fan-out round.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub acknowledged: Vec<SocketAddr>,
    pub failed: Vec<(SocketAddr, ReplicationError)>,
}

impl FanOutReport {
    /// True when every targeted peer acknowledged the write.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn targets(&self) -> usize {
        self.acknowledged.len() + self.failed.len()
    }
}

struct Delivery {
    message: Message,
    deadline: Instant,
    limit: Duration,
    ack: oneshot::Sender<Result<(), ReplicationError>>,
}

struct PeerQueue {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Owns one delivery task per peer. Dropping it closes the queues and the
/// tasks exit once their backlog is drained.
pub struct Replicator {
    queues: Vec<PeerQueue>,
    round_trip_limit: Duration,
}

impl Replicator {
    /// Spawns the delivery tasks, so it must be called inside a tokio runtime
    /// unless `targets` is empty.
    pub fn new(
        targets: Vec<SocketAddr>,
        timeouts: Timeouts,
        round_trip_limit: Duration,
        shutdown: ShutdownToken,
    ) -> Self {
        let queues = targets
            .into_iter()
            .map(|peer| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(deliver_in_order(peer, rx, timeouts, shutdown.clone()));
                PeerQueue { peer, tx }
            })
            .collect();
        Self {
            queues,
            round_trip_limit,
        }
    }

    /// Queues the write for every peer and returns a handle to await the
    /// acknowledgments. Queuing order is delivery order.
    pub fn dispatch(&self, key: &str, value: &str, timestamp: Timestamp) -> PendingFanOut {
        let message = Message::Replication {
            key: key.to_string(),
            value: value.to_string(),
            timestamp,
        };
        let deadline = Instant::now() + self.round_trip_limit;

        let acks = self
            .queues
            .iter()
            .map(|queue| {
                let (ack, rx) = oneshot::channel();
                let delivery = Delivery {
                    message: message.clone(),
                    deadline,
                    limit: self.round_trip_limit,
                    ack,
                };
                // A closed queue drops `delivery`, and the waiter sees `Cancelled`.
                let _ = queue.tx.send(delivery);
                (queue.peer, rx)
            })
            .collect();

        PendingFanOut {
            key: key.to_string(),
            timestamp,
            acks,
        }
    }

    /// [`dispatch`](Self::dispatch) followed by waiting for every peer.
    pub async fn fan_out(&self, key: &str, value: &str, timestamp: Timestamp) -> FanOutReport {
        self.dispatch(key, value, timestamp).wait().await
    }
}

/// Acknowledgments still outstanding for one dispatched write.
pub struct PendingFanOut {
    key: String,
    timestamp: Timestamp,
    acks: Vec<(SocketAddr, oneshot::Receiver<Result<(), ReplicationError>>)>,
}

impl PendingFanOut {
    /// Completes once every peer acknowledged, failed, timed out or was cancelled.
    pub async fn wait(self) -> FanOutReport {
        let PendingFanOut {
            key,
            timestamp,
            acks,
        } = self;
        let outcomes = join_all(acks.into_iter().map(|(peer, rx)| async move {
            let outcome = rx.await.unwrap_or(Err(ReplicationError::Cancelled));
            (peer, outcome)
        }))
        .await;

        let mut report = FanOutReport::default();
        for (peer, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!(peer = %peer, key = %key, timestamp, "replica acknowledged");
                    report.acknowledged.push(peer);
                }
                Err(error) => {
                    warn!(peer = %peer, key = %key, timestamp, %error, "replication failed");
                    report.failed.push((peer, error));
                }
            }
        }
        report
    }
}

async fn deliver_in_order(
    peer: SocketAddr,
    mut queue: mpsc::UnboundedReceiver<Delivery>,
    timeouts: Timeouts,
    shutdown: ShutdownToken,
) {
    while let Some(delivery) = queue.recv().await {
        let outcome = select! {
            _ = shutdown.triggered() => Err(ReplicationError::Cancelled),
            outcome = deliver(peer, &delivery, &timeouts) => outcome,
        };
        let _ = delivery.ack.send(outcome);
    }
    debug!(peer = %peer, "replication queue closed");
}

async fn deliver(
    peer: SocketAddr,
    delivery: &Delivery,
    timeouts: &Timeouts,
) -> Result<(), ReplicationError> {
    if Instant::now() >= delivery.deadline {
        return Err(ReplicationError::TimedOut(delivery.limit));
    }

    match timeout_at(delivery.deadline, wire::request(peer, &delivery.message, timeouts)).await {
        Err(_) => Err(ReplicationError::TimedOut(delivery.limit)),
        Ok(Err(error)) => Err(error.into()),
        Ok(Ok(Message::ReplicationOk)) => Ok(()),
        Ok(Ok(other)) => Err(ReplicationError::UnexpectedReply(other.kind())),
    }
}
