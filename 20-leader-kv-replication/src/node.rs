//! Replica server: accepts connections and serves the request/response protocol.
//!
//! Every accepted connection gets its own task which reads exactly one
//! request, dispatches it through [`NodeState::handle`], writes exactly one
//! response and closes. A connection that sends a malformed request is
//! dropped without a response; the accept loop keeps running.
//!
//! Writes are only originated by the leader. A non-leader forwards PUTs to
//! the leader verbatim and relays the reply, so clients cannot tell a
//! forwarded write from a direct one.

use std::{collections::BTreeMap, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use thiserror::Error;
use parking_lot::Mutex;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    clock::LeaderClock,
    config::{NodeConfig, ReplicationPolicy, Timeouts},
    message::{Message, ProtocolError, Timestamp},
    replication::Replicator,
    shutdown::Shutdown,
    store::{KvStore, Record},
    topology::Topology,
    wire::{self, WireError},
};

#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("REPLICATION sent to the leader")]
    ReplicationOnLeader,
    #[error("REPLICATION from {sender}, which is not the leader's host")]
    ReplicationFromNonLeader { sender: SocketAddr },
    #[error("forwarding to leader {leader} failed: {source}")]
    Forward {
        leader: SocketAddr,
        #[source]
        source: WireError,
    },
    #[error("write at {timestamp} reached {acknowledged} of {targets} replicas")]
    IncompleteReplication {
        timestamp: Timestamp,
        acknowledged: usize,
        targets: usize,
    },
}

pub struct ReplicaNode {
    listener: TcpListener,
    state: Arc<NodeState>,
}

impl ReplicaNode {
    pub fn new(listener: TcpListener, config: NodeConfig) -> Self {
        if let Ok(bound) = listener.local_addr() {
            if bound != config.topology.listen() {
                warn!(
                    %bound,
                    configured = %config.topology.listen(),
                    "listener address differs from the configured node address"
                );
            }
        }
        Self {
            listener,
            state: Arc::new(NodeState::new(config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ReplicaNode { listener, state } = self;
        tokio::pin!(shutdown);

        info!(
            addr = %state.topology.listen(),
            leader = %state.topology.leader(),
            is_leader = state.topology.is_leader(),
            "replica serving"
        );

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("replica shutting down");
                    state.shutdown();
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<NodeState>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<NodeState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "connection closed without a response");
        }
    });
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<NodeState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = timeout(state.timeouts.io, wire::read_message(&mut reader))
        .await
        .context("timed out waiting for a request")?
        .context("unreadable request")?;
    let Some(request) = request else {
        debug!(peer = %peer, "connection closed before sending a request");
        return Ok(());
    };

    let response = state.handle(request, Some(peer)).await?;
    wire::write_message(&mut writer, &response)
        .await
        .context("failed to send response")?;
    Ok(())
}

/// Everything one replica owns. Shared by all of its connection tasks.
pub struct NodeState {
    topology: Topology,
    timeouts: Timeouts,
    replication_timeout: Duration,
    policy: ReplicationPolicy,
    store: KvStore,
    clock: LeaderClock,
    /// Held by the leader across timestamp assignment, local apply and
    /// enqueueing to the peers, never across the wait for acknowledgments.
    write_gate: Mutex<()>,
    replicator: Replicator,
    shutdown: Shutdown,
}

impl NodeState {
    pub fn new(config: NodeConfig) -> Self {
        let shutdown = Shutdown::new();
        let replicator = Replicator::new(
            config.topology.replication_targets().to_vec(),
            config.timeouts,
            config.replication_timeout,
            shutdown.token(),
        );
        Self {
            topology: config.topology,
            timeouts: config.timeouts,
            replication_timeout: config.replication_timeout,
            policy: config.replication_policy,
            store: KvStore::new(),
            clock: LeaderClock::new(),
            write_gate: Mutex::new(()),
            replicator,
            shutdown,
        }
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub fn snapshot(&self) -> BTreeMap<String, Record> {
        self.store.snapshot()
    }

    /// Stops in-flight replication rounds. The accept loop triggers this on shutdown.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Produces the single response for `request`.
    ///
    /// `peer` is the sender's address when known; REPLICATION is only accepted
    /// from the leader's host.
    pub async fn handle(
        &self,
        request: Message,
        peer: Option<SocketAddr>,
    ) -> Result<Message, HandleError> {
        match request {
            Message::Get { key, timestamp } => Ok(self.serve_get(&key, timestamp)),
            Message::Put { key, value } => {
                if self.topology.is_leader() {
                    self.accept_write(key, value).await
                } else {
                    self.forward_to_leader(Message::Put { key, value }).await
                }
            }
            Message::Replication {
                key,
                value,
                timestamp,
            } => self.apply_replication(key, value, timestamp, peer),
            other @ (Message::GetOk { .. }
            | Message::PutOk { .. }
            | Message::ReplicationOk
            | Message::TryOtherServerOrLater) => Err(ProtocolError::UnexpectedKind {
                expected: "GET, PUT or REPLICATION",
                got: other.kind(),
            }
            .into()),
        }
    }

    /// Serves a read from the local store.
    ///
    /// A key this replica has never stored reads as absent whatever the
    /// watermark. A stored record must be at least as new as the watermark.
    fn serve_get(&self, key: &str, watermark: Option<Timestamp>) -> Message {
        let watermark = watermark.unwrap_or(0);
        let response = match self.store.get(key) {
            Some(record) if record.timestamp >= watermark => Message::GetOk {
                value: Some(record.value),
                timestamp: Some(record.timestamp),
            },
            Some(_) => Message::TryOtherServerOrLater,
            None => Message::GetOk {
                value: None,
                timestamp: None,
            },
        };
        debug!(key, watermark, response = %response.kind(), "served GET");
        response
    }

    async fn accept_write(&self, key: String, value: String) -> Result<Message, HandleError> {
        let (timestamp, pending) = {
            let _gate = self.write_gate.lock();
            let timestamp = self.clock.next();
            self.store.put(key.clone(), value.clone(), timestamp);
            (timestamp, self.replicator.dispatch(&key, &value, timestamp))
        };
        info!(key = %key, timestamp, "applied write");

        let report = pending.wait().await;
        if !report.is_complete() {
            let acknowledged = report.acknowledged.len();
            let targets = report.targets();
            match self.policy {
                ReplicationPolicy::BestEffort => {
                    warn!(
                        key = %key,
                        timestamp,
                        acknowledged,
                        targets,
                        "write acknowledged with incomplete replication"
                    );
                }
                ReplicationPolicy::RequireAll => {
                    return Err(HandleError::IncompleteReplication {
                        timestamp,
                        acknowledged,
                        targets,
                    });
                }
            }
        }

        Ok(Message::PutOk { timestamp })
    }

    async fn forward_to_leader(&self, request: Message) -> Result<Message, HandleError> {
        let leader = self.topology.leader();
        // The leader replies only after its own fan-out, so allow for it.
        let timeouts = Timeouts {
            io: self.timeouts.io + self.replication_timeout,
            ..self.timeouts
        };

        debug!(leader = %leader, "forwarding PUT to leader");
        wire::request(leader, &request, &timeouts)
            .await
            .map_err(|source| HandleError::Forward { leader, source })
    }

    fn apply_replication(
        &self,
        key: String,
        value: String,
        timestamp: Timestamp,
        peer: Option<SocketAddr>,
    ) -> Result<Message, HandleError> {
        // The leader never replicates to itself, so nothing may send it REPLICATION.
        if self.topology.is_leader() {
            return Err(HandleError::ReplicationOnLeader);
        }
        if let Some(sender) = peer {
            if sender.ip() != self.topology.leader().ip() {
                return Err(HandleError::ReplicationFromNonLeader { sender });
            }
        }

        info!(key = %key, timestamp, "applied replication");
        self.store.put(key, value, timestamp);
        Ok(Message::ReplicationOk)
    }
}
