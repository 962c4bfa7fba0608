//! Startup configuration for replicas and clients.
//!
//! Everything here is fixed when a process starts; nothing is reconfigured at
//! runtime. The binary fills these structs from command-line flags, tests
//! build them directly.

use std::{net::SocketAddr, time::Duration};

use crate::topology::Topology;

/// Bounds applied to every outbound request (forwarding, replication, client calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed to establish the TCP connection.
    pub connect: Duration,
    /// Time allowed to send the request and receive the single reply.
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            io: Duration::from_secs(3),
        }
    }
}

/// What the leader does when a peer fails to acknowledge a REPLICATION.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplicationPolicy {
    /// Acknowledge the client once the leader has applied the write; log failed peers.
    #[default]
    BestEffort,
    /// Fail the client's write unless every peer acknowledged it. The leader's
    /// own copy is kept either way.
    RequireAll,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub topology: Topology,
    pub timeouts: Timeouts,
    /// Upper bound for one peer's REPLICATION round trip, including connect.
    pub replication_timeout: Duration,
    pub replication_policy: ReplicationPolicy,
}

impl NodeConfig {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            timeouts: Timeouts::default(),
            replication_timeout: Duration::from_secs(3),
            replication_policy: ReplicationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub replicas: Vec<SocketAddr>,
    pub timeouts: Timeouts,
    /// Replicas tried per GET before giving up, counting the first try.
    pub max_attempts: usize,
}

impl ClientConfig {
    pub fn new(replicas: Vec<SocketAddr>) -> Self {
        Self {
            replicas,
            // A PUT sent to a non-leader waits for forwarding and the leader's fan-out.
            timeouts: Timeouts {
                io: Duration::from_secs(10),
                ..Timeouts::default()
            },
            max_attempts: 3,
        }
    }
}
