use std::net::SocketAddr;

use anyhow::{Result, ensure};

/// Static view of the cluster from one replica's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    listen: SocketAddr,
    leader: SocketAddr,
    peers: Vec<SocketAddr>,
}

impl Topology {
    /// `peers` are the other replicas. Only the leader uses them, for fan-out.
    /// The node's own address and the leader's are dropped if listed, so every
    /// node can be started with the same peer list.
    pub fn new(listen: SocketAddr, leader: SocketAddr, peers: Vec<SocketAddr>) -> Result<Self> {
        for (index, peer) in peers.iter().enumerate() {
            ensure!(
                !peers[..index].contains(peer),
                "peer {peer} listed more than once"
            );
        }
        let peers = peers
            .into_iter()
            .filter(|peer| *peer != listen && *peer != leader)
            .collect();
        Ok(Self {
            listen,
            leader,
            peers,
        })
    }

    /// A lone leader with no peers.
    pub fn single(listen: SocketAddr) -> Self {
        Self {
            listen,
            leader: listen,
            peers: Vec::new(),
        }
    }

    pub fn listen(&self) -> SocketAddr {
        self.listen
    }

    pub fn leader(&self) -> SocketAddr {
        self.leader
    }

    pub fn is_leader(&self) -> bool {
        self.listen == self.leader
    }

    /// Replicas the leader pushes writes to. Empty on non-leaders.
    pub fn replication_targets(&self) -> &[SocketAddr] {
        if self.is_leader() { &self.peers } else { &[] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn leader_replicates_to_peers_except_itself() {
        let topology = Topology::new(addr(1), addr(1), vec![addr(2), addr(1), addr(3)]).unwrap();
        assert!(topology.is_leader());
        assert_eq!(topology.replication_targets(), &[addr(2), addr(3)]);
    }

    #[test]
    fn follower_has_no_replication_targets() {
        let topology = Topology::new(addr(2), addr(1), vec![addr(3)]).unwrap();
        assert!(!topology.is_leader());
        assert!(topology.replication_targets().is_empty());
        assert_eq!(topology.leader(), addr(1));
    }

    #[test]
    fn shared_peer_list_drops_self_and_leader() {
        let everyone = vec![addr(1), addr(2), addr(3)];
        let leader = Topology::new(addr(1), addr(1), everyone.clone()).unwrap();
        let follower = Topology::new(addr(2), addr(1), everyone).unwrap();
        assert_eq!(leader.replication_targets(), &[addr(2), addr(3)]);
        assert_eq!(follower.peers, vec![addr(3)]);
    }

    #[test]
    fn rejects_duplicate_peers() {
        assert!(Topology::new(addr(1), addr(1), vec![addr(2), addr(2)]).is_err());
    }

    #[test]
    fn single_node_is_its_own_leader() {
        let topology = Topology::single(addr(9));
        assert!(topology.is_leader());
        assert!(topology.replication_targets().is_empty());
    }
}
