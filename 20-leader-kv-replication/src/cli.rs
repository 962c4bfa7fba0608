use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::{
    config::{ClientConfig, NodeConfig, ReplicationPolicy, Timeouts},
    topology::Topology,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one replica of the store.
    Node(NodeArgs),
    /// Open an interactive client session against the replicas.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Socket address this replica listens on.
    #[arg(long, default_value = "127.0.0.1:10097")]
    pub listen: SocketAddr,

    /// Address of the leader. Pass this replica's own address to make it the leader.
    #[arg(long, default_value = "127.0.0.1:10099")]
    pub leader: SocketAddr,

    /// Comma-separated replica addresses the leader pushes writes to.
    /// Own and leader addresses are ignored, so all nodes can share one list.
    #[arg(long, value_delimiter = ',')]
    pub peer: Vec<SocketAddr>,

    /// Milliseconds allowed to open an outbound connection.
    #[arg(long, default_value_t = 1000)]
    pub connect_timeout_ms: u64,

    /// Milliseconds allowed for one request/response exchange.
    #[arg(long, default_value_t = 3000)]
    pub io_timeout_ms: u64,

    /// Milliseconds the leader waits for each replica to acknowledge a write.
    #[arg(long, default_value_t = 3000)]
    pub replication_timeout_ms: u64,

    /// Fail client writes that did not reach every replica.
    #[arg(long)]
    pub require_all_replicas: bool,
}

impl NodeArgs {
    pub fn into_config(self) -> Result<NodeConfig> {
        let topology = Topology::new(self.listen, self.leader, self.peer)?;
        let mut config = NodeConfig::new(topology);
        config.timeouts = Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            io: Duration::from_millis(self.io_timeout_ms),
        };
        config.replication_timeout = Duration::from_millis(self.replication_timeout_ms);
        if self.require_all_replicas {
            config.replication_policy = ReplicationPolicy::RequireAll;
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Comma-separated addresses of every replica.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "127.0.0.1:10097,127.0.0.1:10098,127.0.0.1:10099"
    )]
    pub replica: Vec<SocketAddr>,

    /// Replicas tried per GET before reporting staleness or failure.
    #[arg(long, default_value_t = 3)]
    pub max_attempts: usize,

    /// Milliseconds allowed to open a connection to a replica.
    #[arg(long, default_value_t = 1000)]
    pub connect_timeout_ms: u64,

    /// Milliseconds allowed for one request/response exchange.
    #[arg(long, default_value_t = 10000)]
    pub io_timeout_ms: u64,
}

impl ClientArgs {
    pub fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig::new(self.replica);
        config.max_attempts = self.max_attempts;
        config.timeouts = Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            io: Duration::from_millis(self.io_timeout_ms),
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_flags_build_a_leader_config() {
        let cli = Cli::try_parse_from([
            "leader_kv_replication",
            "node",
            "--listen",
            "127.0.0.1:7001",
            "--leader",
            "127.0.0.1:7001",
            "--peer",
            "127.0.0.1:7001,127.0.0.1:7002,127.0.0.1:7003",
            "--replication-timeout-ms",
            "250",
            "--require-all-replicas",
        ])
        .unwrap();
        let Command::Node(args) = cli.command else {
            panic!("expected node subcommand");
        };

        let config = args.into_config().unwrap();
        assert!(config.topology.is_leader());
        assert_eq!(config.topology.replication_targets().len(), 2);
        assert_eq!(config.replication_timeout, Duration::from_millis(250));
        assert_eq!(config.replication_policy, ReplicationPolicy::RequireAll);
    }

    #[test]
    fn client_defaults_to_three_local_replicas() {
        let cli = Cli::try_parse_from(["leader_kv_replication", "client"]).unwrap();
        let Command::Client(args) = cli.command else {
            panic!("expected client subcommand");
        };

        let config = args.into_config();
        assert_eq!(config.replicas.len(), 3);
        assert_eq!(config.max_attempts, 3);
    }
}
