//! Leader-based replicated key-value store with read-your-writes clients.
//!
//! A fixed set of replicas serves one-request-per-connection TCP traffic.
//! One of them is the leader: it timestamps every write, applies it, and
//! pushes it to the other replicas before acknowledging. Any replica serves
//! reads, but only if its copy is at least as new as the watermark the client
//! sends, so a client never reads data older than what it already observed.
//!
//! - [`message`] defines the seven protocol messages and their JSON wire form.
//! - [`wire`] frames messages on a stream and performs bounded request/response calls.
//! - [`store`] is the per-replica map from key to value and timestamp.
//! - [`clock`] hands out the leader's non-decreasing timestamps.
//! - [`topology`] and [`config`] hold the static startup configuration.
//! - [`replication`] is the leader's fan-out of accepted writes.
//! - [`node`] runs a replica: accept loop, dispatch, forwarding to the leader.
//! - [`client`] is the watermark-tracking client session.
//! - [`console`] and [`cli`] back the binary's interactive client and flags.

pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod console;
pub mod message;
pub mod node;
pub mod replication;
pub mod shutdown;
pub mod store;
pub mod topology;
pub mod wire;
