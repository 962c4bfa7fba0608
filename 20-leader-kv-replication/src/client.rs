//! Client session with per-key freshness watermarks.
//!
//! The session remembers, for each key, the newest timestamp it has seen in
//! a GET_OK or PUT_OK. Every GET carries that watermark so a replica that has
//! not caught up answers TRY_OTHER_SERVER_OR_LATER instead of returning data
//! older than the client's own writes.
//!
//! Each request goes to a replica picked uniformly at random over a fresh
//! connection. GETs are retried on another random replica when the chosen one
//! is stale or unreachable, up to [`ClientConfig::max_attempts`]. PUTs are sent
//! once.

use std::{collections::HashMap, net::SocketAddr};

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

use crate::{
    config::ClientConfig,
    message::{Message, MessageKind, Timestamp},
    wire::{self, WireError},
};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The replica is behind this session's watermark. Not a failure of the system.
    #[error("replica {replica} is behind the watermark for '{key}'; try another replica or later")]
    Stale { key: String, replica: SocketAddr },
    #[error("replica {replica} unreachable: {source}")]
    Transport {
        replica: SocketAddr,
        #[source]
        source: WireError,
    },
    #[error("replica {replica} answered {got}, expected {expected}")]
    UnexpectedResponse {
        replica: SocketAddr,
        expected: MessageKind,
        got: MessageKind,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("no replicas configured")]
    NoReplicas,
}

impl ClientError {
    pub fn is_stale(&self) -> bool {
        matches!(self, ClientError::Stale { .. })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOutcome {
    /// `None` when the replica has never seen the key.
    pub value: Option<String>,
    pub timestamp: Option<Timestamp>,
    /// Watermark sent with the request.
    pub watermark: Option<Timestamp>,
    pub replica: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub timestamp: Timestamp,
    pub replica: SocketAddr,
}

pub struct ClientSession {
    config: ClientConfig,
    watermarks: HashMap<String, Timestamp>,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.replicas.is_empty() {
            return Err(ClientError::NoReplicas);
        }
        Ok(Self {
            config,
            watermarks: HashMap::new(),
        })
    }

    pub fn replicas(&self) -> &[SocketAddr] {
        &self.config.replicas
    }

    pub fn watermark(&self, key: &str) -> Option<Timestamp> {
        self.watermarks.get(key).copied()
    }

    pub fn watermarks(&self) -> &HashMap<String, Timestamp> {
        &self.watermarks
    }

    /// Raises the watermark for `key`, e.g. after learning of a newer write elsewhere.
    pub fn observe(&mut self, key: &str, timestamp: Timestamp) {
        let watermark = self.watermarks.entry(key.to_string()).or_insert(timestamp);
        *watermark = (*watermark).max(timestamp);
    }

    /// Reads `key` from random replicas until one is fresh enough.
    pub async fn get(&mut self, key: &str) -> Result<GetOutcome, ClientError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            let replica = self.choose_replica()?;
            match self.get_from(replica, key).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if error.is_stale() || error.is_unreachable() => {
                    debug!(%replica, attempt, %error, "GET attempt failed");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or(ClientError::NoReplicas))
    }

    /// Reads `key` from one specific replica, without retrying.
    pub async fn get_from(
        &mut self,
        replica: SocketAddr,
        key: &str,
    ) -> Result<GetOutcome, ClientError> {
        if key.is_empty() {
            return Err(ClientError::InvalidRequest("key must not be empty"));
        }

        let watermark = self.watermark(key);
        let request = Message::Get {
            key: key.to_string(),
            timestamp: watermark,
        };
        match self.send(replica, &request).await? {
            Message::GetOk { value, timestamp } => {
                if let Some(timestamp) = timestamp {
                    self.observe(key, timestamp);
                }
                Ok(GetOutcome {
                    value,
                    timestamp,
                    watermark,
                    replica,
                })
            }
            Message::TryOtherServerOrLater => Err(ClientError::Stale {
                key: key.to_string(),
                replica,
            }),
            other => Err(ClientError::UnexpectedResponse {
                replica,
                expected: MessageKind::GetOk,
                got: other.kind(),
            }),
        }
    }

    /// Writes through a random replica. Non-leaders forward to the leader.
    pub async fn put(&mut self, key: &str, value: &str) -> Result<PutOutcome, ClientError> {
        let replica = self.choose_replica()?;
        self.put_via(replica, key, value).await
    }

    pub async fn put_via(
        &mut self,
        replica: SocketAddr,
        key: &str,
        value: &str,
    ) -> Result<PutOutcome, ClientError> {
        if key.is_empty() {
            return Err(ClientError::InvalidRequest("key must not be empty"));
        }
        if value.is_empty() {
            return Err(ClientError::InvalidRequest("value must not be empty"));
        }

        let request = Message::Put {
            key: key.to_string(),
            value: value.to_string(),
        };
        match self.send(replica, &request).await? {
            Message::PutOk { timestamp } => {
                self.observe(key, timestamp);
                Ok(PutOutcome { timestamp, replica })
            }
            other => Err(ClientError::UnexpectedResponse {
                replica,
                expected: MessageKind::PutOk,
                got: other.kind(),
            }),
        }
    }

    async fn send(&self, replica: SocketAddr, request: &Message) -> Result<Message, ClientError> {
        wire::request(replica, request, &self.config.timeouts)
            .await
            .map_err(|source| ClientError::Transport { replica, source })
    }

    fn choose_replica(&self) -> Result<SocketAddr, ClientError> {
        self.config
            .replicas
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or(ClientError::NoReplicas)
    }
}
