//! Redis backend, standalone or cluster.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, RedisError};

use crate::backend::{BackendConnector, KvBackend, Topology};
use crate::command::{StoreCommand, StoreReply, ttl_millis};
use crate::config::{CacheConfig, ClusterConfig};
use crate::error::{StoreError, TransientKind};

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        let message = err.to_string();
        let kind = if err.is_timeout() {
            Some(TransientKind::Timeout)
        } else if err.is_connection_refusal() {
            Some(TransientKind::ConnectionRefused)
        } else if err.is_connection_dropped() {
            Some(TransientKind::ConnectionReset)
        } else {
            match err.code() {
                Some("MOVED" | "ASK") => Some(TransientKind::ClusterRedirect),
                Some("TRYAGAIN") => Some(TransientKind::TryAgain),
                Some("CLUSTERDOWN") => Some(TransientKind::ClusterDown),
                Some("LOADING") => Some(TransientKind::Loading),
                Some("BUSY") => Some(TransientKind::Busy),
                _ if err.is_io_error() => Some(io_kind(&message)),
                _ => None,
            }
        };

        match kind {
            Some(kind) => Self::Transient { kind, message },
            None => Self::Command(message),
        }
    }
}

fn io_kind(message: &str) -> TransientKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("lookup") || lower.contains("resolve") || lower.contains("not known") {
        TransientKind::DnsFailure
    } else {
        TransientKind::ConnectionReset
    }
}

/// Strip userinfo from a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[derive(Debug, Clone)]
enum Target {
    Standalone(String),
    Cluster(ClusterConfig),
}

/// Opens Redis connections from a [`CacheConfig`].
#[derive(Debug, Clone)]
pub struct RedisConnector {
    target: Target,
}

impl RedisConnector {
    /// Build a connector. Cluster settings take precedence over `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] when neither a URL nor cluster nodes are set.
    pub fn from_config(config: &CacheConfig) -> Result<Self, StoreError> {
        if let Some(cluster) = &config.cluster {
            if cluster.nodes.is_empty() {
                return Err(StoreError::InvalidConfig(
                    "cluster configuration has no nodes".into(),
                ));
            }
            return Ok(Self {
                target: Target::Cluster(cluster.clone()),
            });
        }

        match &config.url {
            Some(url) if !url.is_empty() => Ok(Self {
                target: Target::Standalone(url.clone()),
            }),
            _ => Err(StoreError::InvalidConfig("redis url is required".into())),
        }
    }
}

#[async_trait]
impl BackendConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn KvBackend>, StoreError> {
        let handle = match &self.target {
            Target::Standalone(url) => {
                let client = Client::open(url.as_str())?;
                let conn = client.get_multiplexed_async_connection().await?;
                Handle::Standalone(conn)
            }
            Target::Cluster(cluster) => {
                let mut builder = ClusterClient::builder(cluster.nodes.clone());
                if cluster.read_from_replicas {
                    builder = builder.read_from_replicas();
                }
                let client = builder.build()?;
                let conn = client.get_async_connection().await?;
                Handle::Cluster(conn)
            }
        };

        Ok(Arc::new(RedisBackend { handle }))
    }

    fn describe(&self) -> String {
        match &self.target {
            Target::Standalone(url) => redact_url(url),
            Target::Cluster(cluster) => {
                let nodes: Vec<String> = cluster.nodes.iter().map(|n| redact_url(n)).collect();
                format!("cluster[{}]", nodes.join(","))
            }
        }
    }
}

#[derive(Clone)]
enum Handle {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// A connected Redis handle. Cloning the inner connection is cheap and
/// commands are pipelined over the shared socket.
pub struct RedisBackend {
    handle: Handle,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("topology", &self.topology())
            .finish_non_exhaustive()
    }
}

async fn run<C: ConnectionLike + Send>(
    conn: &mut C,
    command: &StoreCommand,
) -> Result<StoreReply, StoreError> {
    let reply = match command {
        StoreCommand::Ping => {
            let pong: String = redis::cmd("PING").query_async(conn).await?;
            if pong != "PONG" {
                return Err(StoreError::UnexpectedReply {
                    command: "PING",
                    reply: pong,
                });
            }
            StoreReply::Pong
        }
        StoreCommand::Get { key } => {
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(conn).await?;
            value.map_or(StoreReply::Nil, StoreReply::Value)
        }
        StoreCommand::Set { key, value, ttl } => {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(*ttl));
            }
            let () = cmd.query_async(conn).await?;
            StoreReply::Ok
        }
        StoreCommand::Del { key } => {
            let removed: i64 = redis::cmd("DEL").arg(key).query_async(conn).await?;
            StoreReply::Integer(removed)
        }
    };

    Ok(reply)
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn execute(&self, command: &StoreCommand) -> Result<StoreReply, StoreError> {
        match self.handle.clone() {
            Handle::Standalone(mut conn) => run(&mut conn, command).await,
            Handle::Cluster(mut conn) => run(&mut conn, command).await,
        }
    }

    fn topology(&self) -> Topology {
        match self.handle {
            Handle::Standalone(_) => Topology::Standalone,
            Handle::Cluster(_) => Topology::Cluster,
        }
    }
}
