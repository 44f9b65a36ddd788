// Redis-backed CounterStore.
//
// Single-node mode uses a ConnectionManager (which reconnects on its own),
// cluster mode a ClusterConnection. `auto` picks cluster when more than one
// address is configured; with a single address it asks the node itself
// (`CLUSTER INFO`), so one seed address of a cluster still gets a cluster
// connection.
//
// INCR and the first-write PEXPIRE run inside one Lua script, so a counter
// can never be created without its TTL.

use crate::core::moderation::{CounterError, CounterStore, RateLimitKey};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{ErrorKind, RedisError, RedisResult, Script};
use serde::Deserialize;
use std::time::Duration;

const INCR_WITH_TTL: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

const CLUSTER_DISABLED: &str = "cluster support disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedisMode {
    #[default]
    Auto,
    Single,
    Cluster,
}

/// How to connect, decided from the mode and the address count alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topology {
    Single,
    Cluster,
    /// One address in auto mode, the node has to tell
    AskNode,
}

#[derive(Clone)]
enum Connection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

pub struct RedisCounterStore {
    connection: Connection,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to the nodes in a comma-separated address list.
    pub async fn connect(addrs: &str, mode: RedisMode) -> RedisResult<Self> {
        let urls = node_urls(addrs);

        let cluster = match topology(mode, urls.len())? {
            Topology::Single => false,
            Topology::Cluster => true,
            Topology::AskNode => {
                let client = redis::Client::open(urls[0].as_str())?;
                let mut conn = client.get_multiplexed_async_connection().await?;
                let reply: RedisResult<String> =
                    redis::cmd("CLUSTER").arg("INFO").query_async(&mut conn).await;
                cluster_enabled(reply)?
            }
        };

        let connection = if cluster {
            let client = ClusterClient::new(urls.clone())?;
            Connection::Cluster(client.get_async_connection().await?)
        } else {
            let client = redis::Client::open(urls[0].as_str())?;
            Connection::Single(ConnectionManager::new(client).await?)
        };

        tracing::info!(nodes = urls.len(), cluster, "Connected to redis");

        Ok(Self {
            connection,
            script: Script::new(INCR_WITH_TTL),
        })
    }
}

fn topology(mode: RedisMode, nodes: usize) -> RedisResult<Topology> {
    match (mode, nodes) {
        (_, 0) => Err(RedisError::from((
            ErrorKind::InvalidClientConfig,
            "no redis address configured",
        ))),
        (RedisMode::Single, 1) => Ok(Topology::Single),
        (RedisMode::Single, _) => Err(RedisError::from((
            ErrorKind::InvalidClientConfig,
            "single mode takes exactly one address",
        ))),
        (RedisMode::Auto, 1) => Ok(Topology::AskNode),
        _ => Ok(Topology::Cluster),
    }
}

/// Read the node's answer to `CLUSTER INFO`. Any reply means cluster mode is
/// on; the "cluster support disabled" error means a plain node.
fn cluster_enabled(reply: RedisResult<String>) -> RedisResult<bool> {
    match reply {
        Ok(_) => Ok(true),
        Err(e) if e.to_string().contains(CLUSTER_DISABLED) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Split `"a:6379, b:6379"` into connection URLs, adding the scheme when
/// it is missing.
pub fn node_urls(addrs: &str) -> Vec<String> {
    addrs
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| {
            if a.starts_with("redis://") || a.starts_with("rediss://") {
                a.to_string()
            } else {
                format!("redis://{}", a)
            }
        })
        .collect()
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_with_window(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<i64, CounterError> {
        let ttl_ms = window.as_millis().max(1) as u64;
        let mut invocation = self.script.key(key.as_str());
        invocation.arg(ttl_ms);

        // Both handles are cheap clones of a multiplexed connection.
        let result: RedisResult<i64> = match &self.connection {
            Connection::Single(conn) => {
                let mut conn = conn.clone();
                invocation.invoke_async(&mut conn).await
            }
            Connection::Cluster(conn) => {
                let mut conn = conn.clone();
                invocation.invoke_async(&mut conn).await
            }
        };

        result.map_err(|e| CounterError::StoreUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_urls_from_comma_list() {
        assert_eq!(
            node_urls("10.0.0.1:7000, 10.0.0.2:7000,,redis://cache:6379"),
            vec![
                "redis://10.0.0.1:7000".to_string(),
                "redis://10.0.0.2:7000".to_string(),
                "redis://cache:6379".to_string(),
            ]
        );
        assert!(node_urls(" , ").is_empty());
    }

    #[test]
    fn test_topology_resolution() {
        assert_eq!(topology(RedisMode::Auto, 1).unwrap(), Topology::AskNode);
        assert_eq!(topology(RedisMode::Auto, 3).unwrap(), Topology::Cluster);
        assert_eq!(topology(RedisMode::Cluster, 1).unwrap(), Topology::Cluster);
        assert_eq!(topology(RedisMode::Single, 1).unwrap(), Topology::Single);

        for (mode, nodes) in [(RedisMode::Single, 2), (RedisMode::Auto, 0), (RedisMode::Cluster, 0)] {
            let err = topology(mode, nodes).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);
        }
    }

    #[test]
    fn test_cluster_info_reply_decides_single_address() {
        let info = "cluster_state:ok\r\ncluster_slots_assigned:16384\r\n".to_string();
        assert!(cluster_enabled(Ok(info)).unwrap());

        let disabled = RedisError::from((
            ErrorKind::ResponseError,
            "ERR This instance has cluster support disabled",
        ));
        assert!(!cluster_enabled(Err(disabled)).unwrap());

        let refused = RedisError::from((ErrorKind::IoError, "connection refused"));
        assert_eq!(
            cluster_enabled(Err(refused)).unwrap_err().kind(),
            ErrorKind::IoError
        );
    }

    #[tokio::test]
    async fn test_empty_address_list_is_rejected() {
        let err = RedisCounterStore::connect("", RedisMode::Auto)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);

        let err = RedisCounterStore::connect("a:1,b:2", RedisMode::Single)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);
    }

    async fn live_store() -> (RedisCounterStore, redis::aio::MultiplexedConnection) {
        let url = std::env::var("REDIS_TEST_URL").expect("REDIS_TEST_URL not set");
        let store = RedisCounterStore::connect(&url, RedisMode::Auto)
            .await
            .unwrap();
        let client = redis::Client::open(node_urls(&url)[0].as_str()).unwrap();
        let conn = client.get_multiplexed_async_connection().await.unwrap();
        (store, conn)
    }

    async fn pttl(conn: &mut redis::aio::MultiplexedConnection, key: &RateLimitKey) -> i64 {
        redis::cmd("PTTL")
            .arg(key.as_str())
            .query_async(conn)
            .await
            .unwrap()
    }

    async fn del(conn: &mut redis::aio::MultiplexedConnection, key: &RateLimitKey) {
        let _: () = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(conn)
            .await
            .unwrap();
    }

    /// Needs a running single-node redis:
    /// `REDIS_TEST_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_second_increment_keeps_first_expiry() {
        let (store, mut conn) = live_store().await;
        let key = RateLimitKey::for_user("flagged-test", chrono::Utc::now().timestamp_millis());
        let window = Duration::from_secs(60);

        assert_eq!(store.increment_with_window(&key, window).await.unwrap(), 1);
        let first = pttl(&mut conn, &key).await;
        assert!(first > 0 && first <= 60_000);

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(store.increment_with_window(&key, window).await.unwrap(), 2);
        let second = pttl(&mut conn, &key).await;
        assert!(
            second <= first - 1_000,
            "expiry was refreshed: {} then {}",
            first,
            second
        );

        del(&mut conn, &key).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_existing_counter_ttl_untouched() {
        let (store, mut conn) = live_store().await;
        let key = RateLimitKey::for_user("flagged-test", chrono::Utc::now().timestamp_millis() + 1);

        let _: () = redis::cmd("SET")
            .arg(key.as_str())
            .arg(5)
            .arg("PX")
            .arg(30_000)
            .query_async(&mut conn)
            .await
            .unwrap();

        let count = store
            .increment_with_window(&key, Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(count, 6);

        let ttl = pttl(&mut conn, &key).await;
        assert!(ttl > 0 && ttl <= 30_000);

        del(&mut conn, &key).await;
    }
}
