//! Redis record store backend.
//!
//! Each record lives in a hash `DEVICE_NODE|<namespace>|<name>` with two
//! fields: `data` (the record as JSON, without its version) and `version`.
//! Versions come from a single counter so they increase across records.
//! Create and update run as Lua scripts, which makes the existence check
//! and the version compare-and-set atomic, and publish the change on
//! `DEVICE_NODE_EVENTS|<namespace>` for watchers.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{RecordList, RecordStore, WatchEvent, WatchStream};
use crate::types::{DeviceNode, NodeKey};

const RECORD_TABLE: &str = "DEVICE_NODE";
const EVENT_CHANNEL: &str = "DEVICE_NODE_EVENTS";
const VERSION_COUNTER: &str = "DEVICE_NODE_VERSION";

const FIELD_DATA: &str = "data";
const FIELD_VERSION: &str = "version";

/// KEYS: record, counter, channel. ARGV: record JSON.
/// Returns the new version, or 0 if the record exists.
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
local v = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'version', v, 'data', ARGV[1])
redis.call('PUBLISH', KEYS[3], '{"type":"ADDED","version":"' .. v .. '","object":' .. ARGV[1] .. '}')
return v
"#;

/// KEYS: record, counter, channel. ARGV: expected version, record JSON.
/// Returns {0, ""} if missing, {2, stored} on conflict, {1, new} on success.
const UPDATE_SCRIPT: &str = r#"
local cur = redis.call('HGET', KEYS[1], 'version')
if not cur then
    return {0, ''}
end
if cur ~= ARGV[1] then
    return {2, cur}
end
local v = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'version', v, 'data', ARGV[2])
redis.call('PUBLISH', KEYS[3], '{"type":"MODIFIED","version":"' .. v .. '","object":' .. ARGV[2] .. '}')
return {1, tostring(v)}
"#;

/// Connection settings for the Redis backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Redis server hostname or IP
    pub host: String,
    /// Redis server port
    pub port: u16,
    /// Database number
    pub db: u8,
}

impl RedisStoreConfig {
    /// Creates a new Redis configuration.
    pub fn new(host: impl Into<String>, port: u16, db: u8) -> Self {
        Self {
            host: host.into(),
            port,
            db,
        }
    }

    /// Returns the Redis connection URI.
    pub fn uri(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379, 0)
    }
}

/// Watch payload published by the scripts (and by external deleters).
#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "type")]
    kind: String,
    version: String,
    object: DeviceNode,
}

/// Record store backed by Redis.
pub struct RedisStore {
    client: redis::Client,
    connection: ConnectionManager,
    create_script: Script,
    update_script: Script,
}

impl RedisStore {
    /// Connects to Redis.
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let uri = config.uri();

        let client = redis::Client::open(uri.clone())
            .map_err(|e| StoreError::backend("connect", format!("{}: {}", uri, e)))?;

        let connection = client.get_connection_manager().await.map_err(|e| {
            StoreError::backend("connect", format!("Failed to create connection manager: {}", e))
        })?;

        info!("Connected to Redis: {} (db={})", config.host, config.db);

        Ok(Self {
            client,
            connection,
            create_script: Script::new(CREATE_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
        })
    }
}

fn record_key(key: &NodeKey) -> String {
    format!("{}|{}|{}", RECORD_TABLE, key.namespace, key.name)
}

fn record_pattern(namespace: &str) -> String {
    format!("{}|{}|*", RECORD_TABLE, namespace)
}

fn channel(namespace: &str) -> String {
    format!("{}|{}", EVENT_CHANNEL, namespace)
}

/// Encodes a record for storage; the version lives in its own field.
fn encode(node: &DeviceNode) -> StoreResult<String> {
    let mut unversioned = node.clone();
    unversioned.metadata.resource_version = None;
    Ok(serde_json::to_string(&unversioned)?)
}

fn decode(data: &str, version: String) -> StoreResult<DeviceNode> {
    let mut node: DeviceNode = serde_json::from_str(data)?;
    node.metadata.resource_version = Some(version);
    Ok(node)
}

fn parse_event(payload: &str) -> StoreResult<WatchEvent> {
    let event: EventPayload = serde_json::from_str(payload)?;
    let mut node = event.object;
    node.metadata.resource_version = Some(event.version);

    match event.kind.as_str() {
        "ADDED" => Ok(WatchEvent::Added(node)),
        "MODIFIED" => Ok(WatchEvent::Modified(node)),
        "DELETED" => Ok(WatchEvent::Deleted(node)),
        unknown => Err(StoreError::backend(
            "watch",
            format!("Unknown event type: {}", unknown),
        )),
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn get(&self, key: &NodeKey) -> StoreResult<Option<DeviceNode>> {
        let mut conn = self.connection.clone();
        let (data, version): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(record_key(key))
            .arg(FIELD_DATA)
            .arg(FIELD_VERSION)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend("get", format!("HMGET failed: {}", e)))?;

        match (data, version) {
            (Some(data), Some(version)) => decode(&data, version).map(Some),
            _ => Ok(None),
        }
    }

    async fn list(&self, namespace: &str) -> StoreResult<RecordList> {
        let mut conn = self.connection.clone();
        let pattern = record_pattern(namespace);

        // SCAN may report a key more than once.
        let mut keys: Vec<String> = conn
            .scan_match(&pattern)
            .await
            .map_err(|e| StoreError::backend("list", format!("SCAN failed: {}", e)))?
            .collect()
            .await;
        keys.sort();
        keys.dedup();

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let (data, version): (Option<String>, Option<String>) = redis::cmd("HMGET")
                .arg(&key)
                .arg(FIELD_DATA)
                .arg(FIELD_VERSION)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::backend("list", format!("HMGET failed: {}", e)))?;

            // Deleted between SCAN and HMGET.
            if let (Some(data), Some(version)) = (data, version) {
                items.push(decode(&data, version)?);
            }
        }

        debug!("Listed {} records in namespace {}", items.len(), namespace);
        Ok(RecordList { items })
    }

    async fn create(&self, node: &DeviceNode) -> StoreResult<DeviceNode> {
        let key = node.key();
        let mut stored = node.clone();
        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        stored.metadata.creation_timestamp = Some(Utc::now());

        let mut conn = self.connection.clone();
        let version: i64 = self
            .create_script
            .key(record_key(&key))
            .key(VERSION_COUNTER)
            .key(channel(&key.namespace))
            .arg(encode(&stored)?)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend("create", format!("create script failed: {}", e)))?;

        if version == 0 {
            return Err(StoreError::already_exists(key.to_string()));
        }

        stored.metadata.resource_version = Some(version.to_string());
        debug!(%key, version, "Created record");
        Ok(stored)
    }

    async fn update(&self, node: &DeviceNode) -> StoreResult<DeviceNode> {
        let key = node.key();
        let expected = node.metadata.resource_version.clone().unwrap_or_default();

        let mut conn = self.connection.clone();
        let (status, version): (i64, String) = self
            .update_script
            .key(record_key(&key))
            .key(VERSION_COUNTER)
            .key(channel(&key.namespace))
            .arg(&expected)
            .arg(encode(node)?)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend("update", format!("update script failed: {}", e)))?;

        match status {
            1 => {
                let mut stored = node.clone();
                stored.metadata.resource_version = Some(version);
                debug!(%key, version = ?stored.metadata.resource_version, "Updated record");
                Ok(stored)
            }
            2 => Err(StoreError::Conflict {
                key: key.to_string(),
                submitted: node.metadata.resource_version.clone(),
                stored: version,
            }),
            _ => Err(StoreError::not_found(key.to_string())),
        }
    }

    async fn watch(&self, namespace: &str) -> StoreResult<WatchStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::backend("watch", format!("pubsub connect failed: {}", e)))?;

        let channel = channel(namespace);
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| StoreError::backend("watch", format!("SUBSCRIBE failed: {}", e)))?;
        debug!("Subscribed to {}", channel);

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let event = match msg.get_payload::<String>() {
                Ok(payload) => match parse_event(&payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed watch event");
                        None
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Dropping unreadable watch payload");
                    None
                }
            };
            futures::future::ready(event)
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Device, DeviceNodeBuilder, OwnerReference};

    fn sample() -> DeviceNode {
        DeviceNodeBuilder::new()
            .with_namespace("openebs")
            .with_name("node-1")
            .with_devices(vec![Device::new("sda", "/dev/sda", 1024)])
            .with_owner_reference(OwnerReference::controller_ref("v1", "Node", "node-1", "u1"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_redis_store_config() {
        let config = RedisStoreConfig::new("127.0.0.1", 6379, 3);
        assert_eq!(config.uri(), "redis://127.0.0.1:6379/3");
    }

    #[test]
    fn test_key_layout() {
        let key = NodeKey::new("openebs", "node-1");
        assert_eq!(record_key(&key), "DEVICE_NODE|openebs|node-1");
        assert_eq!(channel("openebs"), "DEVICE_NODE_EVENTS|openebs");
        assert_eq!(record_pattern("openebs"), "DEVICE_NODE|openebs|*");
    }

    #[test]
    fn test_encode_strips_version() {
        let mut node = sample();
        node.metadata.resource_version = Some("7".to_string());

        let data = encode(&node).unwrap();
        assert!(!data.contains("resourceVersion"));

        let decoded = decode(&data, "7".to_string()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_parse_event() {
        let data = encode(&sample()).unwrap();
        let payload = format!(r#"{{"type":"MODIFIED","version":"9","object":{}}}"#, data);

        match parse_event(&payload).unwrap() {
            WatchEvent::Modified(node) => assert_eq!(node.resource_version(), Some("9")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_event_unknown_type() {
        let data = encode(&sample()).unwrap();
        let payload = format!(r#"{{"type":"BOOKMARK","version":"1","object":{}}}"#, data);
        assert!(parse_event(&payload).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a Redis server on 127.0.0.1:6379
    async fn test_list_scans_namespace() {
        let store = RedisStore::connect(RedisStoreConfig::new("127.0.0.1", 6379, 15))
            .await
            .unwrap();
        let mut conn = store.connection.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

        // More records than one SCAN batch returns.
        for i in 0..25 {
            let node = DeviceNodeBuilder::new()
                .with_namespace("openebs")
                .with_name(format!("node-{i}"))
                .build()
                .unwrap();
            store.create(&node).await.unwrap();
        }
        let other = DeviceNodeBuilder::new()
            .with_namespace("other")
            .with_name("node-0")
            .build()
            .unwrap();
        store.create(&other).await.unwrap();

        let list = store.list("openebs").await.unwrap();
        assert_eq!(list.items.len(), 25);
        assert!(list.items.iter().all(|node| node.metadata.namespace == "openebs"));
    }
}
