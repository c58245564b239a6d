use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};

use crate::{MetadataStore, RedisConfig, StoreError};

// Replace the value only if it still equals the expected bytes.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Session metadata kept in Redis. Compare-and-set runs as a Lua script so
/// the comparison and the write are one atomic step on the server.
#[derive(Clone)]
pub struct RedisMetadataStore {
    conn: ConnectionManager,
    cas: Script,
}

impl RedisMetadataStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url()).map_err(map_redis_error)?;
        let conn = ConnectionManager::new(client).await.map_err(map_redis_error)?;
        Ok(Self {
            conn,
            cas: Script::new(COMPARE_AND_SET),
        })
    }

    /// Connect using `REDIS_ADDRESS` / `REDIS_PASSWORD`
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(&RedisConfig::from_env()).await
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::backend(err)
    }
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        match expected {
            None => {
                let written: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(new)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await
                    .map_err(map_redis_error)?;
                Ok(written.is_some())
            }
            Some(expected) => {
                let swapped: i64 = self
                    .cas
                    .key(key)
                    .arg(expected)
                    .arg(new)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(map_redis_error)?;
                Ok(swapped == 1)
            }
        }
    }
}
