//! Redis adapter.
//!
//! One multiplexed connection per process through `ConnectionManager`, which
//! re-establishes dropped connections with backoff on its own. Commands here
//! are the full surface the rest of the codebase is allowed to touch; every
//! key goes through [`keys`] so no two components can collide on a name.

use std::time::Duration;

use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    AsyncCommands, Client,
};

use crate::{config::RedisConfig, error::Result};

#[derive(Clone)]
pub struct Cache {
    manager: ConnectionManager,
}

impl Cache {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(3)
            .set_connection_timeout(Duration::from_millis(500));

        let client = Client::open(config.url())?;
        let manager = client
            .get_connection_manager_with_config(manager_config)
            .await?;

        Ok(Self { manager })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    /// First write wins; returns whether this call created the key.
    pub async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        Ok(conn.set_nx(key, value).await?)
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        Ok(conn.incr(key, 1i64).await?)
    }

    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.expire(key, ttl_seconds).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// The complete cache key namespace. Single writer per prefix.
pub mod keys {
    pub const CORRECT_GROUPS: &str = "correct-groups";
    pub const STATS_TOTAL: &str = "prediction:stats:total";
    pub const STATS_PROCESSED: &str = "prediction:stats:processed";

    pub fn otp_code(phone: &str) -> String {
        format!("otp:phone:{phone}")
    }

    pub fn otp_send_limit(phone: &str) -> String {
        format!("otp:send:limit:{phone}")
    }

    pub fn otp_last_request(phone: &str) -> String {
        format!("otp:last_request:{phone}")
    }

    pub fn otp_verify_attempts(phone: &str) -> String {
        format!("otp:verify:attempts:{phone}")
    }

    pub fn otp_failures_phone(phone: &str) -> String {
        format!("otp:failures:{phone}")
    }

    pub fn otp_failures_address(address: &str) -> String {
        format!("otp:ip:failures:{address}")
    }

    pub fn session_token(prefix: &str) -> String {
        format!("session:token:{prefix}")
    }

    pub fn session_refresh(prefix: &str) -> String {
        format!("session:refresh:{prefix}")
    }

    pub fn refresh_frequency(user_id: &uuid::Uuid) -> String {
        format!("refresh:frequency:{user_id}")
    }

    pub fn rate_limit(address: &str) -> String {
        format!("ratelimit:{address}")
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_namespaces_are_disjoint() {
            let phone = "+989123456789";
            let keys = [
                otp_code(phone),
                otp_send_limit(phone),
                otp_last_request(phone),
                otp_verify_attempts(phone),
                otp_failures_phone(phone),
                otp_failures_address("10.0.0.1"),
                session_token("aabbccddeeff0011"),
                session_refresh("aabbccddeeff0011"),
                refresh_frequency(&uuid::Uuid::nil()),
                rate_limit("10.0.0.1"),
            ];

            let unique: std::collections::HashSet<&String> = keys.iter().collect();
            assert_eq!(unique.len(), keys.len());
        }
    }
}
