// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote [`SharedStore`] backend over Redis.
//!
//! Every command runs with an explicit per-command timeout and bounded
//! retry; the multi-step atomics (lock acquire/release, due-timer pop) are
//! Lua scripts so each is a single round-trip.  TLS is inferred from the
//! `rediss://` scheme.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;

use super::{GeoMatch, SharedStore, StoreError};
use crate::config::DispatchConfig;

const LOCK_ACQUIRE_SRC: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  return 1
elseif current == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
else
  return 0
end
"#;

const LOCK_RELEASE_SRC: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const ZPOP_DUE_SRC: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local out = {}
local prefix = ARGV[2]
for _, member in ipairs(due) do
  if string.sub(member, 1, string.len(prefix)) == prefix then
    redis.call('ZREM', KEYS[1], member)
    table.insert(out, member)
  end
end
return out
"#;

/// Remote shared store.
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    command_timeout: Duration,
    max_retries: u32,
    lock_acquire: redis::Script,
    lock_release: redis::Script,
    zpop_due: redis::Script,
}

impl RedisStore {
    /// Connect and verify reachability with a PING.
    pub async fn connect(url: &str, config: &DispatchConfig) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let command_timeout = config.store_command_timeout();

        let mut manager = tokio::time::timeout(command_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let pong: String = tokio::time::timeout(
            command_timeout,
            redis::cmd("PING").query_async(&mut manager),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if pong != "PONG" {
            return Err(StoreError::Unavailable(format!("unexpected PING reply: {pong}")));
        }

        Ok(Self {
            client,
            manager,
            command_timeout,
            max_retries: config.store_max_retries,
            lock_acquire: redis::Script::new(LOCK_ACQUIRE_SRC),
            lock_release: redis::Script::new(LOCK_RELEASE_SRC),
            zpop_due: redis::Script::new(ZPOP_DUE_SRC),
        })
    }

    /// Run a command with per-call timeout and bounded retry.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut last = StoreError::Timeout;
        for attempt in 0..=self.max_retries {
            match tokio::time::timeout(self.command_timeout, op(self.manager.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last = StoreError::Unavailable(e.to_string()),
                Err(_) => last = StoreError::Timeout,
            }
            if attempt < self.max_retries {
                // Linear backoff with jitter so retry storms decorrelate.
                let jitter = rand::random::<u64>() % 25;
                tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1) + jitter))
                    .await;
            }
        }
        Err(last)
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis() as u64);
            }
            cmd.query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let reply: Option<String> = self
            .run(|mut conn| async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("INCR").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let set: i64 = self
            .run(|mut conn| async move {
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(set == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let count: i64 = self
            .run(|mut conn| async move {
                redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            let mut pipe = redis::pipe();
            pipe.atomic();
            let mut hset = redis::cmd("HSET");
            hset.arg(key);
            for (field, value) in fields {
                hset.arg(field).arg(value);
            }
            pipe.add_command(hset).ignore();
            if let Some(ttl) = ttl {
                pipe.cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64).ignore();
            }
            pipe.query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        self.run(|mut conn| async move {
            let mut cmd = redis::cmd("SADD");
            cmd.arg(key);
            for member in members {
                cmd.arg(member);
            }
            cmd.query_async(&mut conn).await
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("SREM").arg(key).arg(member).query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let found: i64 = self
            .run(|mut conn| async move {
                redis::cmd("SISMEMBER").arg(key).arg(member).query_async(&mut conn).await
            })
            .await?;
        Ok(found == 1)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("ZADD")
                .arg(key)
                .arg(score)
                .arg(member)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("ZREM").arg(key).arg(member).query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn zpop_due(
        &self,
        key: &str,
        prefix: &str,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError> {
        self.run(|mut conn| async move {
            self.zpop_due
                .key(key)
                .arg(max_score)
                .arg(prefix)
                .invoke_async(&mut conn)
                .await
        })
        .await
        .map_err(|e| match e {
            StoreError::Unavailable(detail) => StoreError::Script(detail),
            other => other,
        })
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("RPUSH").arg(key).arg(value).query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("LPOP").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        // BLPOP would stall the multiplexed manager; use a dedicated
        // connection per call.
        let mut conn = tokio::time::timeout(
            self.command_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let reply: Option<(String, String)> = tokio::time::timeout(
            timeout + self.command_timeout,
            redis::cmd("BLPOP")
                .arg(key)
                .arg(timeout.as_secs_f64())
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(reply.map(|(_, value)| value))
    }

    async fn geo_add(
        &self,
        key: &str,
        member: &str,
        lng: f64,
        lat: f64,
    ) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("GEOADD")
                .arg(key)
                .arg(lng)
                .arg(lat)
                .arg(member)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn geo_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        // A geo index is a zset underneath.
        self.run(|mut conn| async move {
            redis::cmd("ZREM").arg(key).arg(member).query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn geo_radius(
        &self,
        key: &str,
        lng: f64,
        lat: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<GeoMatch>, StoreError> {
        let rows: Vec<(String, f64)> = self
            .run(|mut conn| async move {
                redis::cmd("GEOSEARCH")
                    .arg(key)
                    .arg("FROMLONLAT")
                    .arg(lng)
                    .arg(lat)
                    .arg("BYRADIUS")
                    .arg(radius_km)
                    .arg("km")
                    .arg("ASC")
                    .arg("COUNT")
                    .arg(limit)
                    .arg("WITHDIST")
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|(member, distance_km)| GeoMatch { member, distance_km })
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(err = %e, "undecodable pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn lock_acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let acquired: i64 = self
            .run(|mut conn| async move {
                self.lock_acquire
                    .key(key)
                    .arg(holder)
                    .arg(ttl.as_millis() as u64)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(acquired == 1)
    }

    async fn lock_release(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        let released: i64 = self
            .run(|mut conn| async move {
                self.lock_release.key(key).arg(holder).invoke_async(&mut conn).await
            })
            .await?;
        Ok(released == 1)
    }
}
