// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-instance guarantee through a Redis lock.
//!
//! `SET key 1 NX EX 10`, refreshed every 5 s while the process runs. Up to
//! ten acquisition attempts are made at 10 s intervals before startup
//! fails; the lock is deleted on graceful shutdown.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use riverflow_common::error::{FlowError, Result};

const LOCK_TTL_SECS: u64 = 10;
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const ACQUIRE_ATTEMPTS: u32 = 10;
const ACQUIRE_INTERVAL: Duration = Duration::from_secs(10);

pub struct DaemonLock {
    conn: redis::aio::MultiplexedConnection,
    key: String,
}

impl DaemonLock {
    pub async fn acquire(conn: redis::aio::MultiplexedConnection, key: String) -> Result<Self> {
        for attempt in 1..=ACQUIRE_ATTEMPTS {
            match try_acquire(&conn, &key).await {
                Ok(true) => {
                    tracing::info!(key, "daemon lock acquired");
                    return Ok(Self { conn, key });
                }
                Ok(false) => {
                    tracing::warn!(key, attempt, "daemon lock held by another instance");
                }
                Err(err) => {
                    tracing::warn!(key, attempt, error = %err, "daemon lock attempt failed");
                }
            }
            if attempt < ACQUIRE_ATTEMPTS {
                tokio::time::sleep(ACQUIRE_INTERVAL).await;
            }
        }
        Err(FlowError::LockContention(key))
    }

    /// Keep the lock alive while the process runs.
    pub fn spawn_refresh(&self, tracker: &TaskTracker, shutdown: CancellationToken) {
        let mut conn = self.conn.clone();
        let key = self.key.clone();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let refresh: redis::RedisResult<()> = redis::cmd("SET")
                            .arg(&key)
                            .arg(1)
                            .arg("EX")
                            .arg(LOCK_TTL_SECS)
                            .query_async(&mut conn)
                            .await;
                        if let Err(err) = refresh {
                            tracing::warn!(key, error = %err, "daemon lock refresh failed");
                        }
                    }
                }
            }
        });
    }

    pub async fn release(self) {
        let mut conn = self.conn;
        let deleted: redis::RedisResult<()> =
            redis::cmd("DEL").arg(&self.key).query_async(&mut conn).await;
        match deleted {
            Ok(()) => tracing::info!(key = %self.key, "daemon lock released"),
            Err(err) => tracing::warn!(key = %self.key, error = %err, "daemon lock release failed"),
        }
    }
}

async fn try_acquire(conn: &redis::aio::MultiplexedConnection, key: &str) -> Result<bool> {
    let mut conn = conn.clone();
    let reply: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(LOCK_TTL_SECS)
        .query_async(&mut conn)
        .await
        .map_err(FlowError::upstream)?;
    Ok(reply.is_some())
}
