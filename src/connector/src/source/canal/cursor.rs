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

//! Binlog cursor persistence.
//!
//! Saves are coalesced: a save is performed only when 5 s have elapsed
//! since the last one or 10 requests have accumulated, whichever comes
//! first. This bounds the Redis write rate while keeping the recovery
//! point small. Rotation saves bypass the gate so the first persisted
//! cursor after a rotation always carries the new file name.

use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use riverflow_common::error::{FlowError, Result};

const SAVE_INTERVAL: Duration = Duration::from_secs(5);
const MAX_PENDING: u32 = 10;

/// A replay position in the upstream server's binary log. The JSON form
/// keeps the legacy field names of the persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogCursor {
    #[serde(rename = "Name", alias = "name")]
    pub file: String,
    #[serde(rename = "Pos", alias = "pos")]
    pub offset: u32,
}

impl BinlogCursor {
    pub fn new(file: impl Into<String>, offset: u32) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }
}

impl std::fmt::Display for BinlogCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Coalesced save; may be a no-op.
    async fn save(&self, cursor: &BinlogCursor) -> Result<()>;

    /// Unconditional save, resetting the coalescing state.
    async fn force_save(&self, cursor: &BinlogCursor) -> Result<()>;

    async fn load(&self) -> Result<Option<BinlogCursor>>;
}

/// Decides whether a save request goes through.
#[derive(Debug, Default)]
pub(crate) struct SaveGate {
    last_save: Option<Instant>,
    pending: u32,
}

impl SaveGate {
    pub(crate) fn admit(&mut self, now: Instant) -> bool {
        self.pending += 1;
        let due = match self.last_save {
            None => true,
            Some(at) => now.duration_since(at) > SAVE_INTERVAL,
        };
        if due || self.pending > MAX_PENDING {
            self.reset(now);
            return true;
        }
        false
    }

    pub(crate) fn reset(&mut self, now: Instant) {
        self.pending = 0;
        self.last_save = Some(now);
    }
}

pub struct RedisCursorStore {
    conn: redis::aio::MultiplexedConnection,
    key: String,
    gate: parking_lot::Mutex<SaveGate>,
}

impl RedisCursorStore {
    pub fn new(conn: redis::aio::MultiplexedConnection, prefix: &str, id: &str) -> Self {
        Self {
            conn,
            key: format!("{prefix}:binlog_position:{id}"),
            gate: parking_lot::Mutex::new(SaveGate::default()),
        }
    }

    async fn write(&self, cursor: &BinlogCursor) -> Result<()> {
        let raw = serde_json::to_string(cursor).map_err(FlowError::upstream)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, raw)
            .await
            .map_err(|e| FlowError::upstream(anyhow!("save binlog position in redis: {e}")))?;
        tracing::info!(key = %self.key, cursor = %cursor, "saved binlog position");
        Ok(())
    }
}

#[async_trait]
impl CursorStore for RedisCursorStore {
    async fn save(&self, cursor: &BinlogCursor) -> Result<()> {
        if !self.gate.lock().admit(Instant::now()) {
            return Ok(());
        }
        self.write(cursor).await
    }

    async fn force_save(&self, cursor: &BinlogCursor) -> Result<()> {
        self.gate.lock().reset(Instant::now());
        self.write(cursor).await
    }

    async fn load(&self) -> Result<Option<BinlogCursor>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&self.key)
            .await
            .map_err(|e| FlowError::upstream(anyhow!("get binlog position from redis: {e}")))?;
        match raw {
            None => {
                tracing::warn!(key = %self.key, "no binlog position found, starting from scratch");
                Ok(None)
            }
            Some(raw) => {
                let cursor = serde_json::from_str(&raw).map_err(FlowError::upstream)?;
                Ok(Some(cursor))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_cursor_wire_form() {
        let cursor = BinlogCursor::new("mysql-bin.000007", 1234);
        let raw = serde_json::to_string(&cursor).unwrap();
        assert_eq!(raw, r#"{"Name":"mysql-bin.000007","Pos":1234}"#);
        let back: BinlogCursor = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, cursor);
        // Operator requests use lower-case field names.
        let lower: BinlogCursor =
            serde_json::from_str(r#"{"name":"mysql-bin.000007","pos":1234}"#).unwrap();
        assert_eq!(lower, cursor);
    }

    #[test]
    fn test_save_gate_first_save_goes_through() {
        let mut gate = SaveGate::default();
        assert!(gate.admit(Instant::now()));
    }

    #[test]
    fn test_save_gate_coalesces_within_interval() {
        let mut gate = SaveGate::default();
        let t0 = Instant::now();
        assert!(gate.admit(t0));
        for i in 1..=MAX_PENDING {
            assert!(
                !gate.admit(t0 + Duration::from_millis(i as u64)),
                "request {i} should be coalesced"
            );
        }
        // The 11th pending request forces a save.
        assert!(gate.admit(t0 + Duration::from_millis(20)));
    }

    #[test]
    fn test_save_gate_interval_elapsed() {
        let mut gate = SaveGate::default();
        let t0 = Instant::now();
        assert!(gate.admit(t0));
        assert!(!gate.admit(t0 + Duration::from_secs(1)));
        assert!(gate.admit(t0 + Duration::from_secs(6)));
    }
}
