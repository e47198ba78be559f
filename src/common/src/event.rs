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

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{FlowError, Result};

/// The CDC action carried inside an event row. Unknown actions never enter
/// the pipeline; they are rejected at the boundary with
/// [`FlowError::InvalidAction`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum EventAction {
    Insert,
    Update,
    Delete,
}

/// One unit of pipeline work.
///
/// The JSON wire form keeps the legacy field names (`Topic` / `Datas`)
/// for compatibility with existing consumers of the wire format. The
/// cancellation token is ambient state and never serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "Topic", default)]
    pub topic: String,
    #[serde(rename = "Datas", default)]
    pub rows: Vec<Value>,
    #[serde(skip)]
    pub ctx: CancellationToken,
}

impl Event {
    pub fn new(topic: impl Into<String>, rows: Vec<Value>, ctx: CancellationToken) -> Self {
        Self {
            topic: topic.into(),
            rows,
            ctx,
        }
    }

    /// Build a CDC event: a single row of shape
    /// `{"action": ..., "table": "schema.table", "rows": [...]}`.
    pub fn cdc(
        topic: impl Into<String>,
        action: EventAction,
        table: &str,
        rows: Vec<Value>,
        ctx: CancellationToken,
    ) -> Self {
        Self::new(
            topic,
            vec![json!({
                "action": action.to_string(),
                "table": table,
                "rows": rows,
            })],
            ctx,
        )
    }

    /// Total row weight, used as the bulk item size.
    pub fn weight(&self) -> usize {
        self.rows.len()
    }
}

/// The terminal outcome of one event's trip through the output chain.
/// Exactly one result is produced per event dispatched into the stream.
#[derive(Debug, Default)]
pub struct EventResult {
    pub error: Option<FlowError>,
}

impl EventResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn from_result(result: Result<()>) -> Self {
        Self {
            error: result.err(),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_action_round_trip() {
        for (name, action) in [
            ("insert", EventAction::Insert),
            ("update", EventAction::Update),
            ("delete", EventAction::Delete),
        ] {
            assert_eq!(EventAction::from_str(name).unwrap(), action);
            assert_eq!(action.to_string(), name);
        }
        assert!(EventAction::from_str("truncate").is_err());
    }

    #[test]
    fn test_event_wire_round_trip() {
        let event = Event::new(
            "127.0.0.1:3306",
            vec![json!({"action": "insert", "table": "db.t", "rows": [{"id": 1}]})],
            CancellationToken::new(),
        );
        let raw = serde_json::to_string(&event).unwrap();
        assert!(raw.contains("\"Topic\""));
        assert!(raw.contains("\"Datas\""));

        let back: Event = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.topic, event.topic);
        assert_eq!(back.rows, event.rows);
    }
}
