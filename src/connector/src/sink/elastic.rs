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

//! Bulk-indexed Elasticsearch sink.
//!
//! Batches are grouped first by resolved index, then by action. The index
//! is resolved by matching a row's `type` field against the configured
//! `index_table_mapping` regexes, first match wins, with the result cached
//! per type. Insert, update and delete map onto bulk create, update and
//! delete; an unknown action fails the whole batch. Delivery is
//! at-least-once: the upsert-style operations make replays idempotent.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use elasticsearch::auth::Credentials;
use elasticsearch::http::request::JsonBody;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::{BulkParts, Elasticsearch};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use riverflow_common::buffer::{BulkBuffer, BulkItem};
use riverflow_common::docpath;
use riverflow_common::error::{FlowError, Result};
use riverflow_common::event::{Event, EventAction};

use super::{default_bulk_flush_sec, default_bulk_size, SinkContext};

pub const ELASTIC_SINK: &str = "elasticsearch";

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticConfig {
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    /// Index name to the regexes of `type` values routed into it.
    #[serde(default)]
    pub index_table_mapping: HashMap<String, Vec<String>>,
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default = "default_bulk_flush_sec")]
    pub bulk_flush_sec: u64,
}

pub struct ElasticSink {
    buffer: Arc<BulkBuffer<Event>>,
}

impl ElasticSink {
    pub fn new(cfg: ElasticConfig, ctx: &SinkContext) -> Result<Self> {
        let url = Url::parse(&cfg.url).map_err(FlowError::config)?;
        let mut builder = TransportBuilder::new(SingleNodeConnectionPool::new(url));
        if !cfg.user.is_empty() && !cfg.pass.is_empty() {
            builder = builder.auth(Credentials::Basic(cfg.user.clone(), cfg.pass.clone()));
        }
        let transport = builder.build().map_err(FlowError::config)?;
        let client = Elasticsearch::new(transport);
        let resolver = IndexResolver::new(&cfg.index_table_mapping)?;

        let (buffer, batches) =
            BulkBuffer::new(cfg.bulk_size, Duration::from_secs(cfg.bulk_flush_sec));
        let buffer = Arc::new(buffer);
        ctx.tracker.spawn(run_flusher(
            client,
            resolver,
            batches,
            buffer.clone(),
            ctx.clone(),
        ));
        Ok(Self { buffer })
    }

    pub async fn on_event(&self, event: &Event) -> Result<()> {
        self.buffer
            .add(BulkItem {
                data: event.clone(),
                size: event.weight(),
                key: event.topic.clone(),
            })
            .await;
        Ok(())
    }
}

async fn run_flusher(
    client: Elasticsearch,
    mut resolver: IndexResolver,
    mut batches: mpsc::Receiver<Vec<BulkItem<Event>>>,
    buffer: Arc<BulkBuffer<Event>>,
    ctx: SinkContext,
) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(batch) => process(&client, &mut resolver, batch, &ctx).await,
                None => return,
            }
        }
    }
    // Shutdown: trigger the final flush and drain until the channel closes.
    buffer.stop();
    tracing::info!("elasticsearch sink flushing remaining data");
    while let Some(batch) = batches.recv().await {
        process(&client, &mut resolver, batch, &ctx).await;
    }
}

async fn process(
    client: &Elasticsearch,
    resolver: &mut IndexResolver,
    batch: Vec<BulkItem<Event>>,
    ctx: &SinkContext,
) {
    if let Err(err) = write_batch(client, resolver, batch).await {
        tracing::error!(error = %err, "failed to write batch to elasticsearch");
        let _ = ctx.errors.send(err);
    }
}

async fn write_batch(
    client: &Elasticsearch,
    resolver: &mut IndexResolver,
    batch: Vec<BulkItem<Event>>,
) -> Result<()> {
    let groups = group_batch(batch, resolver)?;
    for (index, actions) in groups {
        for (action, messages) in actions {
            write_group(client, &index, action, &messages).await?;
            tracing::info!(
                index,
                action = %action,
                count = messages.len(),
                "bulk request executed"
            );
        }
    }
    Ok(())
}

type ActionGroups = HashMap<String, HashMap<EventAction, Vec<Value>>>;

fn group_batch(batch: Vec<BulkItem<Event>>, resolver: &mut IndexResolver) -> Result<ActionGroups> {
    let mut groups: ActionGroups = HashMap::new();
    for item in batch {
        for row in item.data.rows {
            let action = row
                .get("action")
                .and_then(Value::as_str)
                .ok_or_else(|| FlowError::sink(ELASTIC_SINK, anyhow!("row missing action field")))?;
            let action = EventAction::from_str(action)
                .map_err(|_| FlowError::InvalidAction(action.to_string()))?;
            let kind = row
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| FlowError::sink(ELASTIC_SINK, anyhow!("row missing type field")))?;
            let messages = match row.get("messages") {
                Some(Value::Array(items)) => items.iter().filter(|m| m.is_object()).cloned(),
                _ => {
                    return Err(FlowError::sink(
                        ELASTIC_SINK,
                        anyhow!("row messages must be an array of documents"),
                    ))
                }
            };
            let index = resolver.resolve(kind)?;
            groups
                .entry(index)
                .or_default()
                .entry(action)
                .or_default()
                .extend(messages);
        }
    }
    Ok(groups)
}

async fn write_group(
    client: &Elasticsearch,
    index: &str,
    action: EventAction,
    messages: &[Value],
) -> Result<()> {
    let body = bulk_body(index, action, messages)?;
    if body.is_empty() {
        return Ok(());
    }
    let response = client
        .bulk(BulkParts::Index(index))
        .body(body)
        .send()
        .await
        .map_err(|e| FlowError::sink(ELASTIC_SINK, e))?;
    let status = response.status_code();
    let reply: Value = response
        .json()
        .await
        .map_err(|e| FlowError::sink(ELASTIC_SINK, e))?;
    if !status.is_success() || reply.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Err(FlowError::sink(
            ELASTIC_SINK,
            anyhow!("bulk request to {index} failed with status {status}: {reply}"),
        ));
    }
    Ok(())
}

fn bulk_body(
    index: &str,
    action: EventAction,
    messages: &[Value],
) -> Result<Vec<JsonBody<Value>>> {
    let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(messages.len() * 2);
    for message in messages {
        let id = message.get("id").ok_or_else(|| {
            FlowError::sink(ELASTIC_SINK, anyhow!("{index} document has no id field"))
        })?;
        let id = docpath::display_value(id);
        match action {
            EventAction::Insert => {
                body.push(json!({"create": {"_id": id}}).into());
                body.push(message.clone().into());
            }
            EventAction::Update => {
                body.push(json!({"update": {"_id": id}}).into());
                body.push(json!({"doc": message}).into());
            }
            EventAction::Delete => {
                body.push(json!({"delete": {"_id": id}}).into());
            }
        }
    }
    Ok(body)
}

struct IndexResolver {
    patterns: Vec<(String, Vec<Regex>)>,
    cache: HashMap<String, String>,
}

impl IndexResolver {
    fn new(mapping: &HashMap<String, Vec<String>>) -> Result<Self> {
        let mut patterns = Vec::with_capacity(mapping.len());
        let mut indexes: Vec<_> = mapping.keys().collect();
        indexes.sort();
        for index in indexes {
            let regexes = mapping[index]
                .iter()
                .map(|raw| Regex::new(raw).map_err(FlowError::config))
                .collect::<Result<Vec<_>>>()?;
            patterns.push((index.clone(), regexes));
        }
        Ok(Self {
            patterns,
            cache: HashMap::new(),
        })
    }

    fn resolve(&mut self, kind: &str) -> Result<String> {
        if let Some(hit) = self.cache.get(kind) {
            return Ok(hit.clone());
        }
        for (index, regexes) in &self.patterns {
            if regexes.iter().any(|r| r.is_match(kind)) {
                self.cache.insert(kind.to_string(), index.clone());
                return Ok(index.clone());
            }
        }
        Err(FlowError::sink(
            ELASTIC_SINK,
            anyhow!("no elasticsearch index configured for type {kind}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn resolver() -> IndexResolver {
        let mapping = HashMap::from([
            ("orders".to_string(), vec!["^db\\.order.*$".to_string()]),
            ("users".to_string(), vec!["^db\\.user$".to_string()]),
        ]);
        IndexResolver::new(&mapping).unwrap()
    }

    fn batch_item(rows: Vec<Value>) -> BulkItem<Event> {
        let event = Event::new("127.0.0.1:3306", rows, CancellationToken::new());
        BulkItem {
            size: event.weight(),
            key: event.topic.clone(),
            data: event,
        }
    }

    #[test]
    fn test_resolver_caches_first_match() {
        let mut resolver = resolver();
        assert_eq!(resolver.resolve("db.order_2024").unwrap(), "orders");
        assert_eq!(resolver.cache.get("db.order_2024").unwrap(), "orders");
        assert!(resolver.resolve("db.unknown").is_err());
    }

    #[test]
    fn test_group_batch_by_index_then_action() {
        let mut resolver = resolver();
        let batch = vec![batch_item(vec![
            json!({"action": "insert", "type": "db.user", "messages": [{"id": 1}]}),
            json!({"action": "update", "type": "db.user", "messages": [{"id": 2}]}),
            json!({"action": "insert", "type": "db.order_x", "messages": [{"id": 3}, {"id": 4}]}),
        ])];
        let groups = group_batch(batch, &mut resolver).unwrap();
        assert_eq!(groups["users"][&EventAction::Insert].len(), 1);
        assert_eq!(groups["users"][&EventAction::Update].len(), 1);
        assert_eq!(groups["orders"][&EventAction::Insert].len(), 2);
    }

    #[test]
    fn test_group_batch_rejects_unknown_action() {
        let mut resolver = resolver();
        let batch = vec![batch_item(vec![
            json!({"action": "truncate", "type": "db.user", "messages": []}),
        ])];
        let err = group_batch(batch, &mut resolver).unwrap_err();
        assert!(matches!(err, FlowError::InvalidAction(_)));
    }

    #[test]
    fn test_bulk_body_requires_id() {
        let err = match bulk_body("users", EventAction::Insert, &[json!({"name": "a"})]) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("no id field"));
    }

    #[test]
    fn test_bulk_body_shapes() {
        let messages = [json!({"id": 7, "name": "b"})];
        assert_eq!(
            bulk_body("users", EventAction::Insert, &messages).unwrap().len(),
            2
        );
        assert_eq!(
            bulk_body("users", EventAction::Update, &messages).unwrap().len(),
            2
        );
        assert_eq!(
            bulk_body("users", EventAction::Delete, &messages).unwrap().len(),
            1
        );
    }
}
