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

//! Kafka producer sink.
//!
//! Events accumulate in the bulk buffer keyed by their topic; the flusher
//! serializes each event to the `{"Topic", "Datas"}` wire form and
//! produces one message per event. The message key is either a configured
//! literal or a template whose `{field}` tokens expand against the first
//! row of the event.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use riverflow_common::buffer::{BulkBuffer, BulkItem};
use riverflow_common::docpath;
use riverflow_common::error::{FlowError, Result};
use riverflow_common::event::Event;

use super::{default_bulk_flush_sec, default_bulk_size, SinkContext};

pub const KAFKA_SINK: &str = "kafka";

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaSinkConfig {
    pub topic: String,
    /// Literal message key; takes precedence over the template.
    #[serde(default)]
    pub key: String,
    /// Key template with `{field}` tokens expanded against the first row.
    #[serde(default)]
    pub key_template: String,
    pub brokers: Vec<String>,
    #[serde(default)]
    pub compression_type: String,
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default = "default_bulk_flush_sec")]
    pub bulk_flush_sec: u64,
}

pub struct KafkaSink {
    buffer: Arc<BulkBuffer<Event>>,
}

impl KafkaSink {
    pub fn new(cfg: KafkaSinkConfig, ctx: &SinkContext) -> Result<Self> {
        if cfg.topic.is_empty() {
            return Err(FlowError::config(anyhow!(
                "kafka output must have a topic setting"
            )));
        }
        if cfg.brokers.is_empty() {
            return Err(FlowError::config(anyhow!(
                "kafka output must have a brokers setting"
            )));
        }
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", cfg.brokers.join(","));
        if !cfg.compression_type.is_empty() {
            client.set("compression.type", &cfg.compression_type);
        }
        let producer: FutureProducer = client.create().map_err(FlowError::config)?;

        let (buffer, batches) =
            BulkBuffer::new(cfg.bulk_size, Duration::from_secs(cfg.bulk_flush_sec));
        let buffer = Arc::new(buffer);
        ctx.tracker.spawn(run_flusher(
            KafkaFlusher { producer, cfg },
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

struct KafkaFlusher {
    producer: FutureProducer,
    cfg: KafkaSinkConfig,
}

impl KafkaFlusher {
    async fn write_batch(&self, batch: Vec<BulkItem<Event>>) -> Result<()> {
        let count = batch.len();
        for item in batch {
            let event = item.data;
            let payload = serde_json::to_vec(&event).map_err(|e| FlowError::sink(KAFKA_SINK, e))?;
            let key = self.message_key(&event);
            self.producer
                .send(
                    FutureRecord::to(&self.cfg.topic).payload(&payload).key(&key),
                    SEND_TIMEOUT,
                )
                .await
                .map_err(|(err, _)| FlowError::sink(KAFKA_SINK, err))?;
        }
        tracing::info!(topic = %self.cfg.topic, count, "wrote messages to kafka");
        Ok(())
    }

    fn message_key(&self, event: &Event) -> String {
        if !self.cfg.key.is_empty() {
            return self.cfg.key.clone();
        }
        if !self.cfg.key_template.is_empty() {
            return expand_key(&self.cfg.key_template, event.rows.first());
        }
        String::new()
    }
}

fn expand_key(template: &str, row: Option<&Value>) -> String {
    let mut key = template.to_string();
    if let Some(Value::Object(fields)) = row {
        for (name, value) in fields {
            let token = format!("{{{name}}}");
            if key.contains(&token) {
                key = key.replace(&token, &docpath::display_value(value));
            }
        }
    }
    // Unresolved tokens collapse to their bare names.
    key.replace(['{', '}'], "")
}

async fn run_flusher(
    flusher: KafkaFlusher,
    mut batches: mpsc::Receiver<Vec<BulkItem<Event>>>,
    buffer: Arc<BulkBuffer<Event>>,
    ctx: SinkContext,
) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(batch) => process(&flusher, batch, &ctx).await,
                None => return,
            }
        }
    }
    buffer.stop();
    tracing::info!(topic = %flusher.cfg.topic, "kafka sink flushing remaining data");
    while let Some(batch) = batches.recv().await {
        process(&flusher, batch, &ctx).await;
    }
}

async fn process(flusher: &KafkaFlusher, batch: Vec<BulkItem<Event>>, ctx: &SinkContext) {
    if let Err(err) = flusher.write_batch(batch).await {
        tracing::error!(error = %err, "failed to write batch to kafka");
        let _ = ctx.errors.send(err);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_expand_key_against_first_row() {
        let row = json!({"table": "db.t", "action": "insert"});
        assert_eq!(expand_key("{table}:{action}", Some(&row)), "db.t:insert");
    }

    #[test]
    fn test_expand_key_strips_unresolved_tokens() {
        let row = json!({"a": 1});
        assert_eq!(expand_key("{a}-{missing}", Some(&row)), "1-missing");
        assert_eq!(expand_key("{a}", None), "a");
    }

    #[test]
    fn test_config_validation() {
        let ctx = SinkContext {
            shutdown: tokio_util::sync::CancellationToken::new(),
            errors: tokio::sync::mpsc::unbounded_channel().0,
            tracker: tokio_util::task::TaskTracker::new(),
        };
        let cfg = KafkaSinkConfig {
            topic: String::new(),
            key: String::new(),
            key_template: String::new(),
            brokers: vec!["localhost:9092".into()],
            compression_type: String::new(),
            bulk_size: 10,
            bulk_flush_sec: 5,
        };
        assert!(KafkaSink::new(cfg, &ctx).is_err());
    }
}
