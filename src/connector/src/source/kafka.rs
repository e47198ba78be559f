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

//! Kafka consumer-group input.
//!
//! Each message is JSON-decoded into an [`Event`] and pushed through the
//! stream request/response protocol; the offset is committed only after a
//! successful round-trip, so a failed event is re-delivered. Decode
//! failures surface on the error channel and skip the commit.

use anyhow::anyhow;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientConfig, Message};
use serde::Deserialize;

use riverflow_common::error::{FlowError, Result};
use riverflow_common::event::Event;
use riverflow_common::stream::StreamHandle;
use tokio_util::sync::CancellationToken;

use super::SourceContext;

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaInputConfig {
    pub topic: String,
    #[serde(rename = "group")]
    pub group_id: String,
    pub brokers: Vec<String>,
    /// Start from the latest offset when the group has none committed.
    #[serde(default)]
    pub latest: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// One of `plain`, `sha256`, `sha512`.
    #[serde(default)]
    pub sasl: String,
}

pub struct KafkaSource {
    consumer: StreamConsumer,
    stream: StreamHandle,
    shutdown: CancellationToken,
    topic: String,
}

impl KafkaSource {
    pub fn new(cfg: KafkaInputConfig, ctx: &SourceContext, stream: StreamHandle) -> Result<Self> {
        let mut client = ClientConfig::new();
        client
            .set("group.id", &cfg.group_id)
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                if cfg.latest { "latest" } else { "earliest" },
            );
        if !cfg.user.is_empty() {
            let mechanism = match cfg.sasl.as_str() {
                "plain" => "PLAIN",
                "sha256" => "SCRAM-SHA-256",
                "sha512" => "SCRAM-SHA-512",
                other => {
                    return Err(FlowError::config(anyhow!(
                        "unsupported sasl mechanism: {other}"
                    )))
                }
            };
            client
                .set("security.protocol", "sasl_plaintext")
                .set("sasl.mechanisms", mechanism)
                .set("sasl.username", &cfg.user)
                .set("sasl.password", &cfg.password);
        }
        let consumer: StreamConsumer = client.create().map_err(FlowError::config)?;
        consumer
            .subscribe(&[&cfg.topic])
            .map_err(FlowError::config)?;
        Ok(Self {
            consumer,
            stream,
            shutdown: ctx.shutdown.clone(),
            topic: cfg.topic,
        })
    }

    pub async fn run(self) {
        tracing::info!(topic = %self.topic, "kafka input started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(topic = %self.topic, "kafka input stopped");
                    return;
                }
                message = self.consumer.recv() => match message {
                    Ok(message) => self.handle(message).await,
                    Err(err) => {
                        self.stream.report(FlowError::upstream(err));
                        return;
                    }
                }
            }
        }
    }

    async fn handle(&self, message: BorrowedMessage<'_>) {
        let payload = message.payload().unwrap_or_default();
        let mut event: Event = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(
                    topic = %self.topic,
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %err,
                    "dropping undecodable message"
                );
                // The offset is deliberately not committed.
                self.stream.report(FlowError::upstream(err));
                return;
            }
        };
        event.ctx = self.shutdown.child_token();

        match self.stream.dispatch(event).await {
            Ok(()) => {
                if let Err(err) = self.consumer.commit_message(&message, CommitMode::Async) {
                    self.stream.report(FlowError::upstream(err));
                }
            }
            Err(err) => {
                tracing::warn!(
                    topic = %self.topic,
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %err,
                    "event processing failed, offset not committed"
                );
                self.stream.report(err);
            }
        }
    }
}
