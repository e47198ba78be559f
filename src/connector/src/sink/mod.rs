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

pub mod elastic;
pub mod kafka;
pub mod stdout;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use riverflow_common::error::{FlowError, Result};
use riverflow_common::event::Event;
use riverflow_common::matcher::MatchConfig;

pub use elastic::{ElasticConfig, ElasticSink};
pub use kafka::{KafkaSink, KafkaSinkConfig};
pub use stdout::{StdoutConfig, StdoutSink};

use crate::transform::TransformEntry;

pub(crate) fn default_bulk_size() -> usize {
    10
}

pub(crate) fn default_bulk_flush_sec() -> u64 {
    5
}

/// Exactly one sink per output entry, selected by its tag.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkConfig {
    Elastic(ElasticConfig),
    Kafka(KafkaSinkConfig),
    Stdout(StdoutConfig),
}

/// One entry of a flow's `outputs` list: the sink, its match predicate and
/// the plugin chain prepended to it.
#[derive(Debug, Deserialize)]
pub struct OutputEntry {
    #[serde(default, rename = "match")]
    pub match_config: MatchConfig,
    #[serde(default)]
    pub plugins: Vec<TransformEntry>,
    #[serde(flatten)]
    pub sink: SinkConfig,
}

/// Handles a sink needs beyond its own configuration: the shutdown token
/// driving the final drain, the flow error channel that routes flusher
/// failures to the alert mailer, and the process task tracker so shutdown
/// waits for the drain to finish.
#[derive(Clone)]
pub struct SinkContext {
    pub shutdown: CancellationToken,
    pub errors: mpsc::UnboundedSender<FlowError>,
    pub tracker: TaskTracker,
}

pub enum SinkImpl {
    Elastic(ElasticSink),
    Kafka(KafkaSink),
    Stdout(StdoutSink),
}

impl SinkImpl {
    pub fn build(config: SinkConfig, ctx: &SinkContext) -> Result<Self> {
        match config {
            SinkConfig::Elastic(cfg) => Ok(Self::Elastic(ElasticSink::new(cfg, ctx)?)),
            SinkConfig::Kafka(cfg) => Ok(Self::Kafka(KafkaSink::new(cfg, ctx)?)),
            SinkConfig::Stdout(_) => Ok(Self::Stdout(StdoutSink)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Elastic(_) => elastic::ELASTIC_SINK,
            Self::Kafka(_) => kafka::KAFKA_SINK,
            Self::Stdout(_) => stdout::STDOUT_SINK,
        }
    }

    pub async fn on_event(&self, event: &Event) -> Result<()> {
        match self {
            Self::Elastic(sink) => sink.on_event(event).await,
            Self::Kafka(sink) => sink.on_event(event).await,
            Self::Stdout(sink) => sink.on_event(event),
        }
    }
}
