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

pub mod canal;
pub mod kafka;

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use riverflow_common::command::Commander;
use riverflow_common::error::Result;
use riverflow_common::stream::StreamHandle;

pub use canal::{CanalConfig, CanalSource};
pub use kafka::{KafkaInputConfig, KafkaSource};

/// Exactly one input per flow, selected by its tag in the configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputConfig {
    Canal(CanalConfig),
    Kafka(KafkaInputConfig),
}

/// Shared handles an input needs at construction time, injected by the
/// hosting flow instead of living in process-wide globals.
#[derive(Clone)]
pub struct SourceContext {
    pub redis: redis::aio::MultiplexedConnection,
    pub commander: Arc<Commander>,
    pub shutdown: CancellationToken,
}

pub enum SourceImpl {
    Canal(CanalSource),
    Kafka(KafkaSource),
}

impl SourceImpl {
    pub async fn build(
        config: InputConfig,
        ctx: &SourceContext,
        stream: StreamHandle,
    ) -> Result<Self> {
        match config {
            InputConfig::Canal(cfg) => Ok(Self::Canal(CanalSource::new(cfg, ctx, stream).await?)),
            InputConfig::Kafka(cfg) => Ok(Self::Kafka(KafkaSource::new(cfg, ctx, stream)?)),
        }
    }

    /// Run the input until the flow shuts down.
    pub async fn run(self) {
        match self {
            Self::Canal(source) => source.run().await,
            Self::Kafka(source) => source.run().await,
        }
    }
}
