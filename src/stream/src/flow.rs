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

//! One flow: an input, a worker pool, and an output chain.
//!
//! Workers share the stream's consumer end. The protocol carries a single
//! outstanding event, so additional workers race to receive but never
//! reorder completions; per-flow ordering is preserved regardless of
//! `work_count`.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use riverflow_common::command::Commander;
use riverflow_common::error::{FlowError, Result};
use riverflow_common::event::EventResult;
use riverflow_common::stream::{stream, ErrorReceiver, WorkerHandle};
use riverflow_connector::sink::{OutputEntry, SinkContext};
use riverflow_connector::source::{InputConfig, SourceContext, SourceImpl};

use crate::chain::HeadChain;

#[derive(Debug, Deserialize)]
pub struct FlowConfig {
    pub input: InputConfig,
    pub outputs: Vec<OutputEntry>,
    #[serde(default)]
    pub work_count: usize,
}

/// Process-level handles injected into every flow.
#[derive(Clone)]
pub struct FlowContext {
    pub redis: redis::aio::MultiplexedConnection,
    pub commander: Arc<Commander>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

pub struct Flow {
    source: SourceImpl,
    chain: Arc<HeadChain>,
    worker: WorkerHandle,
    errors: ErrorReceiver,
    workers: usize,
    shutdown: CancellationToken,
}

impl Flow {
    pub async fn build(cfg: FlowConfig, ctx: &FlowContext) -> Result<Self> {
        let (handle, worker, errors) = stream();
        let sink_ctx = SinkContext {
            shutdown: ctx.shutdown.clone(),
            errors: handle.error_sender(),
            tracker: ctx.tracker.clone(),
        };
        let chain = Arc::new(HeadChain::build(cfg.outputs, &sink_ctx)?);
        let source_ctx = SourceContext {
            redis: ctx.redis.clone(),
            commander: ctx.commander.clone(),
            shutdown: ctx.shutdown.clone(),
        };
        let source = SourceImpl::build(cfg.input, &source_ctx, handle).await?;
        Ok(Self {
            source,
            chain,
            worker,
            errors,
            workers: cfg.work_count.max(1),
            shutdown: ctx.shutdown.clone(),
        })
    }

    /// Spawn the input, the worker pool and the error forwarder onto the
    /// tracker. Out-of-band errors fan in to `alerts`.
    pub fn spawn(self, tracker: &TaskTracker, alerts: mpsc::UnboundedSender<FlowError>) {
        let mut errors = self.errors;
        tracker.spawn(async move {
            while let Some(err) = errors.recv().await {
                if alerts.send(err).is_err() {
                    return;
                }
            }
        });

        for id in 0..self.workers {
            tracker.spawn(worker_loop(
                id,
                self.chain.clone(),
                self.worker.clone(),
                self.shutdown.clone(),
            ));
        }

        tracker.spawn(self.source.run());
    }
}

async fn worker_loop(
    id: usize,
    chain: Arc<HeadChain>,
    worker: WorkerHandle,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(worker = id, "flow worker stopped");
                return;
            }
            event = worker.next() => {
                let Some(event) = event else { return };
                let result = chain.on_event(&event).await;
                if let Err(err) = &result {
                    tracing::warn!(worker = id, topic = %event.topic, error = %err, "event failed");
                }
                worker.finish(EventResult::from_result(result)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use riverflow_connector::sink::SinkConfig;
    use riverflow_connector::transform::TransformConfig;

    use super::*;

    #[test]
    fn test_flow_config_shape() {
        let cfg: FlowConfig = serde_yaml::from_str(
            r#"
input:
  canal:
    addr: 127.0.0.1:3306
    user: repl
    password: secret
    server_id: 1001
    include_table_regex: ["^db\\..*$"]
    monitor_inter: 30
outputs:
  - elastic:
      url: http://127.0.0.1:9200
      index_table_mapping:
        users: ["^db\\.user$"]
    match:
      keys: ["^127\\.0\\.0\\.1:3306$"]
    plugins:
      - rename:
          names:
            table: type
        match:
          conds: ["action == insert"]
      - filter:
          mode: exclude
  - stdout: {}
work_count: 2
"#,
        )
        .unwrap();

        assert_eq!(cfg.work_count, 2);
        assert!(matches!(cfg.input, InputConfig::Canal(_)));
        assert_eq!(cfg.outputs.len(), 2);

        let elastic = &cfg.outputs[0];
        assert!(matches!(elastic.sink, SinkConfig::Elastic(_)));
        assert_eq!(elastic.match_config.keys.len(), 1);
        assert_eq!(elastic.plugins.len(), 2);
        assert!(matches!(
            elastic.plugins[0].transform,
            TransformConfig::Rename(_)
        ));
        assert_eq!(elastic.plugins[0].match_config.conds.len(), 1);
        assert!(matches!(
            elastic.plugins[1].transform,
            TransformConfig::Filter(_)
        ));
        assert!(matches!(cfg.outputs[1].sink, SinkConfig::Stdout(_)));
    }

    #[test]
    fn test_flow_config_defaults_worker_count() {
        let cfg: FlowConfig = serde_yaml::from_str(
            r#"
input:
  kafka:
    topic: events
    group: riverflow
    brokers: ["localhost:9092"]
outputs:
  - stdout: {}
"#,
        )
        .unwrap();
        assert_eq!(cfg.work_count, 0);
        assert_eq!(cfg.work_count.max(1), 1);
        assert!(matches!(cfg.input, InputConfig::Kafka(_)));
    }
}
