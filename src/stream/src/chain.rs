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

//! Handler chains.
//!
//! A flow's outputs form the head chain. The head deep-copies the event
//! per child so sibling outputs observe identical, independent input;
//! transforms rewrite payloads in place, and without the copy siblings
//! would see each other's mutations. Inner chains pass the
//! matcher-produced event forward through plugins into the sink; the
//! first error halts the chain.

use riverflow_common::error::Result;
use riverflow_common::event::Event;
use riverflow_common::matcher::Matcher;
use riverflow_connector::sink::{OutputEntry, SinkContext, SinkImpl};
use riverflow_connector::transform::Transform;

enum Stage {
    Transform(Transform),
    Sink(SinkImpl),
}

struct ChainStage {
    matcher: Matcher,
    stage: Stage,
}

impl ChainStage {
    fn select(&self, event: Event) -> Event {
        match &self.stage {
            Stage::Transform(transform) => transform.select(&self.matcher, event),
            Stage::Sink(_) => self.matcher.filter(event),
        }
    }

    async fn apply(&self, event: &mut Event) -> Result<()> {
        match &self.stage {
            Stage::Transform(transform) => transform.apply(event),
            Stage::Sink(sink) => sink.on_event(event).await,
        }
    }
}

/// Plugins followed by their sink, in configuration order.
pub struct OutputChain {
    stages: Vec<ChainStage>,
}

impl OutputChain {
    pub fn build(entry: OutputEntry, ctx: &SinkContext) -> Result<Self> {
        let mut stages = Vec::with_capacity(entry.plugins.len() + 1);
        for plugin in entry.plugins {
            stages.push(ChainStage {
                matcher: Matcher::new(&plugin.match_config)?,
                stage: Stage::Transform(Transform::build(plugin.transform)),
            });
        }
        stages.push(ChainStage {
            matcher: Matcher::new(&entry.match_config)?,
            stage: Stage::Sink(SinkImpl::build(entry.sink, ctx)?),
        });
        Ok(Self { stages })
    }

    /// Run the event through every stage, returning its final shape.
    pub async fn on_event(&self, mut event: Event) -> Result<Event> {
        for stage in &self.stages {
            event = stage.select(event);
            stage.apply(&mut event).await?;
        }
        Ok(event)
    }
}

/// The output list of a flow.
pub struct HeadChain {
    outputs: Vec<OutputChain>,
}

impl HeadChain {
    pub fn build(entries: Vec<OutputEntry>, ctx: &SinkContext) -> Result<Self> {
        let outputs = entries
            .into_iter()
            .map(|entry| OutputChain::build(entry, ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { outputs })
    }

    pub async fn on_event(&self, event: &Event) -> Result<()> {
        for output in &self.outputs {
            output.on_event(event.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use riverflow_common::matcher::MatchConfig;
    use riverflow_connector::sink::SinkConfig;
    use riverflow_connector::transform::{RenameConfig, TransformConfig, TransformEntry};

    use super::*;

    fn stdout_entry(plugins: Vec<TransformEntry>, match_config: MatchConfig) -> OutputEntry {
        OutputEntry {
            match_config,
            plugins,
            sink: SinkConfig::Stdout(Default::default()),
        }
    }

    fn sink_ctx() -> SinkContext {
        SinkContext {
            shutdown: CancellationToken::new(),
            errors: tokio::sync::mpsc::unbounded_channel().0,
            tracker: tokio_util::task::TaskTracker::new(),
        }
    }

    fn rename_plugin(from: &str, to: &str) -> TransformEntry {
        TransformEntry {
            match_config: MatchConfig::default(),
            transform: TransformConfig::Rename(RenameConfig {
                names: std::collections::HashMap::from([(from.to_string(), to.to_string())]),
            }),
        }
    }

    #[tokio::test]
    async fn test_inner_chain_passes_transformed_event_forward() {
        let chain = OutputChain::build(
            stdout_entry(
                vec![rename_plugin("user.name", "profile.name")],
                MatchConfig::default(),
            ),
            &sink_ctx(),
        )
        .unwrap();
        let event = Event::new(
            "t",
            vec![json!({"user": {"name": "x"}})],
            CancellationToken::new(),
        );
        let out = chain.on_event(event).await.unwrap();
        assert_eq!(out.rows, vec![json!({"user": {}, "profile": {"name": "x"}})]);
    }

    #[tokio::test]
    async fn test_inner_chain_applies_stage_matchers() {
        let chain = OutputChain::build(
            stdout_entry(
                vec![],
                MatchConfig {
                    keys: vec![],
                    conds: vec!["status == 1".into()],
                },
            ),
            &sink_ctx(),
        )
        .unwrap();
        let event = Event::new(
            "t",
            vec![json!({"status": 1}), json!({"status": 2})],
            CancellationToken::new(),
        );
        let out = chain.on_event(event).await.unwrap();
        assert_eq!(out.rows, vec![json!({"status": 1})]);
    }

    #[tokio::test]
    async fn test_head_chain_isolates_siblings() {
        let head = HeadChain::build(
            vec![
                stdout_entry(
                    vec![rename_plugin("name", "renamed")],
                    MatchConfig::default(),
                ),
                stdout_entry(vec![], MatchConfig::default()),
            ],
            &sink_ctx(),
        )
        .unwrap();
        let event = Event::new("t", vec![json!({"name": "x"})], CancellationToken::new());
        head.on_event(&event).await.unwrap();
        // The first output's rename must not leak into the original event
        // that the second output observed.
        assert_eq!(event.rows, vec![json!({"name": "x"})]);
    }
}
