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

//! Transform plugins interleaved with outputs: field rename, join-combine,
//! delete and row filtering. Transforms rewrite the event rows in place;
//! the chain passes the rewritten event forward.

pub mod combine;
pub mod delete;
pub mod filter;
pub mod rename;

use serde::Deserialize;

use riverflow_common::error::Result;
use riverflow_common::event::Event;
use riverflow_common::matcher::{MatchConfig, Matcher};

pub use combine::{Combine, CombineConfig};
pub use delete::{DeleteConfig, DeleteFields};
pub use filter::{Filter, FilterConfig, FilterMode};
pub use rename::{Rename, RenameConfig};

/// Exactly one transform per plugin entry, selected by its tag.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformConfig {
    Rename(RenameConfig),
    Combine(CombineConfig),
    Delete(DeleteConfig),
    Filter(FilterConfig),
}

/// One entry of an output's `plugins` list.
#[derive(Debug, Deserialize)]
pub struct TransformEntry {
    #[serde(default, rename = "match")]
    pub match_config: MatchConfig,
    #[serde(flatten)]
    pub transform: TransformConfig,
}

pub enum Transform {
    Rename(Rename),
    Combine(Combine),
    Delete(DeleteFields),
    Filter(Filter),
}

impl Transform {
    pub fn build(config: TransformConfig) -> Self {
        match config {
            TransformConfig::Rename(cfg) => Self::Rename(Rename::new(cfg)),
            TransformConfig::Combine(cfg) => Self::Combine(Combine::new(cfg)),
            TransformConfig::Delete(cfg) => Self::Delete(DeleteFields::new(cfg)),
            TransformConfig::Filter(cfg) => Self::Filter(Filter::new(cfg)),
        }
    }

    /// How this stage consumes the chain's matcher. Every transform except
    /// the filter applies the plain predicate; the filter owns inverted
    /// semantics.
    pub fn select(&self, matcher: &Matcher, event: Event) -> Event {
        match self {
            Self::Filter(filter) => filter.select(matcher, event),
            _ => matcher.filter(event),
        }
    }

    pub fn apply(&self, event: &mut Event) -> Result<()> {
        match self {
            Self::Rename(rename) => rename.apply(event),
            Self::Combine(combine) => combine.apply(event),
            Self::Delete(delete) => {
                delete.apply(event);
                Ok(())
            }
            Self::Filter(_) => Ok(()),
        }
    }
}
