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

//! Row filter plugin.
//!
//! The legacy default is `exclude`: rows that MATCH the predicate are
//! removed, and a topic-regex match discards the whole event. `include`
//! flips this to the plain matcher semantics.

use serde::Deserialize;

use riverflow_common::event::Event;
use riverflow_common::matcher::Matcher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Include,
    #[default]
    Exclude,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub mode: FilterMode,
}

pub struct Filter {
    mode: FilterMode,
}

impl Filter {
    pub fn new(cfg: FilterConfig) -> Self {
        Self { mode: cfg.mode }
    }

    pub fn select(&self, matcher: &Matcher, event: Event) -> Event {
        match self.mode {
            FilterMode::Include => matcher.filter(event),
            FilterMode::Exclude => {
                let (has_regexes, matched) = matcher.match_topic(&event.topic);
                if has_regexes && matched {
                    return Event {
                        rows: Vec::new(),
                        ..event
                    };
                }
                let rows = event
                    .rows
                    .into_iter()
                    .filter(|row| !matcher.match_row(row))
                    .collect();
                Event { rows, ..event }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use riverflow_common::matcher::MatchConfig;

    use super::*;

    fn matcher(conds: Vec<&str>) -> Matcher {
        Matcher::new(&MatchConfig {
            keys: vec![],
            conds: conds.into_iter().map(String::from).collect(),
        })
        .unwrap()
    }

    fn event(rows: Vec<serde_json::Value>) -> Event {
        Event::new("t", rows, CancellationToken::new())
    }

    #[test]
    fn test_exclude_drops_matching_rows() {
        let filter = Filter::new(FilterConfig {
            mode: FilterMode::Exclude,
        });
        let out = filter.select(
            &matcher(vec!["status == 1"]),
            event(vec![json!({"status": 1}), json!({"status": 2})]),
        );
        assert_eq!(out.rows, vec![json!({"status": 2})]);
    }

    #[test]
    fn test_include_keeps_matching_rows() {
        let filter = Filter::new(FilterConfig {
            mode: FilterMode::Include,
        });
        let out = filter.select(
            &matcher(vec!["status == 1"]),
            event(vec![json!({"status": 1}), json!({"status": 2})]),
        );
        assert_eq!(out.rows, vec![json!({"status": 1})]);
    }

    #[test]
    fn test_exclude_topic_match_discards_event() {
        let filter = Filter::new(FilterConfig {
            mode: FilterMode::Exclude,
        });
        let matcher = Matcher::new(&MatchConfig {
            keys: vec!["^t$".into()],
            conds: vec![],
        })
        .unwrap();
        let out = filter.select(&matcher, event(vec![json!({"a": 1})]));
        assert!(out.rows.is_empty());
    }

    #[test]
    fn test_default_mode_is_exclude() {
        let cfg: FilterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mode, FilterMode::Exclude);
    }
}
