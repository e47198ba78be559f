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

//! Topic and row predicates gating outputs and plugins.
//!
//! Matching has two orthogonal parts: regular expressions over the event
//! topic, and `<path> <op> <value>` conditions over individual rows.
//! Condition operands are compared on their string form; this is the
//! contract of deployed flows (`"10" > "9"` is false), pinned by tests.
//! The `typed-conds` feature switches to numeric comparison when both
//! operands parse as numbers.

use std::cmp::Ordering;
use std::sync::OnceLock;

use anyhow::anyhow;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::docpath;
use crate::error::{FlowError, Result};
use crate::event::Event;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchConfig {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub conds: Vec<String>,
}

impl MatchConfig {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.conds.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            _ => return None,
        })
    }

    fn holds(self, ordering: Ordering, equal: bool) -> bool {
        match self {
            Self::Eq => equal,
            Self::Ne => !equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Lt => ordering == Ordering::Less,
            Self::Ge => ordering != Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    field: String,
    op: CompareOp,
    value: String,
}

fn condition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\S+)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$").expect("valid pattern")
    })
}

impl Condition {
    pub fn parse(expr: &str) -> Result<Self> {
        let captures = condition_pattern()
            .captures(expr)
            .ok_or_else(|| FlowError::config(anyhow!("invalid condition format: {expr}")))?;
        let op = CompareOp::parse(&captures[2])
            .ok_or_else(|| FlowError::config(anyhow!("invalid operator in condition: {expr}")))?;
        Ok(Self {
            field: captures[1].to_string(),
            op,
            value: normalize_literal(&captures[3]),
        })
    }

    fn evaluate(&self, row: &Value) -> bool {
        let actual = docpath::get(row, &self.field)
            .map(|v| docpath::display_value(&v))
            .unwrap_or_else(|| "null".to_string());
        let (ordering, equal) = compare_operands(&actual, &self.value);
        self.op.holds(ordering, equal)
    }
}

/// Normalize the literal side of a condition: integers and floats through
/// their canonical string form, everything else with surrounding quotes
/// stripped.
fn normalize_literal(raw: &str) -> String {
    if let Ok(i) = raw.parse::<i64>() {
        return i.to_string();
    }
    if let Ok(f) = raw.parse::<f64>() {
        return f.to_string();
    }
    raw.trim_matches(|c| c == '"' || c == '\'').to_string()
}

#[cfg(not(feature = "typed-conds"))]
fn compare_operands(actual: &str, target: &str) -> (Ordering, bool) {
    (actual.cmp(target), actual == target)
}

#[cfg(feature = "typed-conds")]
fn compare_operands(actual: &str, target: &str) -> (Ordering, bool) {
    if let (Ok(a), Ok(t)) = (actual.parse::<f64>(), target.parse::<f64>()) {
        let ordering = a.partial_cmp(&t).unwrap_or(Ordering::Equal);
        return (ordering, a == t);
    }
    (actual.cmp(target), actual == target)
}

/// Compiled match predicate for one output or plugin.
#[derive(Debug, Default)]
pub struct Matcher {
    regexes: Vec<Regex>,
    conds: Vec<Condition>,
}

impl Matcher {
    pub fn new(config: &MatchConfig) -> Result<Self> {
        let regexes = config
            .keys
            .iter()
            .map(|raw| Regex::new(raw).map_err(FlowError::config))
            .collect::<Result<Vec<_>>>()?;
        let conds = config
            .conds
            .iter()
            .map(|expr| Condition::parse(expr))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { regexes, conds })
    }

    /// Returns `(has_regexes, matched)` for the topic regexes.
    pub fn match_topic(&self, topic: &str) -> (bool, bool) {
        if self.regexes.is_empty() {
            return (false, true);
        }
        (true, self.regexes.iter().any(|r| r.is_match(topic)))
    }

    /// True when every condition holds for the row.
    pub fn match_row(&self, row: &Value) -> bool {
        self.conds.iter().all(|cond| cond.evaluate(row))
    }

    /// Apply the predicate to an event: a failed topic match empties the
    /// rows; conditions retain only passing rows. An empty matcher accepts
    /// every event unchanged.
    pub fn filter(&self, event: Event) -> Event {
        let (_, matched) = self.match_topic(&event.topic);
        if !matched {
            return Event {
                rows: Vec::new(),
                ..event
            };
        }
        if self.conds.is_empty() {
            return event;
        }
        let rows = event
            .rows
            .into_iter()
            .filter(|row| self.match_row(row))
            .collect();
        Event { rows, ..event }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn event(topic: &str, rows: Vec<Value>) -> Event {
        Event::new(topic, rows, CancellationToken::new())
    }

    #[test]
    fn test_empty_matcher_accepts_everything() {
        let matcher = Matcher::new(&MatchConfig::default()).unwrap();
        let input = event("any", vec![json!({"a": 1})]);
        let out = matcher.filter(input.clone());
        assert_eq!(out.rows, input.rows);
    }

    #[test]
    fn test_topic_regex_gates_event() {
        let matcher = Matcher::new(&MatchConfig {
            keys: vec!["^10\\.0\\..*:3306$".into()],
            conds: vec![],
        })
        .unwrap();
        assert_eq!(matcher.filter(event("10.0.0.1:3306", vec![json!({})])).rows.len(), 1);
        assert!(matcher.filter(event("kafka-topic", vec![json!({})])).rows.is_empty());
    }

    #[test]
    fn test_conditions_filter_rows() {
        let matcher = Matcher::new(&MatchConfig {
            keys: vec![],
            conds: vec!["status == 2".into()],
        })
        .unwrap();
        let out = matcher.filter(event(
            "t",
            vec![json!({"status": 2}), json!({"status": 3})],
        ));
        assert_eq!(out.rows, vec![json!({"status": 2})]);
    }

    #[test]
    fn test_condition_parse() {
        let cond = Condition::parse("user.age >= 18").unwrap();
        assert_eq!(cond.field, "user.age");
        assert_eq!(cond.op, CompareOp::Ge);
        assert_eq!(cond.value, "18");

        let cond = Condition::parse(r#"name == "bob""#).unwrap();
        assert_eq!(cond.value, "bob");

        assert!(Condition::parse("no-operator-here").is_err());
    }

    #[cfg(not(feature = "typed-conds"))]
    #[test]
    fn test_stringified_comparison_is_lexicographic() {
        // Legacy contract: "10" > "9" is false on the string form.
        let matcher = Matcher::new(&MatchConfig {
            keys: vec![],
            conds: vec!["n > 9".into()],
        })
        .unwrap();
        let out = matcher.filter(event("t", vec![json!({"n": 10})]));
        assert!(out.rows.is_empty());
    }

    #[cfg(feature = "typed-conds")]
    #[test]
    fn test_typed_comparison_is_numeric() {
        let matcher = Matcher::new(&MatchConfig {
            keys: vec![],
            conds: vec!["n > 9".into()],
        })
        .unwrap();
        let out = matcher.filter(event("t", vec![json!({"n": 10})]));
        assert_eq!(out.rows.len(), 1);
    }

    #[test]
    fn test_missing_field_compares_as_null() {
        let matcher = Matcher::new(&MatchConfig {
            keys: vec![],
            conds: vec!["ghost == null".into()],
        })
        .unwrap();
        let out = matcher.filter(event("t", vec![json!({"a": 1})]));
        assert_eq!(out.rows.len(), 1);
    }
}
