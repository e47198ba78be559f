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

use std::collections::HashMap;

use serde::Deserialize;

use riverflow_common::docpath;
use riverflow_common::error::Result;
use riverflow_common::event::Event;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CombineConfig {
    /// Destination path to the source paths joined into it.
    #[serde(default)]
    pub fields: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub join: String,
}

pub struct Combine {
    cfg: CombineConfig,
}

impl Combine {
    pub fn new(cfg: CombineConfig) -> Self {
        Self { cfg }
    }

    pub fn apply(&self, event: &mut Event) -> Result<()> {
        for row in &mut event.rows {
            for (field, sources) in &self.cfg.fields {
                docpath::insert_joined(row, sources, field, &self.cfg.join)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[test]
    fn test_combine_builds_joined_field() {
        let combine = Combine::new(CombineConfig {
            fields: HashMap::from([(
                "uid".to_string(),
                vec!["table".to_string(), "id".to_string()],
            )]),
            join: ":".to_string(),
        });
        let mut event = Event::new(
            "t",
            vec![json!({"table": "db.t", "id": 7})],
            CancellationToken::new(),
        );
        combine.apply(&mut event).unwrap();
        assert_eq!(event.rows[0]["uid"], json!("db.t:7"));
    }

    #[test]
    fn test_combine_arity_mismatch_aborts() {
        let combine = Combine::new(CombineConfig {
            fields: HashMap::from([("a[*].t".to_string(), vec!["id".to_string()])]),
            join: ",".to_string(),
        });
        let mut event = Event::new("t", vec![json!({"id": 1})], CancellationToken::new());
        assert!(combine.apply(&mut event).is_err());
    }
}
