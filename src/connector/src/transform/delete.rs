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

use serde::Deserialize;

use riverflow_common::docpath;
use riverflow_common::event::Event;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteConfig {
    #[serde(default)]
    pub fields: Vec<String>,
}

pub struct DeleteFields {
    fields: Vec<String>,
}

impl DeleteFields {
    pub fn new(cfg: DeleteConfig) -> Self {
        Self { fields: cfg.fields }
    }

    pub fn apply(&self, event: &mut Event) {
        for row in &mut event.rows {
            for field in &self.fields {
                docpath::delete(row, field);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[test]
    fn test_delete_fields() {
        let delete = DeleteFields::new(DeleteConfig {
            fields: vec!["secret".to_string(), "a.b".to_string()],
        });
        let mut event = Event::new(
            "t",
            vec![json!({"secret": 1, "a": {"b": 2, "c": 3}, "keep": true})],
            CancellationToken::new(),
        );
        delete.apply(&mut event);
        assert_eq!(event.rows, vec![json!({"a": {"c": 3}, "keep": true})]);
    }
}
