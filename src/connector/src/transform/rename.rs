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
pub struct RenameConfig {
    /// Source path to destination path.
    #[serde(default)]
    pub names: HashMap<String, String>,
}

pub struct Rename {
    names: HashMap<String, String>,
}

impl Rename {
    pub fn new(cfg: RenameConfig) -> Self {
        Self { names: cfg.names }
    }

    pub fn apply(&self, event: &mut Event) -> Result<()> {
        for row in &mut event.rows {
            for (from, to) in &self.names {
                docpath::rename(row, from, to)?;
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
    fn test_rename_rows() {
        let rename = Rename::new(RenameConfig {
            names: HashMap::from([("user.name".to_string(), "profile.name".to_string())]),
        });
        let mut event = Event::new(
            "t",
            vec![json!({"user": {"name": "x"}})],
            CancellationToken::new(),
        );
        rename.apply(&mut event).unwrap();
        assert_eq!(event.rows, vec![json!({"user": {}, "profile": {"name": "x"}})]);
    }
}
