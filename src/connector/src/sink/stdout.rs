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

//! Diagnostic sink: the event's JSON wire form on standard output.

use serde::Deserialize;

use riverflow_common::error::{FlowError, Result};
use riverflow_common::event::Event;

pub const STDOUT_SINK: &str = "stdout";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StdoutConfig {}

pub struct StdoutSink;

impl StdoutSink {
    pub fn on_event(&self, event: &Event) -> Result<()> {
        let raw = serde_json::to_string(event).map_err(|e| FlowError::sink(STDOUT_SINK, e))?;
        println!("{raw}");
        Ok(())
    }
}
