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

//! Process-wide registry of operator commands.
//!
//! Inputs register handlers under `(module, cmd)`; the HTTP admin endpoint
//! dispatches to them. Several inputs may register the same command (one
//! canal input per upstream endpoint); a handler that is not responsible
//! for the request returns `None` and dispatch moves on to the next one.

use std::collections::HashMap;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::error::{FlowError, Result};

/// `Ok(Some(reply))` when handled, `Ok(None)` to pass to the next handler.
pub type CommandOutcome = Result<Option<String>>;

pub type CommandHandler =
    Box<dyn Fn(serde_json::Value) -> BoxFuture<'static, CommandOutcome> + Send + Sync>;

#[derive(Default)]
pub struct Commander {
    handlers: RwLock<HashMap<(String, String), Vec<CommandHandler>>>,
}

impl Commander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: &str, cmd: &str, handler: CommandHandler) {
        self.handlers
            .write()
            .entry((module.to_string(), cmd.to_string()))
            .or_default()
            .push(handler);
    }

    pub async fn dispatch(
        &self,
        module: &str,
        cmd: &str,
        params: serde_json::Value,
    ) -> Result<String> {
        let futures: Vec<_> = {
            let handlers = self.handlers.read();
            let registered = handlers
                .get(&(module.to_string(), cmd.to_string()))
                .ok_or_else(|| {
                    FlowError::Command(format!("command {cmd} not found in module {module}"))
                })?;
            registered.iter().map(|h| h(params.clone())).collect()
        };
        for future in futures {
            if let Some(reply) = future.await? {
                return Ok(reply);
            }
        }
        Err(FlowError::Command(format!(
            "no handler succeeded for command {cmd} in module {module}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_dispatch_falls_through_to_responsible_handler() {
        let commander = Commander::new();
        commander.register(
            "canal",
            "resync_tables",
            Box::new(|_params| Box::pin(async { Ok(None) })),
        );
        commander.register(
            "canal",
            "resync_tables",
            Box::new(|params| {
                Box::pin(async move { Ok(Some(format!("ok: {}", params["tables"][0]))) })
            }),
        );

        let reply = commander
            .dispatch("canal", "resync_tables", json!({"tables": ["db.t"]}))
            .await
            .unwrap();
        assert_eq!(reply, "ok: \"db.t\"");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_command() {
        let commander = Commander::new();
        let err = commander
            .dispatch("canal", "nope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Command(_)));
    }

    #[tokio::test]
    async fn test_dispatch_no_handler_succeeded() {
        let commander = Commander::new();
        commander.register(
            "canal",
            "sync_from_position",
            Box::new(|_params| Box::pin(async { Ok(None) })),
        );
        let err = commander
            .dispatch("canal", "sync_from_position", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Command(_)));
    }
}
