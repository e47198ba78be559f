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

//! HTTP admin endpoint: a health probe and the operator command
//! dispatcher.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use riverflow_common::command::Commander;
use riverflow_common::error::{FlowError, Result};

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(FlowError::config)
}

pub fn spawn(
    tracker: &TaskTracker,
    listener: TcpListener,
    commander: Arc<Commander>,
    shutdown: CancellationToken,
) {
    let app = router(commander);
    tracker.spawn(async move {
        let graceful = {
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
        {
            tracing::error!(error = %err, "http server failed");
            shutdown.cancel();
        }
    });
}

fn router(commander: Arc<Commander>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cmd", post(command))
        .with_state(commander)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    module: String,
    cmd: String,
    #[serde(default)]
    params: Value,
}

async fn command(
    State(commander): State<Arc<Commander>>,
    Json(request): Json<CommandRequest>,
) -> (StatusCode, String) {
    match commander
        .dispatch(&request.module, &request.cmd, request.params)
        .await
    {
        Ok(reply) => (StatusCode::OK, format!("command succeeded: {reply}")),
        Err(err) => (StatusCode::OK, format!("command failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_command_request_shape() {
        let request: CommandRequest = serde_json::from_str(
            r#"{"module": "canal", "cmd": "sync_from_position",
                "params": {"addr": "127.0.0.1:3306", "position": {"name": "mysql-bin.000003", "pos": 4}}}"#,
        )
        .unwrap();
        assert_eq!(request.module, "canal");
        assert_eq!(request.cmd, "sync_from_position");
        assert_eq!(request.params["position"]["pos"], 4);
    }

    #[test]
    fn test_command_request_params_default_to_null() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"module": "canal", "cmd": "resync_tables"}"#).unwrap();
        assert!(request.params.is_null());
    }
}
