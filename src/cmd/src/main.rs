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

//! The riverflow binary: stream MySQL binlog changes through per-flow
//! transform chains into downstream sinks.

mod alert;
mod config;
mod lock;
mod logger;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use riverflow_common::command::Commander;
use riverflow_common::error::{FlowError, Result};
use riverflow_stream::{Flow, FlowContext};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "riverflow", about = "Stream MySQL binlog changes to downstream sinks.")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("riverflow: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = AppConfig::load(&args.config)?;
    logger::init(&cfg.log)?;
    tracing::info!(config = %args.config.display(), "configuration loaded");

    let redis_client = redis::Client::open(cfg.redis.url()).map_err(FlowError::config)?;
    let redis = redis_client
        .get_multiplexed_async_connection()
        .await
        .map_err(FlowError::config)?;

    let daemon_lock = lock::DaemonLock::acquire(redis.clone(), cfg.daemon_key.clone()).await?;

    // Bind the admin endpoint before starting any flow so a bad address
    // fails startup instead of surfacing minutes later.
    let listener = server::bind(&cfg.http.listen_addr()).await?;

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    daemon_lock.spawn_refresh(&tracker, shutdown.clone());

    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    alert::spawn_alerter(&tracker, cfg.smtp.clone(), cfg.daemon_key.clone(), alert_rx);

    let commander = Arc::new(Commander::new());
    let flow_ctx = FlowContext {
        redis,
        commander: commander.clone(),
        shutdown: shutdown.clone(),
        tracker: tracker.clone(),
    };
    for flow_cfg in cfg.flows {
        let flow = Flow::build(flow_cfg, &flow_ctx).await?;
        flow.spawn(&tracker, alert_tx.clone());
    }
    drop(alert_tx);

    server::spawn(&tracker, listener, commander, shutdown.clone());

    wait_for_signal(&shutdown).await?;

    tracker.close();
    tracker.wait().await;
    daemon_lock.release().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown: &CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(FlowError::config)?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = shutdown.cancelled() => tracing::info!("internal shutdown requested"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received interrupt, shutting down"),
            _ = shutdown.cancelled() => tracing::info!("internal shutdown requested"),
        }
    }
    shutdown.cancel();
    Ok(())
}
