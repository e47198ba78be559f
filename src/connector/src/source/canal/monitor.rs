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

//! Replication lag monitor.
//!
//! Every `monitor_inter` seconds the persisted cursor is compared with the
//! server's current position. A file mismatch on more than five
//! consecutive samples, or an offset delta beyond `delay_pos`, raises a
//! lag alert on the flow error channel.

use std::sync::Arc;

use anyhow::anyhow;
use std::time::Duration;

use riverflow_common::error::FlowError;

use super::{BinlogCursor, CanalDriver};

const FILE_MISMATCH_SAMPLES: u32 = 5;

pub(crate) async fn run(driver: Arc<CanalDriver>) {
    if driver.cfg.monitor_inter == 0 {
        return;
    }
    let period = Duration::from_secs(driver.cfg.monitor_inter);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut file_mismatches = 0u32;
    loop {
        tokio::select! {
            _ = driver.shutdown.cancelled() => return,
            _ = ticker.tick() => sample(&driver, &mut file_mismatches).await,
        }
    }
}

async fn sample(driver: &CanalDriver, file_mismatches: &mut u32) {
    let cached = match driver.cursor.load().await {
        Ok(cursor) => cursor.unwrap_or_default(),
        Err(err) => {
            driver.stream.report(FlowError::upstream(anyhow!(
                "canal monitoring get cached position failed: {err}"
            )));
            return;
        }
    };
    let current = match driver.current_position().await {
        Ok(cursor) => cursor,
        Err(err) => {
            driver.stream.report(FlowError::upstream(anyhow!(
                "canal monitoring get current position failed: {err}"
            )));
            return;
        }
    };

    if cached.file != current.file {
        *file_mismatches += 1;
        if *file_mismatches > FILE_MISMATCH_SAMPLES {
            report_lag(driver, &cached, &current);
        }
        return;
    }
    *file_mismatches = 0;
    let delta = current.offset.saturating_sub(cached.offset);
    if delta > driver.cfg.delay_pos {
        report_lag(driver, &cached, &current);
    }
}

fn report_lag(driver: &CanalDriver, cached: &BinlogCursor, current: &BinlogCursor) {
    driver.stream.report(FlowError::upstream(anyhow!(
        "canal monitoring sync delay, cached pos ({cached}) current pos ({current})"
    )));
}
