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

//! The canal driver: replicates a configured set of MySQL tables as a
//! strictly-ordered sequence of CDC events, resuming from a persisted
//! binlog cursor across restarts.
//!
//! Per run iteration: load the cursor; when none exists, read the current
//! position with `SHOW MASTER STATUS`, snapshot every watched table, then
//! tail the binlog from that position. Transient replication errors back
//! off with doubling delay; after ten consecutive failures the driver
//! parks until an operator repositions it through `sync_from_position`.
//! While a snapshot copies rows the increment gate is closed, so binlog
//! rows arriving concurrently wait instead of racing the bulk copy.

mod cursor;
mod meta;
mod monitor;
mod row;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use itertools::Itertools;
use mysql_async::binlog::events::{Event as BinlogEvent, EventData, RowsEventData};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::prelude::Queryable;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn, Opts, OptsBuilder, Pool, Row};
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use riverflow_common::command::Commander;
use riverflow_common::error::{FlowError, Result};
use riverflow_common::event::{Event, EventAction};
use riverflow_common::stream::StreamHandle;

pub use cursor::{BinlogCursor, CursorStore, RedisCursorStore};
pub use meta::{ColumnKind, ColumnMeta, TableMeta, TableMetaCache};
pub use row::{normalize_row, normalize_value};

use super::SourceContext;

const MAX_RETRIES: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const SNAPSHOT_PAGE_PAUSE: Duration = Duration::from_secs(2);
const DISPATCH_CHUNK: usize = 10;

fn default_delay_pos() -> u32 {
    1_000_000
}

fn default_page_size() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanalConfig {
    pub addr: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub server_id: u32,
    #[serde(default)]
    pub include_table_regex: Vec<String>,
    #[serde(default)]
    pub exclude_table_regex: Vec<String>,
    /// Lag monitor interval in seconds; 0 disables the monitor.
    #[serde(default)]
    pub monitor_inter: u64,
    /// Offset delta beyond which the monitor raises a lag alert.
    #[serde(default = "default_delay_pos")]
    pub delay_pos: u32,
    /// Actions dropped from the binlog tail.
    #[serde(default)]
    pub filter_actions: Vec<String>,
    #[serde(default = "default_page_size")]
    pub full_sync_page_size: usize,
}

/// Latch closed for the duration of a snapshot. Binlog-origin dispatch
/// waits on it so the bulk copy and the tail never interleave writes for
/// the same row.
struct Gate {
    state: watch::Sender<bool>,
}

struct GateGuard<'a>(&'a Gate);

impl Gate {
    fn new() -> Self {
        Self {
            state: watch::channel(true).0,
        }
    }

    fn close(&self) -> GateGuard<'_> {
        self.state.send_replace(false);
        GateGuard(self)
    }

    async fn wait_open(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.state.send_replace(true);
    }
}

enum TailExit {
    Shutdown,
    Reposition,
}

pub struct CanalDriver {
    pub(crate) cfg: CanalConfig,
    pool: Pool,
    pub(crate) cursor: Arc<dyn CursorStore>,
    pub(crate) stream: StreamHandle,
    meta: TableMetaCache,
    watched: RwLock<HashMap<String, (String, String)>>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    filter_actions: HashSet<String>,
    gate: Gate,
    restart: Notify,
    reconnect: Notify,
    pub(crate) shutdown: CancellationToken,
}

impl CanalDriver {
    pub async fn connect(
        cfg: CanalConfig,
        cursor: Arc<dyn CursorStore>,
        stream: StreamHandle,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        let include = compile_patterns(&cfg.include_table_regex).map_err(FlowError::config)?;
        let exclude = compile_patterns(&cfg.exclude_table_regex).map_err(FlowError::config)?;
        let pool = Pool::new(build_opts(&cfg));
        let mut conn = pool.get_conn().await.map_err(FlowError::config)?;
        conn.ping().await.map_err(FlowError::config)?;
        drop(conn);

        Ok(Arc::new(Self {
            meta: TableMetaCache::new(pool.clone()),
            filter_actions: cfg.filter_actions.iter().cloned().collect(),
            cfg,
            pool,
            cursor,
            stream,
            watched: RwLock::new(HashMap::new()),
            include,
            exclude,
            gate: Gate::new(),
            restart: Notify::new(),
            reconnect: Notify::new(),
            shutdown,
        }))
    }

    pub fn addr(&self) -> &str {
        &self.cfg.addr
    }

    /// Release the replication client; [`run`](Self::run) returns. The
    /// hosting flow's shutdown propagates here automatically.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// The replication loop. Returns on shutdown or an unrecoverable
    /// error; transient failures are reported and retried inside.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let mut try_cnt = 0u32;
        let mut backoff = INITIAL_BACKOFF;
        while !self.shutdown.is_cancelled() {
            self.refresh_watched_tables().await?;
            let cursor = match self.cursor.load().await? {
                Some(cursor) => cursor,
                None => {
                    let current = self.current_position().await?;
                    self.snapshot(&self.watched_tables()).await?;
                    self.cursor.force_save(&current).await?;
                    current
                }
            };

            if try_cnt > MAX_RETRIES {
                self.stream
                    .report(FlowError::upstream(anyhow!("maximum retry attempts reached")));
                tokio::select! {
                    _ = self.restart.notified() => {
                        try_cnt = 0;
                        backoff = INITIAL_BACKOFF;
                        continue;
                    }
                    _ = self.shutdown.cancelled() => return Ok(()),
                }
            }

            tracing::info!(addr = %self.cfg.addr, %cursor, "tailing binlog");
            match self.tail(cursor).await {
                Ok(TailExit::Shutdown) => return Ok(()),
                Ok(TailExit::Reposition) => {
                    try_cnt = 0;
                    backoff = INITIAL_BACKOFF;
                }
                Err(err) => {
                    tracing::warn!(addr = %self.cfg.addr, error = %err, "binlog tail failed");
                    self.stream.report(err);
                    try_cnt += 1;
                    backoff *= 2;
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.shutdown.cancelled() => return Ok(()),
                    }
                }
            }
        }
        Ok(())
    }

    async fn tail(&self, from: BinlogCursor) -> Result<TailExit> {
        let conn = Conn::new(build_opts(&self.cfg))
            .await
            .map_err(FlowError::upstream)?;
        let request = BinlogStreamRequest::new(self.cfg.server_id)
            .with_filename(from.file.as_bytes())
            .with_pos(u64::from(from.offset));
        let mut binlog = conn
            .get_binlog_stream(request)
            .await
            .map_err(FlowError::upstream)?;
        let mut file = from.file;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(TailExit::Shutdown),
                _ = self.reconnect.notified() => return Ok(TailExit::Reposition),
                event = binlog.next() => {
                    let Some(event) = event else {
                        return Err(FlowError::upstream(anyhow!("binlog stream closed by server")));
                    };
                    let event = event.map_err(FlowError::upstream)?;
                    self.handle_binlog_event(&binlog, event, &mut file).await?;
                }
            }
        }
    }

    async fn handle_binlog_event(
        &self,
        binlog: &BinlogStream,
        event: BinlogEvent,
        file: &mut String,
    ) -> Result<()> {
        let next_pos = event.header().log_pos();
        let Some(data) = event.read_data().map_err(FlowError::upstream)? else {
            return Ok(());
        };
        match data {
            EventData::RotateEvent(rotate) => {
                *file = rotate.name().to_string();
                let cursor = BinlogCursor::new(file.clone(), rotate.position() as u32);
                tracing::debug!(%cursor, "binlog rotated");
                self.cursor.force_save(&cursor).await?;
            }
            EventData::QueryEvent(_) => {
                // DDL: cached metadata may be stale, re-fetch on next use.
                self.meta.invalidate_all();
                self.cursor
                    .save(&BinlogCursor::new(file.clone(), next_pos))
                    .await?;
            }
            EventData::XidEvent(_) => {
                self.cursor
                    .save(&BinlogCursor::new(file.clone(), next_pos))
                    .await?;
            }
            EventData::RowsEvent(rows_event) => {
                self.handle_rows_event(binlog, &rows_event).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_rows_event(
        &self,
        binlog: &BinlogStream,
        rows_event: &RowsEventData<'_>,
    ) -> Result<()> {
        let action = match rows_event {
            RowsEventData::WriteRowsEvent(_) | RowsEventData::WriteRowsEventV1(_) => {
                EventAction::Insert
            }
            RowsEventData::UpdateRowsEvent(_)
            | RowsEventData::UpdateRowsEventV1(_)
            | RowsEventData::PartialUpdateRowsEvent(_) => EventAction::Update,
            RowsEventData::DeleteRowsEvent(_) | RowsEventData::DeleteRowsEventV1(_) => {
                EventAction::Delete
            }
            _ => return Ok(()),
        };
        if self.filter_actions.contains(action.to_string().as_str()) {
            return Ok(());
        }

        let tme = binlog.get_tme(rows_event.table_id()).ok_or_else(|| {
            FlowError::upstream(anyhow!(
                "no table map event for table id {}",
                rows_event.table_id()
            ))
        })?;
        let schema = tme.database_name().to_string();
        let table = tme.table_name().to_string();
        if !self.is_watched(&schema, &table) {
            return Ok(());
        }

        // Hold binlog-origin rows back while a snapshot is copying.
        self.gate.wait_open().await;

        let meta = self.meta.get(&schema, &table).await?;
        let mut rows = Vec::new();
        for decoded in rows_event.rows(tme) {
            let (before, after) = decoded.map_err(FlowError::upstream)?;
            let image = match action {
                EventAction::Delete => before,
                _ => after,
            };
            let Some(image) = image else { continue };
            rows.push(normalize_binlog_row(&meta, &image)?);
        }
        self.dispatch(&schema, &table, action, rows).await
    }

    async fn dispatch(
        &self,
        schema: &str,
        table: &str,
        action: EventAction,
        rows: Vec<Value>,
    ) -> Result<()> {
        let full_name = format!("{schema}.{table}");
        for chunk in rows.chunks(DISPATCH_CHUNK) {
            let event = Event::cdc(
                &self.cfg.addr,
                action,
                &full_name,
                chunk.to_vec(),
                self.shutdown.child_token(),
            );
            self.stream.dispatch(event).await?;
        }
        Ok(())
    }

    async fn snapshot(&self, tables: &[(String, String)]) -> Result<()> {
        let _guard = self.gate.close();
        for (schema, table) in tables {
            let meta = self.meta.get(schema, table).await?;
            let mut offset = 0usize;
            loop {
                if self.shutdown.is_cancelled() {
                    return Ok(());
                }
                let page = self.fetch_page(&meta, offset).await?;
                if page.is_empty() {
                    break;
                }
                let fetched = page.len();
                self.dispatch(schema, table, EventAction::Insert, page).await?;
                tracing::info!(schema, table, offset, rows = fetched, "synced a page of full data");
                offset += self.cfg.full_sync_page_size;
                // Pace the copy so the upstream is not saturated.
                tokio::select! {
                    _ = tokio::time::sleep(SNAPSHOT_PAGE_PAUSE) => {}
                    _ = self.shutdown.cancelled() => return Ok(()),
                }
            }
        }
        Ok(())
    }

    async fn fetch_page(&self, meta: &TableMeta, offset: usize) -> Result<Vec<Value>> {
        let mut conn = self.pool.get_conn().await.map_err(FlowError::upstream)?;
        let query = format!(
            "SELECT * FROM `{}`.`{}` LIMIT {} OFFSET {}",
            meta.schema, meta.name, self.cfg.full_sync_page_size, offset
        );
        let rows: Vec<Row> = conn.query(&query).await.map_err(FlowError::upstream)?;
        rows.into_iter()
            .map(|row| normalize_row(meta, row.unwrap()))
            .collect()
    }

    pub(crate) async fn current_position(&self) -> Result<BinlogCursor> {
        let mut conn = self.pool.get_conn().await.map_err(FlowError::upstream)?;
        let row: Option<Row> = conn
            .query_first("SHOW MASTER STATUS")
            .await
            .map_err(FlowError::upstream)?;
        let row =
            row.ok_or_else(|| FlowError::upstream(anyhow!("empty result from SHOW MASTER STATUS")))?;
        let file: String = row
            .get(0)
            .ok_or_else(|| FlowError::upstream(anyhow!("malformed SHOW MASTER STATUS result")))?;
        let offset: u64 = row
            .get(1)
            .ok_or_else(|| FlowError::upstream(anyhow!("malformed SHOW MASTER STATUS result")))?;
        Ok(BinlogCursor::new(file, offset as u32))
    }

    async fn binary_log_files(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.get_conn().await.map_err(FlowError::upstream)?;
        let rows: Vec<Row> = conn
            .query("SHOW BINARY LOGS")
            .await
            .map_err(FlowError::upstream)?;
        Ok(rows.into_iter().filter_map(|row| row.get(0)).collect())
    }

    /// Validate the position against the server's binary log listing, then
    /// persist it and force the tail to reconnect from it. Also unparks a
    /// driver blocked on exhausted retries.
    pub async fn sync_from_position(&self, cursor: BinlogCursor) -> Result<()> {
        if !self.binary_log_files().await?.contains(&cursor.file) {
            return Err(FlowError::Command(format!(
                "binlog file {} does not exist on the server",
                cursor.file
            )));
        }
        self.cursor.force_save(&cursor).await?;
        // notify_one stores a permit, so a reposition issued between two
        // waits is not lost.
        self.restart.notify_one();
        self.reconnect.notify_one();
        tracing::info!(addr = %self.cfg.addr, %cursor, "repositioned by operator");
        Ok(())
    }

    /// Snapshot the named subset of the watched tables in the background.
    /// The binlog tail keeps running. Returns whether anything matched.
    pub fn resync_tables(self: &Arc<Self>, names: &[String]) -> bool {
        let watched = self.watched.read();
        let tables: Vec<(String, String)> = names
            .iter()
            .filter_map(|name| watched.get(name).cloned())
            .collect();
        drop(watched);
        self.spawn_resync(tables)
    }

    /// Same as [`resync_tables`](Self::resync_tables) with regex patterns
    /// over the full `schema.table` names.
    pub fn resync_tables_regex(self: &Arc<Self>, patterns: &[String]) -> Result<bool> {
        let regexes =
            compile_patterns(patterns).map_err(|e| FlowError::Command(e.to_string()))?;
        let watched = self.watched.read();
        let tables: Vec<(String, String)> = watched
            .iter()
            .filter(|(full_name, _)| regexes.iter().any(|r| r.is_match(full_name)))
            .map(|(_, table)| table.clone())
            .collect();
        drop(watched);
        Ok(self.spawn_resync(tables))
    }

    fn spawn_resync(self: &Arc<Self>, tables: Vec<(String, String)>) -> bool {
        if tables.is_empty() {
            return false;
        }
        let driver = self.clone();
        tokio::spawn(async move {
            if let Err(err) = driver.snapshot(&tables).await {
                driver.stream.report(err);
            }
        });
        true
    }

    async fn refresh_watched_tables(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await.map_err(FlowError::upstream)?;
        let all: Vec<(String, String)> = conn
            .query("SELECT table_schema, table_name FROM information_schema.tables")
            .await
            .map_err(FlowError::upstream)?;

        let mut watched = HashMap::new();
        for (schema, table) in all {
            let full_name = format!("{schema}.{table}");
            if !self.include.iter().any(|r| r.is_match(&full_name)) {
                continue;
            }
            if self.exclude.iter().any(|r| r.is_match(&full_name)) {
                continue;
            }
            watched.insert(full_name, (schema, table));
        }
        tracing::info!(
            addr = %self.cfg.addr,
            tables = %watched.keys().sorted().join(", "),
            "tables to sync"
        );
        *self.watched.write() = watched;
        Ok(())
    }

    fn is_watched(&self, schema: &str, table: &str) -> bool {
        self.watched
            .read()
            .contains_key(&format!("{schema}.{table}"))
    }

    fn watched_tables(&self) -> Vec<(String, String)> {
        self.watched.read().values().cloned().collect()
    }
}

fn normalize_binlog_row(meta: &TableMeta, image: &BinlogRow) -> Result<Value> {
    let values = (0..image.len())
        .map(|idx| match image.as_ref(idx) {
            Some(value) => binlog_value_to_sql(value),
            None => mysql_async::Value::NULL,
        })
        .collect();
    normalize_row(meta, values)
}

fn binlog_value_to_sql(value: &BinlogValue<'_>) -> mysql_async::Value {
    match value {
        BinlogValue::Value(v) => v.clone(),
        BinlogValue::Jsonb(v) => match serde_json::Value::try_from(v.clone()) {
            Ok(json) => mysql_async::Value::Bytes(json.to_string().into_bytes()),
            Err(_) => mysql_async::Value::Bytes(format!("{v:?}").into_bytes()),
        },
        other => mysql_async::Value::Bytes(format!("{other:?}").into_bytes()),
    }
}

fn compile_patterns(patterns: &[String]) -> std::result::Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|raw| Regex::new(raw)).collect()
}

fn build_opts(cfg: &CanalConfig) -> Opts {
    let (host, port) = match cfg.addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(3306)),
        None => (cfg.addr.clone(), 3306),
    };
    OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(cfg.user.clone()))
        .pass((!cfg.password.is_empty()).then(|| cfg.password.clone()))
        .into()
}

/// The canal input: the driver plus its lag monitor, wired to the command
/// registry.
pub struct CanalSource {
    driver: Arc<CanalDriver>,
}

impl CanalSource {
    pub async fn new(
        cfg: CanalConfig,
        ctx: &SourceContext,
        stream: StreamHandle,
    ) -> Result<Self> {
        let cursor = Arc::new(RedisCursorStore::new(ctx.redis.clone(), "flow", &cfg.addr));
        let driver = CanalDriver::connect(cfg, cursor, stream, ctx.shutdown.child_token()).await?;
        register_commands(&driver, &ctx.commander);
        Ok(Self { driver })
    }

    pub async fn run(self) {
        let driver = self.driver;
        let replication = async {
            if let Err(err) = driver.run().await {
                tracing::error!(addr = %driver.addr(), error = %err, "canal driver stopped");
                driver.stream.report(err);
            }
        };
        tokio::join!(replication, monitor::run(driver.clone()));
    }
}

fn register_commands(driver: &Arc<CanalDriver>, commander: &Commander) {
    #[derive(Deserialize, Default)]
    struct ResyncRequest {
        #[serde(default)]
        tables: Vec<String>,
        #[serde(default)]
        regx_tables: Vec<String>,
    }

    // The commander outlives the flow; weak handles keep a dead driver
    // from being pinned in memory by its registered commands.
    let resync_driver = Arc::downgrade(driver);
    commander.register(
        "canal",
        "resync_tables",
        Box::new(move |params| {
            let driver = resync_driver.clone();
            Box::pin(async move {
                let Some(driver) = driver.upgrade() else {
                    return Ok(None);
                };
                let req: ResyncRequest = serde_json::from_value(params)
                    .map_err(|e| FlowError::Command(e.to_string()))?;
                if req.tables.is_empty() && req.regx_tables.is_empty() {
                    return Ok(Some("table names must not be empty".to_string()));
                }
                let mut matched = driver.resync_tables(&req.tables);
                matched |= driver.resync_tables_regex(&req.regx_tables)?;
                if matched {
                    Ok(Some("resync command submitted".to_string()))
                } else {
                    Ok(None)
                }
            })
        }),
    );

    #[derive(Deserialize)]
    struct SyncFromPositionRequest {
        #[serde(default)]
        addr: String,
        position: BinlogCursor,
    }

    let position_driver = Arc::downgrade(driver);
    commander.register(
        "canal",
        "sync_from_position",
        Box::new(move |params| {
            let driver = position_driver.clone();
            Box::pin(async move {
                let Some(driver) = driver.upgrade() else {
                    return Ok(None);
                };
                let req: SyncFromPositionRequest = serde_json::from_value(params)
                    .map_err(|e| FlowError::Command(e.to_string()))?;
                if req.addr.is_empty() {
                    return Ok(Some("canal address must not be empty".to_string()));
                }
                if req.position.file.is_empty() || req.position.offset == 0 {
                    return Ok(Some("invalid binlog position".to_string()));
                }
                if req.addr != driver.addr() {
                    return Ok(None);
                }
                driver.sync_from_position(req.position).await?;
                Ok(Some("command submitted successfully".to_string()))
            })
        }),
    );
}

#[cfg(test)]
mod tests {
    use futures::poll;

    use super::*;

    #[test]
    fn test_build_opts_parses_addr() {
        let cfg = CanalConfig {
            addr: "10.0.0.5:3307".into(),
            user: "repl".into(),
            password: "secret".into(),
            server_id: 1001,
            include_table_regex: vec![],
            exclude_table_regex: vec![],
            monitor_inter: 0,
            delay_pos: default_delay_pos(),
            filter_actions: vec![],
            full_sync_page_size: default_page_size(),
        };
        let opts = build_opts(&cfg);
        assert_eq!(opts.ip_or_hostname(), "10.0.0.5");
        assert_eq!(opts.tcp_port(), 3307);
    }

    #[tokio::test]
    async fn test_gate_blocks_until_reopened() {
        let gate = Gate::new();
        let guard = gate.close();

        let wait = gate.wait_open();
        tokio::pin!(wait);
        assert!(poll!(wait.as_mut()).is_pending());

        drop(guard);
        wait.await;
    }

    #[tokio::test]
    async fn test_gate_open_passes_through() {
        let gate = Gate::new();
        gate.wait_open().await;
    }

    #[test]
    fn test_config_defaults() {
        let cfg: CanalConfig = serde_yaml::from_str(
            "addr: 127.0.0.1:3306\nuser: repl\nserver_id: 1\n",
        )
        .unwrap();
        assert_eq!(cfg.delay_pos, 1_000_000);
        assert_eq!(cfg.full_sync_page_size, 1000);
        assert_eq!(cfg.monitor_inter, 0);
    }
}
