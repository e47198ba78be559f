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

use thiserror::Error;

use crate::docpath::PathError;

pub type Result<T, E = FlowError> = std::result::Result<T, E>;

/// The error type flowing through event results and the per-flow error
/// channel. Variants map onto the recovery policy applied by the caller:
/// configuration and lock errors are fatal at startup, upstream errors are
/// retried with backoff, everything else is reported per event.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("config error: {0}")]
    Config(#[source] anyhow::Error),

    #[error("daemon lock contention: {0}")]
    LockContention(String),

    #[error("upstream error: {0}")]
    Upstream(#[source] anyhow::Error),

    #[error("convert {schema}.{table} column {column} value {value} failed: {reason}")]
    Schema {
        schema: String,
        table: String,
        column: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("invalid event action: {0}")]
    InvalidAction(String),

    #[error("{sink} sink error: {source}")]
    Sink {
        sink: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("command error: {0}")]
    Command(String),
}

impl FlowError {
    pub fn config(err: impl Into<anyhow::Error>) -> Self {
        Self::Config(err.into())
    }

    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        Self::Upstream(err.into())
    }

    pub fn sink(sink: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self::Sink {
            sink,
            source: err.into(),
        }
    }
}
