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

//! Logger initialization for the riverflow binary.
//!
//! Structured logs go to stdout or a file per configuration; an optional
//! UDP writer mirrors every line to a remote collector. Third-party crates
//! are capped at WARN so the binlog hot path stays readable.

use std::fs::File;
use std::io::{self, Write};
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tracing::Level;
use tracing_subscriber::filter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

use riverflow_common::error::{FlowError, Result};

use crate::config::LogConfig;

pub fn init(cfg: &LogConfig) -> Result<()> {
    let level = parse_level(&cfg.level)?;
    let sink = LogSink::new(cfg)?;

    let filter = filter::Targets::new()
        .with_target("hyper", Level::WARN)
        .with_target("h2", Level::WARN)
        .with_target("tower", Level::WARN)
        .with_target("rdkafka", Level::WARN)
        .with_target("librdkafka", Level::WARN)
        .with_default(level);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_ansi(false)
        .with_writer(sink);

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .init();
    Ok(())
}

fn parse_level(raw: &str) -> Result<Level> {
    match raw {
        "debug" => Ok(Level::DEBUG),
        "info" | "" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(FlowError::config(anyhow!("unknown log level: {other}"))),
    }
}

#[derive(Clone)]
pub struct LogSink {
    file: Option<Arc<Mutex<File>>>,
    udp: Option<Arc<UdpSocket>>,
}

impl LogSink {
    fn new(cfg: &LogConfig) -> Result<Self> {
        let file = if cfg.output == "stdout" {
            None
        } else {
            let file = File::create(&cfg.output).map_err(FlowError::config)?;
            Some(Arc::new(Mutex::new(file)))
        };
        let udp = if cfg.udp.is_empty() {
            None
        } else {
            let socket = UdpSocket::bind("0.0.0.0:0").map_err(FlowError::config)?;
            socket.connect(&cfg.udp).map_err(FlowError::config)?;
            Some(Arc::new(socket))
        };
        Ok(Self { file, udp })
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file: self.file.clone(),
            udp: self.udp.clone(),
        }
    }
}

pub struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
    udp: Option<Arc<UdpSocket>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Collector delivery is best effort; a full or absent receiver
        // must not stall logging.
        if let Some(udp) = &self.udp {
            let _ = udp.send(buf);
        }
        match &self.file {
            Some(file) => match file.lock() {
                Ok(mut file) => file.write(buf),
                Err(_) => Ok(buf.len()),
            },
            None => io::stdout().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &self.file {
            Some(file) => match file.lock() {
                Ok(mut file) => file.flush(),
                Err(_) => Ok(()),
            },
            None => io::stdout().flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("").unwrap(), Level::INFO);
        assert!(parse_level("verbose").is_err());
    }
}
