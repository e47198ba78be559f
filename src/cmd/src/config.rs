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

use std::path::Path;

use serde::Deserialize;

use riverflow_common::error::{FlowError, Result};
use riverflow_stream::FlowConfig;

fn default_daemon_key() -> String {
    // Matches the legacy default so existing Redis locks and monitoring
    // keep working.
    "go-data-flow-daemon".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_daemon_key")]
    pub daemon_key: String,
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
    pub redis: RedisConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(FlowError::config)?;
        serde_yaml::from_str(&raw).map_err(FlowError::config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_addr")]
    pub addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
        }
    }
}

impl HttpConfig {
    /// Bind address; a bare `:port` form binds every interface.
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// One of `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `stdout` or a file path.
    #[serde(default = "default_log_output")]
    pub output: String,
    /// Optional `host:port` collector mirroring every log line.
    #[serde(default)]
    pub udp: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
            udp: String::new(),
        }
    }
}

fn default_smtp_port() -> u16 {
    465
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub server: SmtpServer,
    #[serde(default)]
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpServer {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user_address: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub password: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_load_defaults() {
        let cfg: AppConfig = serde_yaml::from_str(
            r#"
redis:
  addr: 127.0.0.1:6379
"#,
        )
        .unwrap();
        assert_eq!(cfg.daemon_key, "go-data-flow-daemon");
        assert!(cfg.flows.is_empty());
        assert_eq!(cfg.http.addr, "0.0.0.0:8080");
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.output, "stdout");
        assert!(cfg.smtp.is_none());
    }

    #[test]
    fn test_redis_url_forms() {
        let plain = RedisConfig {
            addr: "127.0.0.1:6379".into(),
            password: String::new(),
            db: 0,
        };
        assert_eq!(plain.url(), "redis://127.0.0.1:6379/0");

        let auth = RedisConfig {
            addr: "127.0.0.1:6379".into(),
            password: "s3cret".into(),
            db: 2,
        };
        assert_eq!(auth.url(), "redis://:s3cret@127.0.0.1:6379/2");
    }

    #[test]
    fn test_listen_addr_normalization() {
        let bare = HttpConfig { addr: ":9090".into() };
        assert_eq!(bare.listen_addr(), "0.0.0.0:9090");
        let full = HttpConfig {
            addr: "127.0.0.1:9090".into(),
        };
        assert_eq!(full.listen_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn test_smtp_defaults() {
        let cfg: SmtpConfig = serde_yaml::from_str(
            r#"
server:
  host: smtp.example.com
  user_address: alerts@example.com
to: [ops@example.com]
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 465);
        assert_eq!(cfg.to.len(), 1);
    }
}
