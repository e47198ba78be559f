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

//! SMTP alerting: every error fanned in from the flows is mailed to the
//! configured recipients. Without SMTP configuration errors are only
//! logged.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use riverflow_common::error::{FlowError, Result};

use crate::config::SmtpConfig;

pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    subject: String,
}

impl Mailer {
    pub fn new(cfg: &SmtpConfig, daemon_key: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.server.host)
            .map_err(FlowError::config)?
            .port(cfg.server.port)
            .credentials(Credentials::new(
                cfg.server.user_address.clone(),
                cfg.server.password.clone(),
            ))
            .build();
        let address = cfg
            .server
            .user_address
            .parse()
            .map_err(FlowError::config)?;
        let from = Mailbox::new(
            (!cfg.server.user_name.is_empty()).then(|| cfg.server.user_name.clone()),
            address,
        );
        let to = cfg
            .to
            .iter()
            .map(|raw| raw.parse().map_err(FlowError::config))
            .collect::<Result<Vec<Mailbox>>>()?;
        Ok(Self {
            transport,
            from,
            to,
            subject: format!("{daemon_key}:Data Flow Error Alert"),
        })
    }

    pub async fn send(&self, body: &str) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.subject.clone())
            .header(ContentType::TEXT_HTML);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        let email = builder
            .body(body.to_string())
            .map_err(FlowError::upstream)?;
        self.transport
            .send(email)
            .await
            .map_err(FlowError::upstream)?;
        tracing::info!(subject = %self.subject, "sent alert mail");
        Ok(())
    }
}

/// Drain the process alert channel until every flow hung up.
pub fn spawn_alerter(
    tracker: &TaskTracker,
    smtp: Option<SmtpConfig>,
    daemon_key: String,
    mut alerts: mpsc::UnboundedReceiver<FlowError>,
) {
    tracker.spawn(async move {
        let mailer = match smtp.as_ref() {
            Some(cfg) => match Mailer::new(cfg, &daemon_key) {
                Ok(mailer) => Some(mailer),
                Err(err) => {
                    tracing::error!(error = %err, "smtp alerting disabled: invalid configuration");
                    None
                }
            },
            None => None,
        };
        while let Some(err) = alerts.recv().await {
            match &mailer {
                Some(mailer) => {
                    if let Err(mail_err) = mailer.send(&err.to_string()).await {
                        tracing::error!(
                            alert = %err,
                            error = %mail_err,
                            "failed to deliver alert mail"
                        );
                    }
                }
                None => tracing::error!(error = %err, "flow error"),
            }
        }
    });
}
