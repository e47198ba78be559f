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

//! The stream protocol binding one input to the worker pool of a flow.
//!
//! For every event pushed into the stream the producer blocks until the
//! terminal [`EventResult`] comes back, so at most one event is in flight
//! per flow and backpressure propagates all the way to the input. The error
//! channel is fan-in only and carries out-of-band failures (monitor alerts,
//! reconnect errors, sink flush failures) to the process alerter.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, Mutex};

use crate::error::{FlowError, Result};
use crate::event::{Event, EventResult};

pub type ErrorReceiver = mpsc::UnboundedReceiver<FlowError>;

/// Create the channel triple for one flow.
pub fn stream() -> (StreamHandle, WorkerHandle, ErrorReceiver) {
    let (event_tx, event_rx) = mpsc::channel(1);
    let (result_tx, result_rx) = mpsc::channel(1);
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    (
        StreamHandle {
            exchange: Arc::new(Mutex::new(Exchange {
                events: event_tx,
                results: result_rx,
            })),
            errors: error_tx,
        },
        WorkerHandle {
            events: Arc::new(Mutex::new(event_rx)),
            results: result_tx,
        },
        error_rx,
    )
}

struct Exchange {
    events: mpsc::Sender<Event>,
    results: mpsc::Receiver<EventResult>,
}

/// The producer end, held by the input. Cloneable so that background
/// producers (a resync snapshot running beside the binlog tail) share the
/// same exchange; the inner mutex keeps their request/response pairs from
/// interleaving.
#[derive(Clone)]
pub struct StreamHandle {
    exchange: Arc<Mutex<Exchange>>,
    errors: mpsc::UnboundedSender<FlowError>,
}

impl StreamHandle {
    /// Push one event and wait for its terminal result.
    pub async fn dispatch(&self, event: Event) -> Result<()> {
        let mut exchange = self.exchange.lock().await;
        exchange
            .events
            .send(event)
            .await
            .map_err(|_| FlowError::upstream(anyhow!("stream closed")))?;
        match exchange.results.recv().await {
            Some(result) => result.into_result(),
            None => Err(FlowError::upstream(anyhow!("stream closed"))),
        }
    }

    /// Fan an out-of-band error in to the flow's alert path.
    pub fn report(&self, err: FlowError) {
        if self.errors.send(err).is_err() {
            tracing::warn!("flow error channel closed, alert dropped");
        }
    }

    /// A sender for the same fan-in channel, handed to components (sink
    /// flushers) that outlive a single dispatch.
    pub fn error_sender(&self) -> mpsc::UnboundedSender<FlowError> {
        self.errors.clone()
    }
}

/// The consumer end, shared by the flow's workers. Receiving is serialized
/// through a mutex so any number of workers may race for the next event
/// while per-flow ordering is preserved.
#[derive(Clone)]
pub struct WorkerHandle {
    events: Arc<Mutex<mpsc::Receiver<Event>>>,
    results: mpsc::Sender<EventResult>,
}

impl WorkerHandle {
    /// Receive the next event, or `None` once the input hung up.
    pub async fn next(&self) -> Option<Event> {
        self.events.lock().await.recv().await
    }

    /// Deliver the terminal result for the event received last. Must be
    /// called exactly once per received event.
    pub async fn finish(&self, result: EventResult) {
        if self.results.send(result).await.is_err() {
            tracing::warn!("stream result receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let (handle, worker, _errors) = stream();

        let echo = tokio::spawn(async move {
            let mut seen = vec![];
            while let Some(event) = worker.next().await {
                seen.push(event.topic.clone());
                worker.finish(EventResult::ok()).await;
            }
            seen
        });

        for i in 0..3 {
            let event = Event::new(format!("t{i}"), vec![json!({})], CancellationToken::new());
            handle.dispatch(event).await.unwrap();
        }
        drop(handle);

        assert_eq!(echo.await.unwrap(), vec!["t0", "t1", "t2"]);
    }

    #[tokio::test]
    async fn test_dispatch_surfaces_worker_error() {
        let (handle, worker, _errors) = stream();

        tokio::spawn(async move {
            while let Some(_event) = worker.next().await {
                worker
                    .finish(EventResult::from_result(Err(FlowError::InvalidAction(
                        "truncate".into(),
                    ))))
                    .await;
            }
        });

        let err = handle
            .dispatch(Event::default())
            .await
            .expect_err("worker error must surface to the producer");
        assert!(matches!(err, FlowError::InvalidAction(_)));
    }

    #[tokio::test]
    async fn test_error_fan_in() {
        let (handle, _worker, mut errors) = stream();
        handle.report(FlowError::Command("boom".into()));
        let err = errors.recv().await.unwrap();
        assert!(matches!(err, FlowError::Command(_)));
    }
}
