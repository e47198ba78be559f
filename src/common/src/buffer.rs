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

//! Size-or-time batch accumulator, keyed by sub-stream.
//!
//! `add` flushes a key on the calling task the moment its accumulated
//! weight reaches `max_size`; a background ticker flushes every key each
//! `flush_timeout`. Flushed batches land on a rendezvous channel, so the
//! downstream flusher must drain promptly. After [`BulkBuffer::stop`] the
//! background task performs one final flush of all keys and closes the
//! channel; the downstream observes the close and exits after draining.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// One buffered element with an explicit weight and grouping key.
#[derive(Debug, Clone)]
pub struct BulkItem<T> {
    pub data: T,
    pub size: usize,
    pub key: String,
}

struct BufferState<T> {
    buffers: HashMap<String, Vec<BulkItem<T>>>,
    sizes: HashMap<String, usize>,
    batches: Option<mpsc::Sender<Vec<BulkItem<T>>>>,
    max_size: usize,
}

impl<T> BufferState<T> {
    async fn flush_key(&mut self, key: &str) {
        let Some(batch) = self.buffers.remove(key) else {
            return;
        };
        self.sizes.remove(key);
        if batch.is_empty() {
            return;
        }
        if let Some(tx) = &self.batches {
            if tx.send(batch).await.is_err() {
                tracing::warn!(key, "bulk batch receiver dropped, batch lost");
            }
        }
    }

    async fn flush_all(&mut self) {
        let keys: Vec<String> = self.buffers.keys().cloned().collect();
        for key in keys {
            self.flush_key(&key).await;
        }
    }
}

pub struct BulkBuffer<T> {
    state: Arc<Mutex<BufferState<T>>>,
    shutdown: CancellationToken,
}

impl<T: Send + 'static> BulkBuffer<T> {
    /// Create the buffer and spawn its ticker task. Returns the receiver of
    /// flushed batches; it is closed after the final drain triggered by
    /// [`stop`](Self::stop).
    pub fn new(
        max_size: usize,
        flush_timeout: Duration,
    ) -> (Self, mpsc::Receiver<Vec<BulkItem<T>>>) {
        let (tx, rx) = mpsc::channel(1);
        let state = Arc::new(Mutex::new(BufferState {
            buffers: HashMap::new(),
            sizes: HashMap::new(),
            batches: Some(tx),
            max_size,
        }));
        let shutdown = CancellationToken::new();
        tokio::spawn(ticker_loop(state.clone(), shutdown.clone(), flush_timeout));
        (Self { state, shutdown }, rx)
    }

    pub async fn add(&self, item: BulkItem<T>) {
        let mut state = self.state.lock().await;
        let key = item.key.clone();
        *state.sizes.entry(key.clone()).or_default() += item.size;
        state.buffers.entry(key.clone()).or_default().push(item);
        if state.sizes[&key] >= state.max_size {
            state.flush_key(&key).await;
        }
    }

    /// Stop the ticker. The background task drains every key and closes the
    /// batch channel before exiting.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

async fn ticker_loop<T>(
    state: Arc<Mutex<BufferState<T>>>,
    shutdown: CancellationToken,
    flush_timeout: Duration,
) {
    let start = tokio::time::Instant::now() + flush_timeout;
    let mut ticker = tokio::time::interval_at(start, flush_timeout);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.lock().await.flush_all().await;
            }
            _ = shutdown.cancelled() => {
                let mut state = state.lock().await;
                state.flush_all().await;
                // Closing the channel tells the flusher no more batches
                // will arrive.
                state.batches = None;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn item(key: &str, size: usize, data: i32) -> BulkItem<i32> {
        BulkItem {
            data,
            size,
            key: key.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_size() {
        let (buffer, mut rx) = BulkBuffer::new(3, Duration::from_secs(60));

        buffer.add(item("a", 1, 1)).await;
        buffer.add(item("b", 1, 10)).await;
        buffer.add(item("a", 2, 2)).await;

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.iter().map(|i| i.data).collect::<Vec<_>>(), vec![1, 2]);
        assert!(batch.iter().all(|i| i.key == "a"));

        // Key "b" is below the threshold and stays buffered.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_timeout() {
        let (buffer, mut rx) = BulkBuffer::new(100, Duration::from_secs(5));
        buffer.add(item("a", 1, 7)).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_and_closes() {
        let (buffer, mut rx) = BulkBuffer::new(100, Duration::from_secs(60));
        buffer.add(item("a", 1, 1)).await;
        buffer.add(item("b", 1, 2)).await;
        buffer.stop();

        let mut seen = vec![];
        while let Some(batch) = rx.recv().await {
            seen.extend(batch.into_iter().map(|i| i.data));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
        // Channel closed after final drain; recv returned None above.
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_of_empty_key_is_noop() {
        let (buffer, mut rx) = BulkBuffer::<i32>::new(1, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        buffer.stop();
        assert!(rx.recv().await.is_none());
    }
}
