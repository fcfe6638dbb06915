// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Throughput-adaptive batching of items read from an mpsc channel.
//!
//! A [`ThroughputMonitor`] tracks how many items recent batches carried over
//! a sliding window and classifies the rate into a [`ThroughputLevel`]. The
//! [`AdaptiveBatcher`] picks its target batch size and wait time from that
//! level: small and fast when idle, large and patient under burst load.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Observed message rate class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThroughputLevel {
    /// Under 1 msg/s.
    Idle,
    /// 1 to 100 msg/s.
    Low,
    /// 100 to 1,000 msg/s.
    Medium,
    /// 1,000 to 10,000 msg/s.
    High,
    /// 10,000 msg/s and up.
    Burst,
}

impl ThroughputLevel {
    /// Classify a rate in messages per second.
    pub fn from_rate(msgs_per_sec: f64) -> Self {
        match msgs_per_sec {
            r if r < 1.0 => ThroughputLevel::Idle,
            r if r < 100.0 => ThroughputLevel::Low,
            r if r < 1_000.0 => ThroughputLevel::Medium,
            r if r < 10_000.0 => ThroughputLevel::High,
            _ => ThroughputLevel::Burst,
        }
    }
}

/// Batcher tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveBatchConfig {
    /// Largest batch ever produced.
    pub max_batch_size: usize,
    /// Target batch size when idle.
    pub min_batch_size: usize,
    /// Longest wait for a batch to fill.
    pub max_wait_time: Duration,
    /// Wait for a batch to fill when idle.
    pub min_wait_time: Duration,
    /// Sliding window of the throughput monitor.
    pub throughput_window: Duration,
    /// When false the batcher always uses the idle parameters.
    pub adaptive_enabled: bool,
}

impl Default for AdaptiveBatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            min_batch_size: 10,
            max_wait_time: Duration::from_millis(100),
            min_wait_time: Duration::from_millis(1),
            throughput_window: Duration::from_secs(5),
            adaptive_enabled: true,
        }
    }
}

impl AdaptiveBatchConfig {
    /// Target batch size and fill wait for `level`.
    pub fn parameters(&self, level: ThroughputLevel) -> (usize, Duration) {
        let min = self.min_batch_size.max(1);
        let max = self.max_batch_size.max(min);
        let span = max - min;
        let clamp = |ms: u64| {
            Duration::from_millis(ms)
                .max(self.min_wait_time)
                .min(self.max_wait_time.max(self.min_wait_time))
        };
        match level {
            ThroughputLevel::Idle => (min, self.min_wait_time),
            ThroughputLevel::Low => ((min * 2).min(max), clamp(1)),
            ThroughputLevel::Medium => (min + span / 4, clamp(10)),
            ThroughputLevel::High => (min + span / 2, clamp(25)),
            ThroughputLevel::Burst => (max, clamp(50)),
        }
    }
}

/// Sliding-window message rate.
#[derive(Debug)]
pub struct ThroughputMonitor {
    window: Duration,
    batches: VecDeque<(Instant, usize)>,
}

impl ThroughputMonitor {
    /// Monitor over `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            batches: VecDeque::new(),
        }
    }

    /// Record a batch of `size` items delivered now.
    pub fn record_batch(&mut self, size: usize) {
        let now = Instant::now();
        self.batches.push_back((now, size));
        self.expire(now);
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.batches.front() {
            if now.duration_since(at) < self.window {
                break;
            }
            self.batches.pop_front();
        }
    }

    /// Items per second over the window.
    pub fn messages_per_second(&self) -> f64 {
        let now = Instant::now();
        let total: usize = self
            .batches
            .iter()
            .filter(|(at, _)| now.duration_since(*at) < self.window)
            .map(|(_, size)| size)
            .sum();
        total as f64 / self.window.as_secs_f64()
    }

    /// Current rate class.
    pub fn level(&self) -> ThroughputLevel {
        ThroughputLevel::from_rate(self.messages_per_second())
    }
}

/// Groups channel items into batches sized by observed throughput.
#[derive(Debug)]
pub struct AdaptiveBatcher<T> {
    receiver: mpsc::Receiver<T>,
    config: AdaptiveBatchConfig,
    monitor: ThroughputMonitor,
    batch_size: usize,
    wait: Duration,
}

impl<T> AdaptiveBatcher<T> {
    /// Batcher reading from `receiver`.
    pub fn new(receiver: mpsc::Receiver<T>, config: AdaptiveBatchConfig) -> Self {
        let monitor = ThroughputMonitor::new(config.throughput_window);
        let (batch_size, wait) = config.parameters(ThroughputLevel::Idle);
        Self {
            receiver,
            config,
            monitor,
            batch_size,
            wait,
        }
    }

    /// Current target batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Current fill wait.
    pub fn wait(&self) -> Duration {
        self.wait
    }

    fn adapt(&mut self) {
        if !self.config.adaptive_enabled {
            return;
        }
        let level = self.monitor.level();
        (self.batch_size, self.wait) = self.config.parameters(level);
        trace!(?level, batch_size = self.batch_size, wait = ?self.wait, "adapted batching");
    }

    /// Next batch: waits for one item, then collects more until the target
    /// size or the fill wait is reached. `None` once the channel is closed
    /// and drained; a final partial batch is returned first.
    pub async fn next_batch(&mut self) -> Option<Vec<T>> {
        let first = self.receiver.recv().await?;
        self.adapt();

        let mut batch = Vec::with_capacity(self.batch_size);
        batch.push(first);
        let deadline = Instant::now() + self.wait;
        while batch.len() < self.batch_size {
            match self.receiver.try_recv() {
                Ok(item) => batch.push(item),
                Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => {
                    match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                        Ok(Some(item)) => batch.push(item),
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }

        self.monitor.record_batch(batch.len());
        debug!(size = batch.len(), target = self.batch_size, "batch collected");
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_map_to_levels() {
        assert_eq!(ThroughputLevel::from_rate(0.5), ThroughputLevel::Idle);
        assert_eq!(ThroughputLevel::from_rate(1.0), ThroughputLevel::Low);
        assert_eq!(ThroughputLevel::from_rate(500.0), ThroughputLevel::Medium);
        assert_eq!(ThroughputLevel::from_rate(5_000.0), ThroughputLevel::High);
        assert_eq!(ThroughputLevel::from_rate(50_000.0), ThroughputLevel::Burst);
    }

    #[test]
    fn parameters_grow_with_load() {
        let config = AdaptiveBatchConfig::default();
        assert_eq!(
            config.parameters(ThroughputLevel::Idle),
            (10, Duration::from_millis(1))
        );
        assert_eq!(config.parameters(ThroughputLevel::Low).0, 20);
        assert_eq!(config.parameters(ThroughputLevel::Medium).0, 257);
        assert_eq!(config.parameters(ThroughputLevel::High).0, 505);
        assert_eq!(
            config.parameters(ThroughputLevel::Burst),
            (1000, Duration::from_millis(50))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_forgets_batches_outside_the_window() {
        let mut monitor = ThroughputMonitor::new(Duration::from_secs(1));
        assert_eq!(monitor.level(), ThroughputLevel::Idle);
        monitor.record_batch(10);
        tokio::time::advance(Duration::from_millis(100)).await;
        monitor.record_batch(10);
        assert_eq!(monitor.level(), ThroughputLevel::Low);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(monitor.level(), ThroughputLevel::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_batches_stay_small() {
        let (tx, rx) = mpsc::channel(256);
        let mut batcher = AdaptiveBatcher::new(rx, AdaptiveBatchConfig::default());
        for i in 0..25 {
            tx.send(i).await.unwrap();
        }
        assert_eq!(batcher.next_batch().await.unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_load_raises_the_target() {
        let (tx, rx) = mpsc::channel(4096);
        let mut batcher = AdaptiveBatcher::new(rx, AdaptiveBatchConfig::default());
        for i in 0..3000 {
            tx.send(i).await.unwrap();
        }
        let mut sizes = Vec::new();
        for _ in 0..4 {
            sizes.push(batcher.next_batch().await.unwrap().len());
        }
        // 10 items over a 5 s window already classifies as Low.
        assert_eq!(sizes[0], 10);
        assert_eq!(sizes[1], 20);
        assert!(batcher.batch_size() >= 20);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_flushes_the_partial_batch() {
        let (tx, rx) = mpsc::channel(16);
        let mut batcher = AdaptiveBatcher::new(rx, AdaptiveBatchConfig::default());
        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();
        drop(tx);
        assert_eq!(batcher.next_batch().await.unwrap(), vec!["a", "b"]);
        assert!(batcher.next_batch().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_is_released_after_the_wait() {
        let (tx, rx) = mpsc::channel(16);
        let mut batcher = AdaptiveBatcher::new(rx, AdaptiveBatchConfig::default());
        tx.send(1).await.unwrap();
        let batch = batcher.next_batch().await.unwrap();
        assert_eq!(batch, vec![1]);
        drop(tx);
    }

    #[tokio::test]
    async fn disabled_adaptation_keeps_idle_parameters() {
        let config = AdaptiveBatchConfig {
            adaptive_enabled: false,
            ..AdaptiveBatchConfig::default()
        };
        let (tx, rx) = mpsc::channel(64);
        let mut batcher = AdaptiveBatcher::new(rx, config);
        for i in 0..40 {
            tx.send(i).await.unwrap();
        }
        for _ in 0..3 {
            assert_eq!(batcher.next_batch().await.unwrap().len(), 10);
        }
        assert_eq!(batcher.batch_size(), 10);
    }
}
