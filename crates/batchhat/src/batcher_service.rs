// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Intake queue and flush cycle.
//!
//! A single [`BatcherService`] task owns the live [`Accumulator`]. Producers only hold a
//! [`BatcherHandle`] and talk to the service over a bounded channel, so the buffer is never
//! shared: on every tick it is moved out to a spawned flush and replaced with an empty one.

use crate::accumulator::Accumulator;
use crate::constants::{DEFAULT_FLUSH_INTERVAL, QUEUE_CAPACITY};
use crate::errors;
use crate::flusher::{FlushOutcome, Flusher};
use crate::stat::{unix_now, Stat, StatKind};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use ustr::Ustr;

#[derive(Debug)]
pub enum BatcherCommand {
    Record { account_key: Ustr, stat: Stat },
    Flush(oneshot::Sender<FlushOutcome>),
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Account key used by the `submit_count*`/`submit_value*` shorthands
    pub account_key: String,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
}

impl BatcherConfig {
    #[must_use]
    pub fn new(account_key: &str, flush_interval: Duration) -> Self {
        BatcherConfig {
            account_key: account_key.to_string(),
            flush_interval,
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        BatcherConfig::new("", DEFAULT_FLUSH_INTERVAL)
    }
}

/// Validates a flush interval given in signed seconds, as read from configuration.
pub fn flush_interval_from_secs(secs: i64) -> Result<Duration, errors::Creation> {
    match u64::try_from(secs) {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(errors::Creation::InvalidFlushInterval),
    }
}

#[derive(Clone)]
pub struct BatcherHandle {
    tx: mpsc::Sender<BatcherCommand>,
    account_key: Ustr,
    cancel_token: CancellationToken,
    flushes: TaskTracker,
}

impl BatcherHandle {
    /// Enqueues a counter increment stamped with the current time. Zero counts are dropped.
    pub fn submit_count(&self, name: &str, count: i64) -> Result<(), errors::Submit> {
        self.submit_count_at(name, count, unix_now())
    }

    // A literal zero increments the remote counter by one, so a zero is treated as the no-op the
    // caller meant and never reaches the queue.
    pub fn submit_count_at(
        &self,
        name: &str,
        count: i64,
        timestamp: i64,
    ) -> Result<(), errors::Submit> {
        if count == 0 {
            return Ok(());
        }
        self.enqueue(self.account_key, Stat::count(name, count as f64, timestamp))
    }

    pub fn submit_value(&self, name: &str, value: f64) -> Result<(), errors::Submit> {
        self.submit_value_at(name, value, unix_now())
    }

    pub fn submit_value_at(
        &self,
        name: &str,
        value: f64,
        timestamp: i64,
    ) -> Result<(), errors::Submit> {
        self.submit(self.account_key.as_str(), Stat::value(name, value, timestamp))
    }

    /// Enqueues an already built stat for an explicit account key.
    ///
    /// NaN and infinities are rejected for both kinds and a zero count is dropped without error.
    pub fn submit(&self, account_key: &str, stat: Stat) -> Result<(), errors::Submit> {
        if !stat.value.is_finite() {
            return Err(errors::Submit::InvalidValue);
        }
        if stat.kind == StatKind::Count && stat.value == 0.0 {
            debug!("Dropping zero count for {}", stat.name);
            return Ok(());
        }
        self.enqueue(Ustr::from(account_key), stat)
    }

    fn enqueue(&self, account_key: Ustr, stat: Stat) -> Result<(), errors::Submit> {
        if self.cancel_token.is_cancelled() {
            return Err(errors::Submit::Stopped);
        }
        self.tx
            .try_send(BatcherCommand::Record { account_key, stat })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Intake queue full, dropping stat {}", stat.name);
                    errors::Submit::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => errors::Submit::Stopped,
            })
    }

    /// Detaches everything accumulated so far and waits for that flush to finish.
    pub async fn flush(&self) -> Result<FlushOutcome, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Flush(response_tx))
            .await
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    /// Account key used when a submission does not name one.
    #[must_use]
    pub fn account_key(&self) -> &str {
        self.account_key.as_str()
    }

    /// Stops the flush loop. Stats still queued are not guaranteed to be flushed.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Tracks every flush the service has spawned. Once the run loop has returned, close it and
    /// `wait()` to let sends already in flight finish before the runtime goes away.
    #[must_use]
    pub fn flush_tracker(&self) -> TaskTracker {
        self.flushes.clone()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled() || self.tx.is_closed()
    }
}

pub struct BatcherService {
    accumulator: Accumulator,
    rx: mpsc::Receiver<BatcherCommand>,
    flusher: Flusher,
    flush_interval: Duration,
    cancel_token: CancellationToken,
    flushes: TaskTracker,
}

impl BatcherService {
    pub fn new(
        config: BatcherConfig,
        flusher: Flusher,
    ) -> Result<(Self, BatcherHandle), errors::Creation> {
        if config.flush_interval.is_zero() {
            return Err(errors::Creation::InvalidFlushInterval);
        }
        if config.queue_capacity == 0 {
            return Err(errors::Creation::InvalidQueueCapacity);
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let cancel_token = CancellationToken::new();
        let flushes = TaskTracker::new();

        let service = Self {
            accumulator: Accumulator::new(),
            rx,
            flusher,
            flush_interval: config.flush_interval,
            cancel_token: cancel_token.clone(),
            flushes: flushes.clone(),
        };

        let handle = BatcherHandle {
            tx,
            account_key: Ustr::from(config.account_key.as_str()),
            cancel_token,
            flushes,
        };

        Ok((service, handle))
    }

    pub async fn run(mut self) {
        debug!(
            "Batcher service started, flushing every {:?}",
            self.flush_interval
        );

        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!("Batcher service stopping");
                    break;
                }

                _ = ticker.tick() => {
                    if let Some(accumulated) = self.detach() {
                        let flusher = self.flusher.clone();
                        self.flushes.spawn(async move {
                            flusher.flush(accumulated).await;
                        });
                    }
                }

                command = self.rx.recv() => match command {
                    Some(BatcherCommand::Record { account_key, stat }) => {
                        self.accumulator.push(account_key, stat);
                    }
                    Some(BatcherCommand::Flush(response_tx)) => {
                        let accumulated = self.detach().unwrap_or_default();
                        let flusher = self.flusher.clone();
                        self.flushes.spawn(async move {
                            let outcome = flusher.flush(accumulated).await;
                            if response_tx.send(outcome).is_err() {
                                error!("Failed to send flush response - receiver dropped");
                            }
                        });
                    }
                    None => {
                        debug!("All batcher handles dropped");
                        break;
                    }
                },
            }
        }

        if !self.accumulator.is_empty() {
            warn!(
                "Batcher stopped with {} unflushed stats",
                self.accumulator.len()
            );
        }
        debug!(
            "Batcher service stopped with {} flushes in flight",
            self.flushes.len()
        );
    }

    fn detach(&mut self) -> Option<Accumulator> {
        if self.accumulator.is_empty() {
            return None;
        }
        Some(self.accumulator.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flusher::FlusherConfig;
    use crate::stathat::{EzApi, RetryStrategy};

    fn flusher() -> Flusher {
        let api = EzApi::new(
            "http://127.0.0.1:1/ez".to_string(),
            None,
            Duration::from_millis(100),
            RetryStrategy::Immediate(1),
        )
        .expect("failed to create api");
        Flusher::new(FlusherConfig {
            api,
            max_in_flight: 1,
        })
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = BatcherService::new(BatcherConfig::new("ezkey", Duration::ZERO), flusher());
        assert!(matches!(result, Err(errors::Creation::InvalidFlushInterval)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = BatcherConfig::new("ezkey", Duration::from_secs(1));
        config.queue_capacity = 0;
        let result = BatcherService::new(config, flusher());
        assert!(matches!(result, Err(errors::Creation::InvalidQueueCapacity)));
    }

    #[test]
    fn signed_intervals() {
        assert_eq!(
            flush_interval_from_secs(-1),
            Err(errors::Creation::InvalidFlushInterval)
        );
        assert_eq!(
            flush_interval_from_secs(0),
            Err(errors::Creation::InvalidFlushInterval)
        );
        assert_eq!(flush_interval_from_secs(15), Ok(Duration::from_secs(15)));
    }

    #[test]
    fn nan_is_rejected_synchronously() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(1)), flusher())
                .expect("failed to create batcher");

        assert_eq!(
            handle.submit_value("latency", f64::NAN),
            Err(errors::Submit::InvalidValue)
        );
        assert_eq!(
            handle.submit("ezkey", Stat::count("requests", f64::NAN, 1)),
            Err(errors::Submit::InvalidValue)
        );

        let mut rx = service.rx;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn infinities_are_rejected_synchronously() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(1)), flusher())
                .expect("failed to create batcher");

        assert_eq!(
            handle.submit_value("latency", f64::INFINITY),
            Err(errors::Submit::InvalidValue)
        );
        assert_eq!(
            handle.submit_value_at("latency", f64::NEG_INFINITY, 1),
            Err(errors::Submit::InvalidValue)
        );
        assert_eq!(
            handle.submit("ezkey", Stat::count("requests", f64::INFINITY, 1)),
            Err(errors::Submit::InvalidValue)
        );

        let mut rx = service.rx;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn zero_count_never_reaches_queue() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(1)), flusher())
                .expect("failed to create batcher");

        assert_eq!(handle.submit_count("BMo", 0), Ok(()));
        assert_eq!(handle.submit("ezkey", Stat::count("BMo", 0.0, 1)), Ok(()));

        let mut rx = service.rx;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn zero_value_is_kept() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(1)), flusher())
                .expect("failed to create batcher");

        assert_eq!(handle.submit_value_at("latency", 0.0, 7), Ok(()));

        let mut rx = service.rx;
        match rx.try_recv() {
            Ok(BatcherCommand::Record { account_key, stat }) => {
                assert_eq!(account_key.as_str(), "ezkey");
                assert_eq!(stat, Stat::value("latency", 0.0, 7));
            }
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let mut config = BatcherConfig::new("ezkey", Duration::from_secs(1));
        config.queue_capacity = 2;
        let (_service, handle) =
            BatcherService::new(config, flusher()).expect("failed to create batcher");

        assert_eq!(handle.submit_count("a", 1), Ok(()));
        assert_eq!(handle.submit_count("b", 1), Ok(()));
        assert_eq!(handle.submit_count("c", 1), Err(errors::Submit::QueueFull));
    }

    #[test]
    fn stopped_handle_refuses_stats() {
        let (_service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(1)), flusher())
                .expect("failed to create batcher");

        handle.stop();
        assert!(handle.is_stopped());
        assert_eq!(handle.submit_count("a", 1), Err(errors::Submit::Stopped));
    }

    #[tokio::test]
    async fn stop_ends_run_loop() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(60)), flusher())
                .expect("failed to create batcher");
        let service_task = tokio::spawn(service.run());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), service_task)
            .await
            .expect("service did not stop")
            .expect("service task failed");
    }

    #[tokio::test]
    async fn dropping_handles_ends_run_loop() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(60)), flusher())
                .expect("failed to create batcher");
        let service_task = tokio::spawn(service.run());

        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), service_task)
            .await
            .expect("service did not stop")
            .expect("service task failed");
    }

    #[tokio::test]
    async fn flush_tracker_waits_for_spawned_flushes() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(60)), flusher())
                .expect("failed to create batcher");
        let service_task = tokio::spawn(service.run());

        handle.submit_count("BMo", 1).expect("failed to submit");
        let outcome = handle.flush().await.expect("failed to flush");
        assert_eq!(outcome.failed, 1);

        handle.stop();
        service_task.await.expect("service task failed");

        let tracker = handle.flush_tracker();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("tracked flushes did not finish");
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn flush_of_empty_buffer_is_a_noop() {
        let (service, handle) =
            BatcherService::new(BatcherConfig::new("ezkey", Duration::from_secs(60)), flusher())
                .expect("failed to create batcher");
        let service_task = tokio::spawn(service.run());

        let outcome = handle.flush().await.expect("failed to flush");
        assert_eq!(outcome, FlushOutcome::default());

        handle.stop();
        service_task.await.expect("service task failed");
    }
}
