//! Fire-and-forget event buffer with size and timer flushes.

use crate::{BatchQueue, BatchTransport, EventRecord, MAX_BATCH_SIZE, MAX_RETRY_BUFFER};
use parking_lot::Mutex;
use pm_config_and_utils::BatchSettings;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest flush cadence accepted by [`EventBuffer::start`].
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Buffer configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Pending records that trigger an immediate flush.
    pub capacity: usize,
    /// Periodic flush cadence.
    pub flush_interval: Duration,
    /// Upper bound of the retry store.
    pub max_retry: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_BATCH_SIZE,
            flush_interval: Duration::from_secs(2),
            max_retry: MAX_RETRY_BUFFER,
        }
    }
}

impl From<&BatchSettings> for BufferConfig {
    fn from(settings: &BatchSettings) -> Self {
        Self {
            capacity: settings.capacity,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            max_retry: settings.max_retry,
        }
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending; no request was made.
    Idle,
    /// The control plane accepted `count` records.
    Delivered { count: usize },
    /// Submission failed; `retained` records wait in the retry store and
    /// `dropped` of the oldest were discarded to respect the cap.
    Retained { retained: usize, dropped: usize },
}

/// Snapshot of buffer occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatus {
    /// Records waiting for the size trigger or the next tick.
    pub pending: usize,
    /// Records in full batches waiting for the worker.
    pub sealed: usize,
    /// Records from failed submissions.
    pub retry: usize,
}

/// What started a flush, for logging.
#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Size,
    Timer,
    Manual,
}

struct BufferInner {
    queue: Mutex<BatchQueue>,
    transport: Arc<dyn BatchTransport>,
    /// Serializes submissions: at most one outgoing set is in flight.
    gate: tokio::sync::Mutex<()>,
    /// Raised when a push seals a full batch.
    sealed: Notify,
}

impl BufferInner {
    async fn flush_sealed(&self) {
        loop {
            let _gate = self.gate.lock().await;
            let Some(outgoing) = self.queue.lock().take_sealed() else {
                return;
            };
            log_outcome(FlushTrigger::Size, self.submit(outgoing).await);
        }
    }

    async fn flush_all(&self, trigger: FlushTrigger) -> FlushOutcome {
        let _gate = self.gate.lock().await;
        let outgoing = self.queue.lock().take_all();
        let outcome = match outgoing {
            Some(outgoing) => self.submit(outgoing).await,
            None => FlushOutcome::Idle,
        };
        log_outcome(trigger, outcome);
        outcome
    }

    /// Send one outgoing set. The queue no longer holds these records, so
    /// concurrent `record()` calls fill a fresh pending batch meanwhile.
    async fn submit(&self, outgoing: Vec<EventRecord>) -> FlushOutcome {
        let count = outgoing.len();
        match self.transport.submit(&outgoing).await {
            Ok(()) => FlushOutcome::Delivered { count },
            Err(e) => {
                let mut queue = self.queue.lock();
                let dropped = queue.restore(outgoing);
                warn!(
                    count = count,
                    dropped = dropped,
                    error = %e,
                    "Batch submission failed, keeping records for retry"
                );
                FlushOutcome::Retained {
                    retained: queue.retry_len(),
                    dropped,
                }
            }
        }
    }
}

fn log_outcome(trigger: FlushTrigger, outcome: FlushOutcome) {
    match outcome {
        FlushOutcome::Idle => {}
        FlushOutcome::Delivered { count } => {
            debug!(trigger = ?trigger, count = count, "Batch delivered");
        }
        FlushOutcome::Retained { retained, dropped } => {
            debug!(trigger = ?trigger, retained = retained, dropped = dropped, "Batch retained");
        }
    }
}

/// Per-process event buffer.
///
/// `record()` never blocks on the network and never fails. A background
/// worker submits a batch as soon as `capacity` records are pending and
/// flushes whatever is held every `flush_interval`. Failed submissions stay
/// in a bounded retry store that is prepended to the next flush.
///
/// # Lifecycle
///
/// 1. [`EventBuffer::start`] inside a Tokio runtime
/// 2. [`EventBuffer::record`] from any task
/// 3. [`EventBuffer::shutdown`] for the final best-effort flush
pub struct EventBuffer {
    inner: Arc<BufferInner>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBuffer {
    /// Create the buffer and spawn its flush worker.
    ///
    /// `flush_interval` is clamped to at least [`MIN_FLUSH_INTERVAL`].
    /// Must be called from within a Tokio runtime.
    pub fn start(config: BufferConfig, transport: Arc<dyn BatchTransport>) -> Self {
        let inner = Arc::new(BufferInner {
            queue: Mutex::new(BatchQueue::new(config.capacity, config.max_retry)),
            transport,
            gate: tokio::sync::Mutex::new(()),
            sealed: Notify::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run_worker(
            inner.clone(),
            config.flush_interval.max(MIN_FLUSH_INTERVAL),
            shutdown_rx,
        ));

        Self {
            inner,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Buffer one record.
    ///
    /// Records passed after [`shutdown`](Self::shutdown) are held but never
    /// flushed.
    pub fn record(&self, event: EventRecord) {
        let sealed = self.inner.queue.lock().push(event);
        if sealed {
            self.inner.sealed.notify_one();
        }
    }

    /// Flush everything held now.
    ///
    /// Waits for an in-flight submission to finish first. Failure is
    /// reported in the outcome, never as an error.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush_all(FlushTrigger::Manual).await
    }

    /// Current occupancy.
    pub fn status(&self) -> BufferStatus {
        let queue = self.inner.queue.lock();
        BufferStatus {
            pending: queue.pending_len(),
            sealed: queue.sealed_len(),
            retry: queue.retry_len(),
        }
    }

    /// Final flush, then stop the worker.
    ///
    /// Best effort: a failed final flush is logged and returned, and the
    /// retained records are lost with the process.
    pub async fn shutdown(&self) -> FlushOutcome {
        let outcome = self.flush().await;

        let _ = self.shutdown_tx.send(true);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        if let FlushOutcome::Retained { retained, .. } = outcome {
            warn!(retained = retained, "Final flush failed, undelivered records discarded");
        }
        info!(outcome = ?outcome, "Event buffer stopped");
        outcome
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_worker(
    inner: Arc<BufferInner>,
    flush_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = inner.sealed.notified() => inner.flush_sealed().await,
            _ = ticker.tick() => {
                inner.flush_all(FlushTrigger::Timer).await;
            }
        }
    }

    debug!("Flush worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlowEventType, OutboxError, OutboxResult};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::collections::VecDeque;

    /// Transport that records every submission and fails on demand.
    #[derive(Default)]
    struct RecordingTransport {
        submissions: Mutex<Vec<Vec<String>>>,
        failures: Mutex<VecDeque<bool>>,
    }

    impl RecordingTransport {
        fn fail_next(&self, times: usize) {
            let mut failures = self.failures.lock();
            for _ in 0..times {
                failures.push_back(true);
            }
        }

        fn submissions(&self) -> Vec<Vec<String>> {
            self.submissions.lock().clone()
        }
    }

    #[async_trait]
    impl BatchTransport for RecordingTransport {
        async fn submit(&self, events: &[EventRecord]) -> OutboxResult<()> {
            let ids = events.iter().map(|e| e.id.clone().unwrap()).collect();
            self.submissions.lock().push(ids);
            if self.failures.lock().pop_front().unwrap_or(false) {
                return Err(OutboxError::Rejected {
                    status: 503,
                    body: "down".into(),
                });
            }
            Ok(())
        }
    }

    fn event(n: usize) -> EventRecord {
        EventRecord::now("session-1", FlowEventType::ToolCall, Map::new()).with_id(format!("e-{}", n))
    }

    fn expected(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|n| format!("e-{}", n)).collect()
    }

    fn start(transport: &Arc<RecordingTransport>) -> EventBuffer {
        EventBuffer::start(BufferConfig::default(), transport.clone())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_buffer_config_default() {
        let config = BufferConfig::default();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.flush_interval, Duration::from_secs(2));
        assert_eq!(config.max_retry, 200);
    }

    #[test]
    fn test_buffer_config_from_settings() {
        let settings = BatchSettings {
            capacity: 5,
            flush_interval_ms: 250,
            max_retry: 20,
            request_timeout_ms: 1_000,
        };
        let config = BufferConfig::from(&settings);
        assert_eq!(config.capacity, 5);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_retry, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_with_nothing_pending_makes_no_request() {
        let transport = Arc::new(RecordingTransport::default());
        let buffer = start(&transport);

        assert_eq!(buffer.flush().await, FlushOutcome::Idle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(transport.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_51_triggers_one_immediate_flush() {
        let transport = Arc::new(RecordingTransport::default());
        let buffer = start(&transport);

        for n in 0..51 {
            buffer.record(event(n));
        }
        settle().await;

        assert_eq!(transport.submissions(), vec![expected(0..50)]);
        assert_eq!(
            buffer.status(),
            BufferStatus {
                pending: 1,
                sealed: 0,
                retry: 0
            }
        );

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(
            transport.submissions(),
            vec![expected(0..50), expected(50..51)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let buffer = start(&transport);

        buffer.record(event(0));
        buffer.record(event(1));
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(transport.submissions().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.submissions(), vec![expected(0..2)]);
        assert_eq!(buffer.status().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_delivers_all_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_next(2);
        let buffer = start(&transport);

        buffer.record(event(0));
        buffer.record(event(1));
        assert!(matches!(
            buffer.flush().await,
            FlushOutcome::Retained { retained: 2, dropped: 0 }
        ));

        buffer.record(event(2));
        assert!(matches!(
            buffer.flush().await,
            FlushOutcome::Retained { retained: 3, dropped: 0 }
        ));

        buffer.record(event(3));
        assert_eq!(buffer.flush().await, FlushOutcome::Delivered { count: 4 });

        let submissions = transport.submissions();
        assert_eq!(submissions.len(), 3);
        assert_eq!(submissions[2], expected(0..4));
        assert_eq!(buffer.status().retry, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_timer_flush_is_retried_on_next_tick() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_next(1);
        let buffer = start(&transport);

        buffer.record(event(0));
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(buffer.status().retry, 1);

        buffer.record(event(1));
        tokio::time::sleep(Duration::from_millis(2_000)).await;

        assert_eq!(
            transport.submissions(),
            vec![expected(0..1), expected(0..2)]
        );
        assert_eq!(buffer.status().retry, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_flush_interval_is_clamped() {
        let transport = Arc::new(RecordingTransport::default());
        let buffer = EventBuffer::start(
            BufferConfig {
                flush_interval: Duration::ZERO,
                ..BufferConfig::default()
            },
            transport.clone(),
        );

        buffer.record(event(0));
        tokio::time::sleep(Duration::from_millis(5)).await;
        settle().await;

        assert_eq!(transport.submissions(), vec![expected(0..1)]);
        buffer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_store_capped_on_failure() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_next(1);
        let buffer = EventBuffer::start(
            BufferConfig {
                capacity: 1_000,
                flush_interval: Duration::from_secs(60),
                max_retry: 200,
            },
            transport.clone(),
        );

        for n in 0..230 {
            buffer.record(event(n));
        }
        assert_eq!(
            buffer.flush().await,
            FlushOutcome::Retained {
                retained: 200,
                dropped: 30
            }
        );

        assert_eq!(buffer.flush().await, FlushOutcome::Delivered { count: 200 });
        assert_eq!(transport.submissions()[1], expected(30..230));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_stops_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let buffer = start(&transport);

        buffer.record(event(0));
        assert_eq!(buffer.shutdown().await, FlushOutcome::Delivered { count: 1 });

        buffer.record(event(1));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.submissions(), vec![expected(0..1)]);
        assert_eq!(buffer.status().pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_shutdown_flush_is_not_escalated() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_next(1);
        let buffer = start(&transport);

        buffer.record(event(0));
        assert_eq!(
            buffer.shutdown().await,
            FlushOutcome::Retained {
                retained: 1,
                dropped: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_during_in_flight_submission_are_kept() {
        struct SlowTransport {
            inner: RecordingTransport,
        }

        #[async_trait]
        impl BatchTransport for SlowTransport {
            async fn submit(&self, events: &[EventRecord]) -> OutboxResult<()> {
                tokio::time::sleep(Duration::from_millis(500)).await;
                self.inner.submit(events).await
            }
        }

        let transport = Arc::new(SlowTransport {
            inner: RecordingTransport::default(),
        });
        let buffer = Arc::new(EventBuffer::start(
            BufferConfig {
                capacity: 2,
                flush_interval: Duration::from_secs(60),
                max_retry: 200,
            },
            transport.clone(),
        ));

        buffer.record(event(0));
        buffer.record(event(1));
        settle().await;

        // First batch is in flight; keep recording.
        buffer.record(event(2));
        buffer.record(event(3));
        buffer.record(event(4));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(
            transport.inner.submissions(),
            vec![expected(0..2), expected(2..4)]
        );
        assert_eq!(buffer.status().pending, 1);
    }
}
