//! Integration tests for the Worker module

use super::*;
use crate::config::SequenceOptions;
use crate::metrics::{InferStat, InferStatCounters};
use crate::request::{InferRequest, InferResponse, InputTensor, TensorData};
use crate::sequence::{SequenceLengthPolicy, SequenceManager};
use crate::traits::{BackendError, ClientBackend, ClientBackendFactory, DataError, DataLoader};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// ============================================================================
// Mock DataLoader
// ============================================================================

struct MockLoader {
    inputs: Arc<Vec<InputTensor>>,
}

impl MockLoader {
    fn new() -> Self {
        Self {
            inputs: Arc::new(vec![InputTensor::new(
                "INPUT0",
                vec![4],
                TensorData::Int32(vec![1, 2, 3, 4]),
            )]),
        }
    }
}

impl DataLoader for MockLoader {
    fn prepare_inputs(&mut self, _options: &crate::config::InputOptions) -> Result<(), DataError> {
        Ok(())
    }

    fn stream_count(&self) -> usize {
        1
    }

    fn step_count(&self, _stream: usize) -> usize {
        1
    }

    fn inputs(&self, stream: usize, step: usize) -> Result<Arc<Vec<InputTensor>>, DataError> {
        if stream != 0 || step != 0 {
            return Err(DataError::OutOfRange { stream, step });
        }
        Ok(Arc::clone(&self.inputs))
    }

    fn uses_user_data(&self) -> bool {
        false
    }
}

// ============================================================================
// Mock ClientBackend
// ============================================================================

#[derive(Default)]
struct Shared {
    sent: AtomicUsize,
    live_sequences: Mutex<HashSet<u64>>,
    overlap: AtomicBool,
}

struct MockClient {
    delay: Duration,
    fail_every: Option<usize>,
    fatal: bool,
    shared: Arc<Shared>,
    counters: InferStatCounters,
}

#[async_trait]
impl ClientBackend for MockClient {
    fn kind(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: &InferRequest) -> Result<InferResponse, BackendError> {
        let start = Instant::now();
        let n = self.shared.sent.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.record_issue(request.payload_bytes() as u64);

        if let Some(flags) = request.sequence {
            if !self.shared.live_sequences.lock().insert(flags.id) {
                self.shared.overlap.store(true, Ordering::SeqCst);
            }
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(flags) = request.sequence {
            self.shared.live_sequences.lock().remove(&flags.id);
        }

        if self.fatal {
            self.counters.record_failure(start.elapsed());
            return Err(BackendError::Status {
                status: 404,
                message: "unknown model".into(),
            });
        }

        if matches!(self.fail_every, Some(every) if n % every == 0) {
            self.counters.record_failure(start.elapsed());
            return Err(BackendError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }

        self.counters.record_success(16, start.elapsed());
        Ok(InferResponse {
            bytes_received: 16,
            response_count: 1,
        })
    }

    fn stat(&self) -> InferStat {
        self.counters.snapshot()
    }
}

struct MockFactory {
    delay: Duration,
    fail_every: Option<usize>,
    fatal: bool,
    shared: Arc<Shared>,
}

impl MockFactory {
    fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_every: None,
            fatal: false,
            shared: Arc::default(),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    fn with_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl ClientBackendFactory for MockFactory {
    fn kind(&self) -> &str {
        "mock"
    }

    fn create_client(
        &self,
        _worker_id: usize,
        _slot: usize,
    ) -> Result<Arc<dyn ClientBackend>, BackendError> {
        Ok(Arc::new(MockClient {
            delay: self.delay,
            fail_every: self.fail_every,
            fatal: self.fatal,
            shared: Arc::clone(&self.shared),
            counters: InferStatCounters::new(),
        }))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    signal: Arc<PoolSignal>,
    stat: Arc<ThreadStat>,
    config: Arc<ThreadConfig>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }

    fn wait_exit(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.stat.exit().is_none() {
            assert!(Instant::now() < deadline, "worker did not exit in time");
            std::thread::sleep(Duration::from_millis(2));
        }
        self.join();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.signal.stop();
        self.join();
    }
}

fn issuer(sequences: Option<Arc<SequenceManager>>) -> RequestIssuer {
    let issuer = RequestIssuer::new(
        "mock_model",
        1,
        false,
        Arc::new(MockLoader::new()),
        Arc::new(AtomicU64::new(0)),
    );
    match sequences {
        Some(sequences) => issuer.with_sequences(sequences),
        None => issuer,
    }
}

fn spawn(
    factory: MockFactory,
    budget: Option<usize>,
    schedule: bool,
    async_mode: bool,
    configure: impl FnOnce(&ThreadConfig),
) -> (Harness, Arc<Shared>) {
    let shared = Arc::clone(&factory.shared);
    let signal = Arc::new(PoolSignal::new());
    let stat = Arc::new(ThreadStat::new());
    let config = Arc::new(ThreadConfig::new(0));
    configure(&config);

    let builder = WorkerBuilder::new(0)
        .stat(Arc::clone(&stat))
        .signal(Arc::clone(&signal))
        .thread_config(Arc::clone(&config))
        .issuer(issuer(None))
        .factory(Arc::new(factory))
        .budget(Arc::new(RequestBudget::new(budget)))
        .async_mode(async_mode);

    let worker: Box<dyn Worker> = if schedule {
        Box::new(builder.build_schedule().unwrap())
    } else {
        Box::new(builder.build_concurrency().unwrap())
    };

    let handle = spawn_worker(worker, Arc::clone(&signal)).unwrap();
    (
        Harness {
            signal,
            stat,
            config,
            handle: Some(handle),
        },
        shared,
    )
}

// ============================================================================
// Builder Tests
// ============================================================================

#[test]
fn test_builder_missing_components() {
    let result = WorkerBuilder::new(0).build_concurrency();
    assert!(matches!(
        result,
        Err(crate::error::LoadError::MissingComponent("stat"))
    ));

    let result = WorkerBuilder::new(0)
        .stat(Arc::new(ThreadStat::new()))
        .signal(Arc::new(PoolSignal::new()))
        .thread_config(Arc::new(ThreadConfig::new(0)))
        .issuer(issuer(None))
        .build_schedule();
    assert!(matches!(
        result,
        Err(crate::error::LoadError::MissingComponent("factory"))
    ));
}

#[test]
fn test_builder_rejects_foreign_thread_config() {
    let result = WorkerBuilder::new(1)
        .stat(Arc::new(ThreadStat::new()))
        .signal(Arc::new(PoolSignal::new()))
        .thread_config(Arc::new(ThreadConfig::new(0)))
        .issuer(issuer(None))
        .factory(Arc::new(MockFactory::new()))
        .build_concurrency();
    assert!(result.is_err());
}

// ============================================================================
// Concurrency Worker Tests
// ============================================================================

#[test]
fn test_concurrency_worker_exhausts_budget() {
    let (mut harness, shared) = spawn(MockFactory::new(), Some(25), false, true, |c| {
        c.set_concurrency(4)
    });

    harness.wait_exit(Duration::from_secs(5));

    assert_eq!(harness.stat.exit(), Some(WorkerExit::BudgetExhausted));
    assert_eq!(harness.stat.counts().completed, 25);
    assert_eq!(shared.sent.load(Ordering::SeqCst), 25);
    assert_eq!(harness.stat.take_records().len(), 25);
}

#[test]
fn test_concurrency_worker_counts_failures() {
    let factory = MockFactory::new().with_fail_every(5);
    let (mut harness, _shared) = spawn(factory, Some(20), false, true, |c| c.set_concurrency(2));

    harness.wait_exit(Duration::from_secs(5));

    let counts = harness.stat.counts();
    assert_eq!(counts.total_requests(), 20);
    assert_eq!(counts.failed, 4);
    assert!(harness.stat.fault().is_none());

    let context_sum = harness.stat.contexts_sum();
    assert_eq!(context_sum.completed, 16);
    assert_eq!(context_sum.failed, 4);
}

#[test]
fn test_concurrency_worker_keeps_slots_full() {
    let factory = MockFactory::new().with_delay(Duration::from_millis(40));
    let (mut harness, _shared) = spawn(factory, Some(12), false, true, |c| c.set_concurrency(4));

    let start = Instant::now();
    harness.wait_exit(Duration::from_secs(5));

    // 12 requests at 4 in flight take about 3 rounds of 40ms, not 12
    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(harness.stat.counts().completed, 12);
}

#[test]
fn test_fatal_error_faults_worker() {
    let factory = MockFactory::new().with_fatal();
    let (mut harness, _shared) = spawn(factory, None, false, true, |c| c.set_concurrency(1));

    harness.wait_exit(Duration::from_secs(5));

    assert_eq!(harness.stat.exit(), Some(WorkerExit::Faulted));
    assert!(harness.stat.fault().unwrap().contains("404"));
    assert_eq!(harness.stat.counts().failed, 1);
}

#[test]
fn test_worker_stops_on_signal() {
    let factory = MockFactory::new().with_delay(Duration::from_millis(1));
    let (mut harness, _shared) = spawn(factory, None, false, true, |c| c.set_concurrency(2));

    std::thread::sleep(Duration::from_millis(30));
    harness.signal.stop();
    harness.wait_exit(Duration::from_secs(5));

    assert_eq!(harness.stat.exit(), Some(WorkerExit::Stopped));
    assert!(harness.stat.counts().completed > 0);
    assert_eq!(harness.signal.worker_counts(), (0, 0));
}

#[test]
fn test_pause_parks_worker_between_requests() {
    let factory = MockFactory::new().with_delay(Duration::from_millis(2));
    let (harness, shared) = spawn(factory, None, false, true, |c| c.set_concurrency(3));

    std::thread::sleep(Duration::from_millis(20));
    harness.signal.pause(Duration::from_secs(5)).unwrap();

    // Parked workers hold nothing in flight and issue nothing new
    let sent = shared.sent.load(Ordering::SeqCst);
    let counts = harness.stat.counts();
    assert_eq!(counts.total_requests(), sent);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(shared.sent.load(Ordering::SeqCst), sent);

    harness.signal.resume();
    std::thread::sleep(Duration::from_millis(20));
    assert!(shared.sent.load(Ordering::SeqCst) > sent);
}

#[test]
fn test_zero_slots_idles() {
    let (harness, shared) = spawn(MockFactory::new(), None, false, true, |c| {
        c.set_concurrency(0)
    });

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(shared.sent.load(Ordering::SeqCst), 0);

    // An idle worker still parks promptly
    harness.signal.pause(Duration::from_secs(1)).unwrap();
    harness.config.set_concurrency(1);
    harness.signal.resume();

    std::thread::sleep(Duration::from_millis(30));
    assert!(shared.sent.load(Ordering::SeqCst) > 0);
}

// ============================================================================
// Schedule Worker Tests
// ============================================================================

#[test]
fn test_schedule_worker_follows_slice() {
    let (mut harness, _shared) = spawn(MockFactory::new(), Some(6), true, true, |c| {
        c.set_schedule(ScheduleSlice {
            start: Some(Instant::now()),
            offsets: vec![Duration::ZERO, Duration::from_millis(5)],
            cycle: Duration::from_millis(10),
        })
    });

    harness.wait_exit(Duration::from_secs(5));

    let records = harness.stat.take_records();
    assert_eq!(records.len(), 6);
    let first = records[0].start;
    let last = records[5].start;
    // Six slots end at 25ms into the schedule
    assert!(last.duration_since(first) >= Duration::from_millis(20));
    assert_eq!(harness.stat.exit(), Some(WorkerExit::BudgetExhausted));
}

#[test]
fn test_schedule_worker_without_schedule_waits() {
    let (harness, shared) = spawn(MockFactory::new(), None, true, true, |_| {});

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(shared.sent.load(Ordering::SeqCst), 0);

    harness.signal.pause(Duration::from_secs(1)).unwrap();
    harness.config.set_schedule(ScheduleSlice {
        start: Some(Instant::now()),
        offsets: vec![Duration::ZERO],
        cycle: Duration::from_millis(2),
    });
    harness.signal.resume();

    std::thread::sleep(Duration::from_millis(30));
    assert!(shared.sent.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_sync_schedule_flags_delayed_requests() {
    // Each request takes 10ms but the schedule asks for one every 1ms
    let factory = MockFactory::new().with_delay(Duration::from_millis(10));
    let (mut harness, _shared) = spawn(factory, Some(5), true, false, |c| {
        c.set_schedule(ScheduleSlice {
            start: Some(Instant::now()),
            offsets: vec![Duration::ZERO],
            cycle: Duration::from_millis(1),
        })
    });

    harness.wait_exit(Duration::from_secs(5));

    let records = harness.stat.take_records();
    assert_eq!(records.len(), 5);
    assert!(records[1..].iter().all(|r| r.delayed));
    for pair in records.windows(2) {
        assert!(pair[1].start >= pair[0].end, "sync worker overlapped requests");
    }
}

#[test]
fn test_rewind_restarts_schedule() {
    let (harness, shared) = spawn(MockFactory::new(), None, true, true, |c| {
        c.set_schedule(ScheduleSlice {
            start: Some(Instant::now() + Duration::from_secs(60)),
            offsets: vec![Duration::ZERO],
            cycle: Duration::from_millis(5),
        })
    });

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(shared.sent.load(Ordering::SeqCst), 0);

    harness.signal.pause(Duration::from_secs(1)).unwrap();
    harness.config.rewind(Instant::now());
    harness.signal.resume();

    std::thread::sleep(Duration::from_millis(30));
    assert!(shared.sent.load(Ordering::SeqCst) > 0);
}

// ============================================================================
// Sequence Tests
// ============================================================================

#[test]
fn test_workers_never_overlap_sequence_ids() {
    let options = SequenceOptions::new(1, 2, 3).with_length_policy(SequenceLengthPolicy::Fixed);
    let sequences = Arc::new(SequenceManager::new(&options, Vec::new(), Some(1)).unwrap());
    let factory = Arc::new(MockFactory::new().with_delay(Duration::from_millis(1)));
    let shared = Arc::clone(&factory.shared);
    let signal = Arc::new(PoolSignal::new());
    let budget = Arc::new(RequestBudget::new(Some(60)));

    let mut handles = Vec::new();
    let mut stats = Vec::new();
    for id in 0..4 {
        let stat = Arc::new(ThreadStat::new());
        let config = Arc::new(ThreadConfig::new(id));
        config.set_concurrency(3);
        let worker = WorkerBuilder::new(id)
            .stat(Arc::clone(&stat))
            .signal(Arc::clone(&signal))
            .thread_config(config)
            .issuer(issuer(Some(Arc::clone(&sequences))))
            .factory(Arc::clone(&factory) as Arc<dyn ClientBackendFactory>)
            .budget(Arc::clone(&budget))
            .build_concurrency()
            .unwrap();
        handles.push(spawn_worker(Box::new(worker), Arc::clone(&signal)).unwrap());
        stats.push(stat);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let total: usize = stats.iter().map(|s| s.counts().total_requests()).sum();
    assert_eq!(total, 60);
    assert!(!shared.overlap.load(Ordering::SeqCst));
    assert_eq!(sequences.in_flight_count(), 0);

    for stat in &stats {
        for record in stat.take_records() {
            let id = record.sequence_id.unwrap();
            assert!((1..3).contains(&id));
        }
    }
}
