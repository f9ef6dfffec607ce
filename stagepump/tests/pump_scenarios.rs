//! End-to-end pump scenarios.
//!
//! These tests drive real worker threads through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use stagepump::{
    Fetcher, FnTransformer, JobStatus, LazyFetcher, MemoryFetcher, ObjectSlot, Pump, PumpConfig,
    PumpError, ResultSlot, Stage, StageError, Transformer, TransformerExt, UNBOUNDED,
};

// =============================================================================
// Test collaborators
// =============================================================================

/// Counts calls and drops across every collaborator of one test.
#[derive(Default)]
struct Tally {
    fetches: AtomicUsize,
    transforms: AtomicUsize,
    finalizes: AtomicUsize,
    fetcher_drops: AtomicUsize,
    transformer_drops: AtomicUsize,
}

impl Tally {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct TestFetcher {
    payload: Vec<u8>,
    fail: bool,
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
    tally: Arc<Tally>,
}

impl TestFetcher {
    fn new(
        payload: &[u8],
        fail: bool,
        gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
        tally: &Arc<Tally>,
    ) -> Self {
        Self {
            payload: payload.to_vec(),
            fail,
            gate,
            tally: Arc::clone(tally),
        }
    }

    fn ok(payload: &[u8], tally: &Arc<Tally>) -> Self {
        Self::new(payload, false, None, tally)
    }

    fn failing(tally: &Arc<Tally>) -> Self {
        Self::new(b"", true, None, tally)
    }

    fn gated(gate: &Arc<Mutex<mpsc::Receiver<()>>>, tally: &Arc<Tally>) -> Self {
        Self::new(b"gated", false, Some(Arc::clone(gate)), tally)
    }
}

impl Fetcher for TestFetcher {
    fn fetch(&mut self) -> Result<(), StageError> {
        self.tally.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        if self.fail {
            return Err(StageError::failed("source unavailable"));
        }
        Ok(())
    }

    fn materialize(&mut self) -> Result<&[u8], StageError> {
        Ok(&self.payload)
    }
}

impl Drop for TestFetcher {
    fn drop(&mut self) {
        self.tally.fetcher_drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Produces the payload as a `String`.
struct TestTransformer {
    staged: Option<String>,
    fail_finalize: bool,
    tally: Arc<Tally>,
}

impl TestTransformer {
    fn new(fail_finalize: bool, tally: &Arc<Tally>) -> Self {
        Self {
            staged: None,
            fail_finalize,
            tally: Arc::clone(tally),
        }
    }

    fn ok(tally: &Arc<Tally>) -> Self {
        Self::new(false, tally)
    }
}

impl Transformer for TestTransformer {
    type Output = String;

    fn transform(&mut self, data: &[u8]) -> Result<(), StageError> {
        self.tally.transforms.fetch_add(1, Ordering::SeqCst);
        self.staged = Some(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    fn finalize(&mut self) -> Result<String, StageError> {
        self.tally.finalizes.fetch_add(1, Ordering::SeqCst);
        if self.fail_finalize {
            return Err(StageError::failed("device lost"));
        }
        self.staged.take().ok_or(StageError::NotReady)
    }
}

impl Drop for TestTransformer {
    fn drop(&mut self) {
        self.tally.transformer_drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn slots(n: usize) -> Vec<(ResultSlot, ObjectSlot<String>)> {
    (0..n).map(|_| (ResultSlot::new(), ObjectSlot::new())).collect()
}

fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}

fn gate() -> (mpsc::Sender<()>, Arc<Mutex<mpsc::Receiver<()>>>) {
    let (tx, rx) = mpsc::channel();
    (tx, Arc::new(Mutex::new(rx)))
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_all_jobs_succeed() {
    let pump = Pump::with_threads(2, 2).unwrap();
    let tally = Arc::new(Tally::default());
    let slots = slots(10);

    for (i, (result, object)) in slots.iter().enumerate() {
        let payload = format!("payload {}", i);
        pump.submit(
            TestFetcher::ok(payload.as_bytes(), &tally),
            TestTransformer::ok(&tally),
            Some(result.clone()),
            Some(object.clone()),
        )
        .unwrap();
    }

    pump.wait_for_all();

    for (i, (result, object)) in slots.iter().enumerate() {
        assert_eq!(result.get(), Some(JobStatus::Success));
        assert_eq!(object.take(), Some(format!("payload {}", i)));
    }
    assert_eq!(pump.outstanding_count(), 0);
    assert!(pump.queue_status().is_empty());
    assert_eq!(Tally::get(&tally.finalizes), 10);
}

#[test]
fn test_fetch_failures_skip_transform() {
    let pump = Pump::with_threads(2, 2).unwrap();
    let tally = Arc::new(Tally::default());
    let slots = slots(5);

    for (result, object) in &slots {
        pump.submit(
            TestFetcher::failing(&tally),
            TestTransformer::ok(&tally),
            Some(result.clone()),
            Some(object.clone()),
        )
        .unwrap();
    }

    pump.wait_for_all();

    for (result, object) in &slots {
        let status = result.get().unwrap();
        let failure = status.failure().unwrap();
        assert_eq!(failure.stage, Stage::Fetch);
        assert_eq!(failure.error, StageError::failed("source unavailable"));
        assert!(!object.is_filled());
    }
    assert_eq!(Tally::get(&tally.transforms), 0);
    assert_eq!(Tally::get(&tally.finalizes), 0);
    assert_eq!(pump.outstanding_count(), 0);
}

#[test]
fn test_purge_cancels_queued_jobs() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let (release, gate) = gate();

    // Occupy the only fetch worker so the next jobs stay queued.
    let blocker = ResultSlot::new();
    pump.submit(
        TestFetcher::gated(&gate, &tally),
        TestTransformer::ok(&tally),
        Some(blocker.clone()),
        None,
    )
    .unwrap();
    wait_until(|| Tally::get(&tally.fetches) == 1);

    let slots = slots(5);
    for (result, object) in &slots {
        pump.submit(
            TestFetcher::ok(b"never fetched", &tally),
            TestTransformer::ok(&tally),
            Some(result.clone()),
            Some(object.clone()),
        )
        .unwrap();
    }
    assert_eq!(pump.queue_status().fetch, 5);

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        release.send(()).unwrap();
    });
    pump.purge_all();
    releaser.join().unwrap();

    for (result, object) in &slots {
        assert_eq!(result.get(), Some(JobStatus::Cancelled));
        assert!(!object.is_filled());
    }
    // The in-flight job is caught once it reaches the finalize queue.
    assert_eq!(blocker.get(), Some(JobStatus::Cancelled));
    assert!(pump.queue_status().is_empty());
    assert_eq!(pump.outstanding_count(), 0);
    assert_eq!(Tally::get(&tally.fetches), 1);
    assert_eq!(Tally::get(&tally.finalizes), 0);
}

#[test]
fn test_undrained_jobs_wait_in_finalize_queue() {
    let pump = Pump::with_threads(1, 2).unwrap();
    let tally = Arc::new(Tally::default());
    let slots = slots(3);

    for (result, object) in &slots {
        pump.submit(
            TestFetcher::ok(b"ready", &tally),
            TestTransformer::ok(&tally),
            Some(result.clone()),
            Some(object.clone()),
        )
        .unwrap();
    }

    wait_until(|| pump.queue_status().finalize == 3);
    assert_eq!(pump.outstanding_count(), 3);
    assert!(slots.iter().all(|(result, _)| !result.is_set()));
    assert_eq!(Tally::get(&tally.finalizes), 0);

    assert_eq!(pump.drain_finalize(UNBOUNDED), 3);
    assert_eq!(pump.outstanding_count(), 0);
    for (result, object) in &slots {
        assert_eq!(result.get(), Some(JobStatus::Success));
        assert_eq!(object.take().as_deref(), Some("ready"));
    }
}

#[test]
fn test_undrained_jobs_cancelled_on_release() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let slots = slots(3);

    for (result, object) in &slots {
        pump.submit(
            TestFetcher::ok(b"ready", &tally),
            TestTransformer::ok(&tally),
            Some(result.clone()),
            Some(object.clone()),
        )
        .unwrap();
    }
    wait_until(|| pump.queue_status().finalize == 3);

    drop(pump);

    for (result, object) in &slots {
        assert_eq!(result.get(), Some(JobStatus::Cancelled));
        assert!(!object.is_filled());
    }
    assert_eq!(Tally::get(&tally.finalizes), 0);
    assert_eq!(Tally::get(&tally.fetcher_drops), 3);
    assert_eq!(Tally::get(&tally.transformer_drops), 3);
}

// =============================================================================
// Failure reporting
// =============================================================================

#[test]
fn test_finalize_failure_is_reported() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let result = ResultSlot::new();
    let object = ObjectSlot::new();

    let transformer = TestTransformer::new(true, &tally);
    pump.submit(
        TestFetcher::ok(b"data", &tally),
        transformer,
        Some(result.clone()),
        Some(object.clone()),
    )
    .unwrap();
    pump.wait_for_all();

    let status = result.get().unwrap();
    assert_eq!(status.failure().unwrap().stage, Stage::Finalize);
    assert!(!object.is_filled());
}

#[test]
fn test_materialize_failure_is_reported() {
    struct Unready;

    impl Fetcher for Unready {
        fn fetch(&mut self) -> Result<(), StageError> {
            Ok(())
        }

        fn materialize(&mut self) -> Result<&[u8], StageError> {
            Err(StageError::NotReady)
        }
    }

    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let result = ResultSlot::new();

    pump.submit(Unready, TestTransformer::ok(&tally), Some(result.clone()), None)
        .unwrap();
    pump.wait_for_all();

    let status = result.get().unwrap();
    let failure = status.failure().unwrap();
    assert_eq!(failure.stage, Stage::Materialize);
    assert_eq!(failure.error, StageError::NotReady);
    assert_eq!(Tally::get(&tally.transforms), 0);
}

#[test]
fn test_panicking_collaborator_is_contained() {
    struct Exploding;

    impl Transformer for Exploding {
        type Output = String;

        fn transform(&mut self, _data: &[u8]) -> Result<(), StageError> {
            panic!("decoder exploded");
        }

        fn finalize(&mut self) -> Result<String, StageError> {
            Ok(String::new())
        }
    }

    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let exploded = ResultSlot::new();
    let healthy = ResultSlot::new();

    pump.submit(
        MemoryFetcher::new(&b"boom"[..]),
        Exploding,
        Some(exploded.clone()),
        None,
    )
    .unwrap();
    pump.submit(
        TestFetcher::ok(b"fine", &tally),
        TestTransformer::ok(&tally),
        Some(healthy.clone()),
        None,
    )
    .unwrap();
    pump.wait_for_all();

    let status = exploded.get().unwrap();
    let failure = status.failure().unwrap();
    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(
        failure.error,
        StageError::Panicked("decoder exploded".to_string())
    );
    // The worker survived and processed the next job.
    assert_eq!(healthy.get(), Some(JobStatus::Success));
}

#[test]
fn test_transform_error_skips_finalize() {
    struct Rejecting {
        tally: Arc<Tally>,
    }

    impl Transformer for Rejecting {
        type Output = String;

        fn transform(&mut self, _data: &[u8]) -> Result<(), StageError> {
            self.tally.transforms.fetch_add(1, Ordering::SeqCst);
            Err(StageError::invalid_data("bad header"))
        }

        fn finalize(&mut self) -> Result<String, StageError> {
            self.tally.finalizes.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    impl Drop for Rejecting {
        fn drop(&mut self) {
            self.tally.transformer_drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let result = ResultSlot::new();
    let object = ObjectSlot::new();

    pump.submit(
        TestFetcher::ok(b"corrupt", &tally),
        Rejecting {
            tally: Arc::clone(&tally),
        },
        Some(result.clone()),
        Some(object.clone()),
    )
    .unwrap();
    pump.wait_for_all();

    let status = result.get().unwrap();
    let failure = status.failure().unwrap();
    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(failure.error, StageError::invalid_data("bad header"));
    assert!(!object.is_filled());
    assert_eq!(Tally::get(&tally.transforms), 1);
    assert_eq!(Tally::get(&tally.finalizes), 0);
    assert_eq!(Tally::get(&tally.fetcher_drops), 1);
    assert_eq!(Tally::get(&tally.transformer_drops), 1);
    assert_eq!(pump.outstanding_count(), 0);
}

#[test]
fn test_panicking_release_keeps_worker_alive() {
    /// Fails to fetch, then panics while being dropped.
    struct BrokenHandle;

    impl Fetcher for BrokenHandle {
        fn fetch(&mut self) -> Result<(), StageError> {
            Err(StageError::failed("connection reset"))
        }

        fn materialize(&mut self) -> Result<&[u8], StageError> {
            Err(StageError::NotReady)
        }
    }

    impl Drop for BrokenHandle {
        fn drop(&mut self) {
            panic!("close on dead handle");
        }
    }

    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let first = ResultSlot::new();
    let second = ResultSlot::new();

    pump.submit(
        BrokenHandle,
        TestTransformer::ok(&tally),
        Some(first.clone()),
        None,
    )
    .unwrap();
    pump.submit(
        MemoryFetcher::new(&b"healthy"[..]),
        TestTransformer::ok(&tally),
        Some(second.clone()),
        None,
    )
    .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let waiter = pump.clone();
    thread::spawn(move || {
        waiter.wait_for_all();
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("wait_for_all did not return");

    let status = first.get().unwrap();
    assert_eq!(status.failure().unwrap().stage, Stage::Fetch);
    assert_eq!(second.get(), Some(JobStatus::Success));
    assert_eq!(pump.outstanding_count(), 0);
    assert_eq!(Tally::get(&tally.transformer_drops), 2);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_release_exactly_once_across_outcomes() {
    let pump = Pump::with_threads(2, 2).unwrap();
    let tally = Arc::new(Tally::default());

    for i in 0..30 {
        let fetcher = if i % 3 == 0 {
            TestFetcher::failing(&tally)
        } else {
            TestFetcher::ok(b"x", &tally)
        };
        let transformer = TestTransformer::new(i % 5 == 0, &tally);
        pump.submit(fetcher, transformer, None, None).unwrap();
    }
    pump.wait_for_all();

    assert_eq!(Tally::get(&tally.fetcher_drops), 30);
    assert_eq!(Tally::get(&tally.transformer_drops), 30);
}

#[test]
fn test_shutdown_leaves_no_slot_unset() {
    let tally = Arc::new(Tally::default());
    let slots = slots(50);

    {
        let pump = Pump::with_threads(2, 2).unwrap();
        for (i, (result, object)) in slots.iter().enumerate() {
            let fetcher = if i % 7 == 0 {
                TestFetcher::failing(&tally)
            } else {
                TestFetcher::ok(b"x", &tally)
            };
            pump.submit(
                fetcher,
                TestTransformer::ok(&tally),
                Some(result.clone()),
                Some(object.clone()),
            )
            .unwrap();
        }
        pump.drain_finalize(5);
    }

    for (result, object) in &slots {
        match result.get() {
            Some(JobStatus::Success) => assert!(object.is_filled()),
            Some(JobStatus::Cancelled) | Some(JobStatus::Failed(_)) => {
                assert!(!object.is_filled())
            }
            None => panic!("job left without a status"),
        }
    }
    assert_eq!(Tally::get(&tally.fetcher_drops), 50);
    assert_eq!(Tally::get(&tally.transformer_drops), 50);
}

#[test]
fn test_purge_twice_is_safe() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());

    for _ in 0..5 {
        pump.submit(
            TestFetcher::ok(b"x", &tally),
            TestTransformer::ok(&tally),
            None,
            None,
        )
        .unwrap();
    }

    pump.purge_all();
    assert!(pump.queue_status().is_empty());
    assert_eq!(pump.outstanding_count(), 0);

    pump.purge_all();
    assert!(pump.queue_status().is_empty());
    assert_eq!(Tally::get(&tally.fetcher_drops), 5);
}

#[test]
fn test_pump_usable_after_purge() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());

    pump.submit(
        TestFetcher::ok(b"first", &tally),
        TestTransformer::ok(&tally),
        None,
        None,
    )
    .unwrap();
    pump.purge_all();

    let result = ResultSlot::new();
    let object = ObjectSlot::new();
    pump.submit(
        TestFetcher::ok(b"second", &tally),
        TestTransformer::ok(&tally),
        Some(result.clone()),
        Some(object.clone()),
    )
    .unwrap();
    pump.wait_for_all();

    assert_eq!(result.get(), Some(JobStatus::Success));
    assert_eq!(object.take().as_deref(), Some("second"));
}

#[test]
fn test_clone_keeps_pump_alive() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let other = pump.clone();
    assert_eq!(pump.ref_count(), 2);
    drop(pump);

    let result = ResultSlot::new();
    other
        .submit(
            MemoryFetcher::new(&b"still running"[..]),
            FnTransformer::new(
                |data: &[u8]| Ok::<_, StageError>(data.len()),
                |len: usize| Ok::<_, StageError>(len.to_string()),
            ),
            Some(result.clone()),
            None,
        )
        .unwrap();
    other.wait_for_all();

    assert_eq!(other.ref_count(), 1);
    assert_eq!(result.get(), Some(JobStatus::Success));
}

#[test]
fn test_independent_pumps_coexist() {
    let first = Pump::with_threads(1, 1).unwrap();
    let second = Pump::with_threads(1, 1).unwrap();
    let a = ObjectSlot::new();
    let b = ObjectSlot::new();

    let upper = || {
        FnTransformer::new(
            |data: &[u8]| Ok::<_, StageError>(String::from_utf8_lossy(data).into_owned()),
            |text: String| Ok::<_, StageError>(text.to_uppercase()),
        )
    };

    first
        .submit(MemoryFetcher::new(&b"left"[..]), upper(), None, Some(a.clone()))
        .unwrap();
    second
        .submit(MemoryFetcher::new(&b"right"[..]), upper(), None, Some(b.clone()))
        .unwrap();

    first.wait_for_all();
    second.wait_for_all();

    assert_eq!(a.take().as_deref(), Some("LEFT"));
    assert_eq!(b.take().as_deref(), Some("RIGHT"));
}

#[test]
fn test_lazy_fetcher_and_mapped_output() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let object = ObjectSlot::new();

    let fetcher = LazyFetcher::new(|| Ok(Bytes::from_static(b"12345")));
    let transformer = FnTransformer::new(
        |data: &[u8]| Ok::<_, StageError>(data.len()),
        |len: usize| Ok::<_, StageError>(len),
    )
    .map_output(|len| len * 2);

    pump.submit(fetcher, transformer, None, Some(object.clone()))
        .unwrap();
    pump.wait_for_all();

    assert_eq!(object.take(), Some(10));
}

#[test]
fn test_object_slot_cleared_on_submit() {
    let pump = Pump::with_threads(1, 1).unwrap();
    let tally = Arc::new(Tally::default());
    let object = ObjectSlot::new();

    pump.submit(
        TestFetcher::ok(b"first", &tally),
        TestTransformer::ok(&tally),
        None,
        Some(object.clone()),
    )
    .unwrap();
    pump.wait_for_all();
    assert!(object.is_filled());

    // A failing job reusing the slot must not leave the stale object behind.
    pump.submit(
        TestFetcher::failing(&tally),
        TestTransformer::ok(&tally),
        None,
        Some(object.clone()),
    )
    .unwrap();
    pump.wait_for_all();
    assert!(!object.is_filled());
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let err = Pump::<String>::with_threads(1, 1024).unwrap_err();
    assert!(matches!(err, PumpError::InvalidThreadCount { .. }));

    let config = PumpConfig::default().with_fetch_threads(stagepump::ThreadCount::Exact(0));
    let err = Pump::<String>::new(&config).unwrap_err();
    assert!(matches!(err, PumpError::InvalidThreadCount { requested: 0, .. }));
}
