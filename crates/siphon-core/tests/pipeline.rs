//! End-to-end behaviour of scan → queue → drain → extract → report

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use siphon_core::{
    DeliveryError, Document, Drainer, ExtractingConsumer, ExtractionError, Extractor,
    ExtractorConfig, FailureKind, FilterOptions, Latch, MemoryQueue, MemoryReport, PathEntry,
    PathQueue, QueueError, Report, Reporter, RunOptions, ScanOptions, Spewer, Status,
    TextExtractor, spew,
};
use tempfile::TempDir;

fn corpus(n: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..n {
        let sub = dir.path().join(format!("d{}", i % 3));
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join(format!("{i}.txt")), format!("file {i}")).unwrap();
    }
    dir
}

/// Counts calls, then defers to the plain-text extractor
struct Counting {
    inner: TextExtractor,
    calls: AtomicUsize,
    delay: Duration,
}

impl Counting {
    fn new(dir: &Path) -> Arc<Self> {
        Self::slow(dir, Duration::ZERO)
    }

    fn slow(dir: &Path, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: TextExtractor::new(ExtractorConfig {
                working_dir: Some(dir.to_path_buf()),
                ..Default::default()
            }),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for Counting {
    fn extract(&self, path: &PathEntry) -> Result<Document, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.extract(path)
    }
}

#[derive(Default)]
struct Collect {
    paths: Mutex<Vec<String>>,
}

impl Collect {
    fn sorted(&self) -> Vec<String> {
        let mut paths = self.paths.lock().unwrap().clone();
        paths.sort();
        paths
    }
}

impl Spewer for Collect {
    fn write(&self, doc: &Document) -> Result<(), DeliveryError> {
        self.paths.lock().unwrap().push(doc.path.to_key());
        Ok(())
    }
}

fn run_options(dir: &Path) -> RunOptions {
    RunOptions {
        roots: vec![dir.to_path_buf()],
        scan: ScanOptions {
            path_base: Some(dir.to_path_buf()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn consumer(
    extractor: Arc<dyn Extractor>,
    spewer: Arc<dyn Spewer>,
    parallelism: usize,
    report: Option<Arc<dyn Report>>,
) -> Arc<ExtractingConsumer> {
    let c = ExtractingConsumer::new(extractor, spewer, parallelism).unwrap();
    Arc::new(match report {
        Some(report) => c.with_reporter(Reporter::new(report)),
        None => c,
    })
}

#[test]
fn every_path_dispatched_exactly_once() {
    let dir = corpus(40);
    for parallelism in [1, 3, 8] {
        let extractor = Counting::new(dir.path());
        let spewer = Arc::new(Collect::default());
        let queue: Arc<dyn PathQueue> = Arc::new(MemoryQueue::new(8));
        let c = consumer(extractor.clone(), spewer.clone(), parallelism, None);

        let summary = spew(queue.clone(), c, &run_options(dir.path())).unwrap();

        assert_eq!(summary.drained, 40, "parallelism {parallelism}");
        assert_eq!(summary.extracted, 40);
        assert_eq!(extractor.calls(), 40);
        let mut seen = spewer.sorted();
        seen.dedup();
        assert_eq!(seen.len(), 40);
        assert!(queue.is_empty());
    }
}

#[test]
fn second_run_skips_everything() {
    let dir = corpus(12);
    let report: Arc<dyn Report> = Arc::new(MemoryReport::new());

    let first = Counting::new(dir.path());
    let queue: Arc<dyn PathQueue> = Arc::new(MemoryQueue::new(4));
    let c = consumer(first.clone(), Arc::new(Collect::default()), 4, Some(report.clone()));
    let summary = spew(queue.clone(), c, &run_options(dir.path())).unwrap();
    assert_eq!(summary.extracted, 12);
    assert_eq!(report.len(), 12);

    let second = Counting::new(dir.path());
    let spewer = Arc::new(Collect::default());
    let c = consumer(second.clone(), spewer.clone(), 4, Some(report.clone()));
    let summary = spew(queue, c, &run_options(dir.path())).unwrap();

    assert_eq!(summary.drained, 12);
    assert_eq!(summary.skipped, 12);
    assert_eq!(summary.extracted, 0);
    assert_eq!(second.calls(), 0);
    assert!(spewer.sorted().is_empty());
}

#[test]
fn entry_enqueued_just_before_seal_is_not_lost() {
    struct Noop;
    impl Extractor for Noop {
        fn extract(&self, path: &PathEntry) -> Result<Document, ExtractionError> {
            Ok(Document::new(path.clone(), String::new()))
        }
    }

    for round in 0..200 {
        let queue = Arc::new(MemoryQueue::new(4));
        let latch = Arc::new(Latch::new());
        let c = consumer(Arc::new(Noop), Arc::new(Collect::default()), 1, None);
        let draining = Drainer::new(queue.clone(), c)
            .with_latch(latch.clone())
            .drain()
            .unwrap();

        let producer = {
            let queue = queue.clone();
            let latch = latch.clone();
            std::thread::spawn(move || {
                queue.put(PathEntry::new("last.txt"), None).unwrap();
                latch.seal();
            })
        };
        producer.join().unwrap();

        assert_eq!(draining.join().unwrap(), 1, "round {round}");
        assert!(queue.is_empty());
    }
}

/// Enqueues one entry and seals the latch from inside the first empty poll,
/// so both land between the drainer's miss and its seal check.
struct SealOnFirstMiss {
    inner: MemoryQueue,
    latch: Arc<Latch>,
    fired: AtomicBool,
}

impl PathQueue for SealOnFirstMiss {
    fn put(&self, entry: PathEntry, timeout: Option<Duration>) -> Result<bool, QueueError> {
        self.inner.put(entry, timeout)
    }

    fn poll(&self, timeout: Duration) -> Result<Option<PathEntry>, QueueError> {
        let polled = self.inner.poll(timeout)?;
        if polled.is_none() && !self.fired.swap(true, Ordering::SeqCst) {
            self.inner.put(PathEntry::new("raced.txt"), None)?;
            self.latch.seal();
        }
        Ok(polled)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn close(&self) -> Result<(), QueueError> {
        self.inner.close()
    }
}

#[test]
fn entry_sealed_right_after_a_miss_is_dispatched() {
    struct Noop;
    impl Extractor for Noop {
        fn extract(&self, path: &PathEntry) -> Result<Document, ExtractionError> {
            Ok(Document::new(path.clone(), String::new()))
        }
    }

    let latch = Arc::new(Latch::new());
    let queue = Arc::new(SealOnFirstMiss {
        inner: MemoryQueue::new(4),
        latch: latch.clone(),
        fired: AtomicBool::new(false),
    });
    let spewer = Arc::new(Collect::default());
    let c = consumer(Arc::new(Noop), spewer.clone(), 1, None);
    let draining = Drainer::new(queue.clone(), c.clone())
        .with_latch(latch)
        .drain()
        .unwrap();

    assert_eq!(draining.join().unwrap(), 1);
    assert!(queue.is_empty());
    c.shutdown();
    assert!(c.await_termination(Duration::from_secs(5)));
    assert_eq!(spewer.sorted(), ["raced.txt"]);
}

/// Fails every poll after the first `ok` ones
struct FailingQueue {
    inner: MemoryQueue,
    polls: AtomicUsize,
    ok: usize,
}

impl PathQueue for FailingQueue {
    fn put(&self, entry: PathEntry, timeout: Option<Duration>) -> Result<bool, QueueError> {
        self.inner.put(entry, timeout)
    }

    fn poll(&self, timeout: Duration) -> Result<Option<PathEntry>, QueueError> {
        if self.polls.fetch_add(1, Ordering::SeqCst) >= self.ok {
            return Err(QueueError::Closed);
        }
        self.inner.poll(timeout)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn close(&self) -> Result<(), QueueError> {
        self.inner.close()
    }
}

#[test]
fn failed_drainer_ends_the_run_while_scanning() {
    let dir = corpus(50);
    let queue: Arc<dyn PathQueue> = Arc::new(FailingQueue {
        inner: MemoryQueue::new(2),
        polls: AtomicUsize::new(0),
        ok: 3,
    });
    let c = consumer(Counting::new(dir.path()), Arc::new(Collect::default()), 1, None);
    let options = run_options(dir.path());

    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(spew(queue, c, &options).map(|s| s.drained));
    });
    let result = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("run did not end after the drainer failed");
    assert!(result.is_err());
}

#[test]
fn queue_never_exceeds_capacity() {
    const CAPACITY: usize = 4;
    let dir = corpus(60);
    let queue = Arc::new(MemoryQueue::new(CAPACITY));
    let extractor = Counting::slow(dir.path(), Duration::from_millis(2));
    let c = consumer(extractor, Arc::new(Collect::default()), 2, None);

    let running = Arc::new(AtomicBool::new(true));
    let peak = Arc::new(AtomicUsize::new(0));
    let monitor = {
        let queue = queue.clone();
        let running = running.clone();
        let peak = peak.clone();
        std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                peak.fetch_max(queue.len(), Ordering::SeqCst);
                std::thread::sleep(Duration::from_micros(200));
            }
        })
    };

    let summary = spew(queue.clone(), c, &run_options(dir.path())).unwrap();
    running.store(false, Ordering::SeqCst);
    monitor.join().unwrap();

    assert_eq!(summary.drained, 60);
    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
}

#[test]
fn filters_select_files() {
    let dir = TempDir::new().unwrap();
    for rel in ["a/tmp/x.txt", "a/b.txt", "a/.hidden.txt", "a/c.md"] {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    let selected = |include_hidden: bool| {
        let spewer = Arc::new(Collect::default());
        let queue: Arc<dyn PathQueue> = Arc::new(MemoryQueue::new(16));
        let c = consumer(Counting::new(dir.path()), spewer.clone(), 2, None);
        let mut options = run_options(dir.path());
        options.scan.filter = FilterOptions {
            include_pattern: Some("**/*.txt".to_string()),
            exclude_pattern: Some("**/tmp/**".to_string()),
            include_hidden,
            ..Default::default()
        };
        spew(queue, c, &options).unwrap();
        spewer.sorted()
    };

    assert_eq!(selected(false), ["a/b.txt"]);
    assert_eq!(selected(true), ["a/.hidden.txt", "a/b.txt"]);
}

#[test]
fn one_bad_file_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    for i in 1..=5 {
        let body: &[u8] = if i == 3 { b"\x00\x01binary" } else { b"text" };
        std::fs::write(dir.path().join(format!("{i}.txt")), body).unwrap();
    }

    let report = Arc::new(MemoryReport::new());
    let queue: Arc<dyn PathQueue> = Arc::new(MemoryQueue::new(2));
    let c = consumer(
        Counting::new(dir.path()),
        Arc::new(Collect::default()),
        2,
        Some(report.clone() as Arc<dyn Report>),
    );
    let summary = spew(queue, c, &run_options(dir.path())).unwrap();

    assert_eq!(summary.drained, 5);
    let entries = report.entries().unwrap();
    let succeeded = entries
        .iter()
        .filter(|(_, e)| e.status == Status::Succeeded)
        .count();
    assert_eq!(succeeded, 4);
    let failed: Vec<_> = entries
        .iter()
        .filter(|(_, e)| e.status.is_failed())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, PathEntry::new("3.txt"));
    assert_eq!(failed[0].1.status, Status::Failed(FailureKind::NotParsed));
}

#[test]
fn stopped_daemon_submits_nothing_more() {
    let dir = corpus(3);
    let queue = Arc::new(MemoryQueue::new(16));
    for i in 0..3 {
        queue
            .put(PathEntry::new(format!("d{i}/{i}.txt")), None)
            .unwrap();
    }
    let c = consumer(Counting::new(dir.path()), Arc::new(Collect::default()), 2, None);
    let draining = Drainer::new(queue.clone(), c.clone())
        .with_poll_timeout(Duration::from_millis(10))
        .drain()
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while draining.dispatched() < 3 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    draining.stop();
    assert_eq!(draining.join().unwrap(), 3);

    // Unrelated writes from another producer after the drainer is done
    queue.put(PathEntry::new("late/1.txt"), None).unwrap();
    queue.put(PathEntry::new("late/2.txt"), None).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(c.stats().submitted, 3);
    assert_eq!(queue.len(), 2);
}

#[test]
fn drain_only_run_empties_existing_queue() {
    let dir = corpus(5);
    let queue = Arc::new(MemoryQueue::new(16));
    for i in 0..5 {
        queue
            .put(PathEntry::new(format!("d{}/{i}.txt", i % 3)), None)
            .unwrap();
    }
    let spewer = Arc::new(Collect::default());
    let c = consumer(Counting::new(dir.path()), spewer.clone(), 2, None);

    let summary = spew(queue.clone(), c, &RunOptions::default()).unwrap();
    assert_eq!(summary.drained, 5);
    assert_eq!(summary.extracted, 5);
    assert!(queue.is_empty());
}
