use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sideinput_api::{ErrorKind, SideInputError, SideInputGenerator, SideInputKey, SideInputStore, UpdateHandler};
use sideinput_engine::{
    ConsumerState, LiveValue, RetryPolicy, Schedule, SideInputWatcher, Synchronizer, spawn_generator_task,
    spawn_watcher,
};
use sideinput_store::{FileStore, FileStoreConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Produces "V1", "V2", ... up to `limit`, then fails every call.
struct Versions {
    calls: AtomicU32,
    limit: u32,
}

impl SideInputGenerator for Versions {
    fn produce(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, SideInputError>> + Send + '_>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.limit {
                return Err(SideInputError::generation("no more values"));
            }
            Ok(format!("V{n}").into_bytes())
        })
    }
}

/// Records every applied value with the time it was applied.
struct Timeline {
    start: Instant,
    applied: Mutex<Vec<(String, Duration)>>,
    fail: AtomicBool,
}

impl Timeline {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            applied: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn applied(&self) -> Vec<(String, Duration)> {
        self.applied.lock().unwrap().clone()
    }
}

impl UpdateHandler for Timeline {
    fn on_side_input_update<'a>(
        &'a self,
        _key: &'a SideInputKey,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), SideInputError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SideInputError::new("handler rejected value"));
            }
            let value = String::from_utf8_lossy(value).into_owned();
            self.applied.lock().unwrap().push((value, self.start.elapsed()));
            Ok(())
        })
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<FileStore> {
    Arc::new(FileStore::open(&FileStoreConfig::new(dir.path()).fsync(false)).unwrap())
}

#[tokio::test(start_paused = true)]
async fn rate_limit_updates_reach_consumer_in_order_within_bound() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let key = SideInputKey::new("rate-limit").unwrap();
    let token = CancellationToken::new();

    let timeline = Timeline::new();
    let sync = Arc::new(Synchronizer::new(store.clone(), RetryPolicy::default()));
    let generator = spawn_generator_task(
        key.clone(),
        Arc::new(Versions { calls: AtomicU32::new(0), limit: 3 }),
        Schedule::every(Duration::from_secs(5)).immediate(false),
        sync,
        token.clone(),
    );

    let consumer_store = Arc::new(FileStore::open_read_only(dir.path()));
    let watcher = SideInputWatcher::new(
        consumer_store,
        timeline.clone(),
        vec![key.clone()],
        Duration::from_secs(2),
    );
    let mut transitions = watcher.subscribe();
    let consumer = spawn_watcher(watcher, token.clone());

    tokio::time::sleep(Duration::from_secs(25)).await;
    token.cancel();
    generator.await.unwrap();
    consumer.await.unwrap();

    let applied = timeline.applied();
    let values: Vec<&str> = applied.iter().map(|(v, _)| v.as_str()).collect();
    assert_eq!(values, vec!["V1", "V2", "V3"]);
    for (i, (value, at)) in applied.iter().enumerate() {
        let published = Duration::from_secs(5 * (i as u64 + 1));
        assert!(*at >= published, "{value} applied at {at:?}, before publish");
        assert!(*at <= published + Duration::from_secs(7), "{value} applied at {at:?}, too late");
    }

    let mut applied_versions = Vec::new();
    while let Ok(t) = transitions.try_recv() {
        if t.state == ConsumerState::Applied {
            applied_versions.push(t.version.unwrap());
        }
    }
    assert_eq!(applied_versions, vec![1, 2, 3]);
    assert_eq!(store.current_version(&key).unwrap(), Some(3));
}

#[tokio::test]
async fn consumer_cursors_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let key = SideInputKey::new("rate-limit").unwrap();
    let sync = Synchronizer::new(store.clone(), RetryPolicy::none());

    let a = Timeline::new();
    let b = Timeline::new();
    a.fail.store(true, Ordering::SeqCst);
    let reader = Arc::new(FileStore::open_read_only(dir.path()));
    let mut watcher_a = SideInputWatcher::new(reader.clone(), a.clone(), vec![key.clone()], Duration::from_millis(10));
    let mut watcher_b = SideInputWatcher::new(reader, b.clone(), vec![key.clone()], Duration::from_millis(10));

    sync.publish(&key, b"100".to_vec()).await.unwrap();
    assert_eq!(watcher_a.poll_once().await, 0);
    assert_eq!(watcher_b.poll_once().await, 1);
    assert_eq!(watcher_a.cursor(&key), None);
    assert_eq!(watcher_b.cursor(&key), Some(1));

    sync.publish(&key, b"200".to_vec()).await.unwrap();
    assert_eq!(watcher_b.poll_once().await, 1);
    assert_eq!(watcher_a.poll_once().await, 0);

    // A recovers and jumps straight to the newest value.
    a.fail.store(false, Ordering::SeqCst);
    assert_eq!(watcher_a.poll_once().await, 1);
    assert_eq!(watcher_a.cursor(&key), Some(2));
    let a_values: Vec<String> = a.applied().into_iter().map(|(v, _)| v).collect();
    let b_values: Vec<String> = b.applied().into_iter().map(|(v, _)| v).collect();
    assert_eq!(a_values, vec!["200"]);
    assert_eq!(b_values, vec!["100", "200"]);
}

#[derive(Debug, PartialEq, serde::Deserialize)]
struct RateLimit {
    per_second: u32,
}

#[tokio::test]
async fn restarted_consumer_reapplies_current_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let key = SideInputKey::new("rate-limit").unwrap();
    let sync = Synchronizer::new(store.clone(), RetryPolicy::none());
    sync.publish(&key, br#"{"per_second": 50}"#.to_vec()).await.unwrap();
    sync.publish(&key, br#"{"per_second": 75}"#.to_vec()).await.unwrap();

    for _ in 0..2 {
        let live = Arc::new(LiveValue::<RateLimit>::new(key.clone()));
        let mut watcher = SideInputWatcher::new(
            Arc::new(FileStore::open_read_only(dir.path())),
            live.clone(),
            vec![key.clone()],
            Duration::from_millis(10),
        );
        assert!(live.get().is_none());
        assert_eq!(watcher.poll_once().await, 1);
        assert_eq!(*live.get().unwrap(), RateLimit { per_second: 75 });
    }

    // An undecodable value leaves the live value and cursor where they were.
    let live = Arc::new(LiveValue::<RateLimit>::new(key.clone()));
    let mut watcher = SideInputWatcher::new(
        Arc::new(FileStore::open_read_only(dir.path())),
        live.clone(),
        vec![key.clone()],
        Duration::from_millis(10),
    );
    watcher.poll_once().await;
    sync.publish(&key, b"not json".to_vec()).await.unwrap();
    assert_eq!(watcher.poll_once().await, 0);
    assert_eq!(watcher.cursor(&key), Some(2));
    assert_eq!(live.get().unwrap().per_second, 75);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishes_on_file_store_are_gapless_and_monotonic() {
    const PUBLISHES: u64 = 48;
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let key = SideInputKey::new("rate-limit").unwrap();
    let sync = Arc::new(Synchronizer::new(store.clone(), RetryPolicy::none()));

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let reader = FileStore::open_read_only(dir.path());
            let key = key.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut last_marker = 0;
                let mut last_record = 0;
                while !stop.load(Ordering::SeqCst) {
                    if let Some(v) = reader.current_version(&key).unwrap() {
                        assert!(v >= last_marker, "marker went back from {last_marker} to {v}");
                        last_marker = v;
                    }
                    match reader.read_latest(&key) {
                        Ok(Some(record)) => {
                            assert!(
                                record.version >= last_record,
                                "record went back from {last_record} to {}",
                                record.version
                            );
                            last_record = record.version;
                        }
                        Ok(None) => {}
                        // Retention may outrun a slow reader; the next read catches up.
                        Err(e) => assert_eq!(e.kind(), ErrorKind::StorageRead, "{e}"),
                    }
                }
            })
        })
        .collect();

    let publishers: Vec<_> = (0..PUBLISHES)
        .map(|i| {
            let sync = sync.clone();
            let key = key.clone();
            tokio::spawn(async move { sync.publish(&key, format!("value-{i}").into_bytes()).await })
        })
        .collect();
    let mut versions = Vec::new();
    for p in publishers {
        versions.push(p.await.unwrap().unwrap().version);
    }
    stop.store(true, Ordering::SeqCst);
    for r in readers {
        r.join().unwrap();
    }

    versions.sort_unstable();
    assert_eq!(versions, (1..=PUBLISHES).collect::<Vec<_>>());
    assert_eq!(store.current_version(&key).unwrap(), Some(PUBLISHES));
    let latest = FileStore::open_read_only(dir.path()).read_latest(&key).unwrap().unwrap();
    assert_eq!(latest.version, PUBLISHES);

    let mut on_disk: Vec<String> = std::fs::read_dir(dir.path().join("rate-limit"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".json"))
        .collect();
    on_disk.sort();
    let expected: Vec<String> = (PUBLISHES - 2..=PUBLISHES).map(|v| format!("{v:020}.json")).collect();
    assert_eq!(on_disk, expected);
}
