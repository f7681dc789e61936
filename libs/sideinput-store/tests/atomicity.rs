use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sideinput_api::{SideInputKey, SideInputRecord, SideInputStore};
use sideinput_store::{FileStore, FileStoreConfig};

/// Value whose every byte is derived from the version, so a torn read is detectable.
fn payload(version: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((version as usize + i) % 251) as u8).collect()
}

fn record(key: &SideInputKey, version: u64) -> SideInputRecord {
    SideInputRecord {
        key: key.clone(),
        value: payload(version, 256 * 1024),
        version,
        updated_at_ms: version as i64,
    }
}

#[test]
fn readers_never_observe_partial_or_regressing_records() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileStoreConfig::new(dir.path()).fsync(false);
    let writer = FileStore::open(&config).unwrap();
    let key = SideInputKey::new("rates").unwrap();
    writer.write(&record(&key, 1)).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let root = dir.path().to_path_buf();
            let key = key.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let reader = FileStore::open_read_only(root);
                let mut last = 0;
                let mut reads = 0usize;
                while !done.load(Ordering::Relaxed) {
                    let rec = reader.read_latest(&key).unwrap().unwrap();
                    assert!(rec.version >= last, "version went back: {} -> {}", last, rec.version);
                    assert_eq!(rec.value, payload(rec.version, rec.value.len()));
                    assert_eq!(rec.value.len(), 256 * 1024);
                    last = rec.version;
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for v in 2..=40 {
        writer.write(&record(&key, v)).unwrap();
    }
    done.store(true, Ordering::Relaxed);

    for r in readers {
        assert!(r.join().unwrap() > 0);
    }
    assert_eq!(writer.current_version(&key).unwrap(), Some(40));
}

#[test]
fn interrupted_publish_is_cleaned_up_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileStoreConfig::new(dir.path()).fsync(false);
    let key = SideInputKey::new("rates").unwrap();
    {
        let store = FileStore::open(&config).unwrap();
        store.write(&record(&key, 1)).unwrap();
    }

    // Crash after the version file was written but before LATEST moved,
    // plus a temp file from a write that never reached rename.
    let key_dir = dir.path().join("rates");
    let orphan = key_dir.join(format!("{:020}.json", 2));
    std::fs::write(&orphan, record(&key, 2).encode().unwrap()).unwrap();
    let tmp = key_dir.join(".tmp-00000000000000000003.json-1-0");
    std::fs::write(&tmp, b"{\"key\":\"ra").unwrap();
    let root_tmp = dir.path().join(".tmp-NOTIFY-1-0");
    std::fs::write(&root_tmp, b"").unwrap();

    let reader = FileStore::open_read_only(dir.path());
    assert_eq!(reader.read_latest(&key).unwrap().unwrap().version, 1);

    let store = FileStore::open(&config).unwrap();
    assert!(!orphan.exists());
    assert!(!tmp.exists());
    assert!(!root_tmp.exists());
    assert_eq!(store.read_latest(&key).unwrap().unwrap().version, 1);

    store.write(&record(&key, 2)).unwrap();
    assert_eq!(store.read_latest(&key).unwrap().unwrap().value, payload(2, 256 * 1024));
}
