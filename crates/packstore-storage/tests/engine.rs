//! End-to-end behaviour of the storage engine over real block files

use packstore_common::{Config, Error, LocationDescriptor, SetName};
use packstore_meta_store::{MemoryMetaStore, MetadataStore, RedbMetaStore};
use packstore_storage::{StorageEngine, StoreOutcome};
use rand::Rng;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn config(root: &Path, block_size: u64) -> Config {
    let mut config = Config::default();
    config.node.name = "node1".into();
    config.node.port = 9000;
    config.storage.root = root.to_path_buf();
    config.storage.block_size = block_size;
    config
}

fn set(name: &str) -> SetName {
    SetName::new(name).unwrap()
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill(&mut buf[..]);
    buf
}

fn stored(outcome: StoreOutcome) -> LocationDescriptor {
    match outcome {
        StoreOutcome::Stored(location) => location,
        StoreOutcome::Duplicate => panic!("expected a new record"),
    }
}

#[test]
fn store_then_fetch_returns_original_bytes() {
    let dir = TempDir::new().unwrap();
    let engine =
        StorageEngine::open(&config(dir.path(), 4096), Arc::new(MemoryMetaStore::new())).unwrap();

    let mut objects = Vec::new();
    for i in 0..50 {
        let set = set(if i % 2 == 0 { "photos" } else { "thumbs" });
        let payload = random_payload(rand::thread_rng().gen_range(1..700));
        let hash = format!("hash{i}");
        stored(engine.store(&set, &hash, &payload).unwrap());
        objects.push((set, hash, payload));
    }

    for (set, hash, payload) in &objects {
        assert_eq!(engine.fetch(set, hash).unwrap().as_ref(), payload.as_slice());
    }
    assert!(engine.shutdown().is_clean());
}

#[test]
fn three_objects_roll_into_second_block() {
    let dir = TempDir::new().unwrap();
    let engine =
        StorageEngine::open(&config(dir.path(), 1024), Arc::new(MemoryMetaStore::new())).unwrap();
    let photos = set("photos");

    let first = stored(engine.store(&photos, "h1", &[1u8; 500]).unwrap());
    let second = stored(engine.store(&photos, "h2", &[2u8; 500]).unwrap());
    let third = stored(engine.store(&photos, "h3", &[3u8; 500]).unwrap());

    assert_eq!((first.block, first.offset), (0, 0));
    assert_eq!((second.block, second.offset), (0, 500));
    assert_eq!((third.block, third.offset), (1, 0));
    assert_eq!(first.to_string(), "1#photos#node1#9000#0#0#500");
    assert_eq!(third.to_string(), "1#photos#node1#9000#1#0#500");
    assert_eq!(engine.stats().snapshot().rollovers, 1);
    assert_eq!(engine.fetch(&photos, "h3").unwrap().as_ref(), &[3u8; 500]);
}

#[test]
fn rollover_keeps_every_object_inside_its_block() {
    let dir = TempDir::new().unwrap();
    let engine =
        StorageEngine::open(&config(dir.path(), 2048), Arc::new(MemoryMetaStore::new())).unwrap();
    let photos = set("photos");

    let locations: Vec<_> = (0..40)
        .map(|i| {
            let payload = random_payload(300);
            stored(engine.store(&photos, &format!("h{i}"), &payload).unwrap())
        })
        .collect();

    let blocks: Vec<_> = fs::read_dir(dir.path().join("photos"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(blocks.len() > 1, "expected several blocks, got {blocks:?}");

    for location in &locations {
        let len = fs::metadata(dir.path().join(location.relative_path()))
            .unwrap()
            .len();
        assert!(location.end() <= len);
        assert!(location.end() <= 2048);
    }
}

#[test]
fn concurrent_duplicate_has_one_winner() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(
        StorageEngine::open(&config(dir.path(), 4096), Arc::new(MemoryMetaStore::new())).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [b'a', b'b']
        .into_iter()
        .map(|fill| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let payload = vec![fill; 64];
                barrier.wait();
                let outcome = engine.store(&set("photos"), "same", &payload).unwrap();
                (outcome, payload)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<_> = results
        .iter()
        .filter(|(outcome, _)| !outcome.is_duplicate())
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(results.iter().filter(|(o, _)| o.is_duplicate()).count(), 1);

    let winning_payload = &winners[0].1;
    assert_eq!(
        engine.fetch(&set("photos"), "same").unwrap().as_ref(),
        winning_payload.as_slice()
    );
    assert_eq!(engine.reference_count(&set("photos"), "same").unwrap(), 2);
}

#[test]
fn concurrent_writers_on_many_sets() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(
        StorageEngine::open(&config(dir.path(), 1024), Arc::new(MemoryMetaStore::new())).unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let set = set(&format!("set{}", t % 2));
                (0..25)
                    .map(|i| {
                        let hash = format!("t{t}-{i}");
                        let payload = random_payload(100);
                        stored(engine.store(&set, &hash, &payload).unwrap());
                        (set.clone(), hash, payload)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for (set, hash, payload) in handle.join().unwrap() {
            assert_eq!(engine.fetch(&set, &hash).unwrap().as_ref(), payload.as_slice());
        }
    }
}

#[test]
fn restart_resumes_without_overwriting() {
    let dir = TempDir::new().unwrap();
    let meta = Arc::new(MemoryMetaStore::new());
    let photos = set("photos");

    let before: Vec<_> = {
        let engine = StorageEngine::open(&config(dir.path(), 1024), meta.clone()).unwrap();
        let written: Vec<_> = (0..5)
            .map(|i| {
                let payload = random_payload(300);
                let location = stored(engine.store(&photos, &format!("h{i}"), &payload).unwrap());
                (format!("h{i}"), payload, location)
            })
            .collect();
        assert!(engine.shutdown().is_clean());
        written
    };
    meta.reopen();
    let cursor: u64 = meta.get("photos.blk.node1").unwrap().unwrap().parse().unwrap();

    let engine = StorageEngine::open(&config(dir.path(), 1024), meta.clone()).unwrap();
    let fresh = stored(engine.store(&photos, "new", &[9u8; 100]).unwrap());
    assert!(fresh.block >= cursor);
    for (_, _, location) in &before {
        let overlaps = location.block == fresh.block
            && fresh.offset < location.end()
            && location.offset < fresh.end();
        assert!(!overlaps, "{fresh} overwrites {location}");
    }
    for (hash, payload, _) in &before {
        assert_eq!(engine.fetch(&photos, hash).unwrap().as_ref(), payload.as_slice());
    }
    assert_eq!(engine.set_hosts(&photos).unwrap(), vec!["node1#9000"]);
}

#[test]
fn restart_over_redb_metadata() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir.path().join("data"), 1 << 20);
    config.metadata.path = dir.path().join("meta.redb");
    let photos = set("photos");

    let first = {
        let meta = Arc::new(RedbMetaStore::open(&config.metadata.path).unwrap());
        let engine = StorageEngine::open(&config, meta).unwrap();
        let location = stored(engine.store(&photos, "abc", b"persisted").unwrap());
        assert!(engine.shutdown().is_clean());
        location
    };

    let meta = Arc::new(RedbMetaStore::open(&config.metadata.path).unwrap());
    let engine = StorageEngine::open(&config, meta).unwrap();
    assert_eq!(engine.fetch(&photos, "abc").unwrap().as_ref(), b"persisted");
    assert!(engine.store(&photos, "abc", b"persisted").unwrap().is_duplicate());

    let second = stored(engine.store(&photos, "def", b"more").unwrap());
    assert_eq!(second.block, first.block);
    // The duplicate's orphaned bytes sit between the two records
    assert_eq!(second.offset, first.end() + 9);
    assert!(engine.shutdown().is_clean());
}

#[test]
fn malformed_descriptors_are_format_errors() {
    let dir = TempDir::new().unwrap();
    let engine =
        StorageEngine::open(&config(dir.path(), 1024), Arc::new(MemoryMetaStore::new())).unwrap();

    for bad in [
        "1#setA#node1#9000#0#0",
        "",
        "2#setA#node1#9000#0#0#5",
        "1#setA#node1#port#0#0#5",
        "1#setA#node1#9000#0#-1#5",
        "1#..#node1#9000#0#0#5",
        "1#setA#node1#9000#0#0#5#extra",
    ] {
        let err = engine.resolve(bad).unwrap_err();
        assert!(err.is_format_error(), "{bad:?} gave {err}");
    }
}

#[test]
fn delete_set_then_fetch_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let engine =
        StorageEngine::open(&config(dir.path(), 1024), Arc::new(MemoryMetaStore::new())).unwrap();
    let photos = set("photos");
    stored(engine.store(&photos, "abc", b"hello").unwrap());
    assert_eq!(engine.fetch(&photos, "abc").unwrap().as_ref(), b"hello");

    assert!(engine.delete_set(&photos).unwrap());
    assert!(!dir.path().join("photos").exists());
    assert_eq!(engine.open_read_handles(), 0);

    let err = engine.fetch(&photos, "abc").unwrap_err();
    assert!(err.is_not_found() || err.is_io_error(), "unexpected {err}");

    // Missing sets delete as a no-op
    assert!(!engine.delete_set(&photos).unwrap());
    assert!(!engine.delete_set(&set("never-written")).unwrap());

    // Writing again recreates the directory from the surviving cursor
    stored(engine.store(&photos, "def", b"again").unwrap());
    assert_eq!(engine.fetch(&photos, "def").unwrap().as_ref(), b"again");
}

#[test]
fn batch_store_checks_lengths_first() {
    let dir = TempDir::new().unwrap();
    let engine =
        StorageEngine::open(&config(dir.path(), 1024), Arc::new(MemoryMetaStore::new())).unwrap();

    let err = engine
        .store_batch(&[set("photos"), set("photos")], &["a"], &[b"x".as_slice()])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!dir.path().join("photos").exists());

    let outcomes = engine
        .store_batch(
            &[set("photos"), set("photos"), set("thumbs")],
            &["a", "a", "b"],
            &[b"one".as_slice(), b"one".as_slice(), b"two".as_slice()],
        )
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], Ok(StoreOutcome::Stored(_))));
    assert!(matches!(outcomes[1], Ok(StoreOutcome::Duplicate)));
    assert!(matches!(outcomes[2], Ok(StoreOutcome::Stored(_))));
    assert_eq!(engine.fetch(&set("thumbs"), "b").unwrap().as_ref(), b"two");
}

#[test]
fn metadata_failure_reports_and_does_not_corrupt_offsets() {
    let dir = TempDir::new().unwrap();
    let meta = Arc::new(MemoryMetaStore::new());
    let engine = StorageEngine::open(&config(dir.path(), 1024), meta.clone()).unwrap();
    let photos = set("photos");
    let first = stored(engine.store(&photos, "a", b"12345").unwrap());

    meta.close().unwrap();
    let err = engine.store(&photos, "b", b"67890").unwrap_err();
    assert!(matches!(err, Error::MetadataStore(_)));
    meta.reopen();

    // The failed store's bytes are orphaned; the next one lands after them
    let next = stored(engine.store(&photos, "c", b"abc").unwrap());
    assert_eq!(next.offset, first.end() + 5);
    assert!(matches!(
        engine.fetch(&photos, "b"),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn dotted_names_do_not_share_lookups() {
    let dir = TempDir::new().unwrap();
    let engine =
        StorageEngine::open(&config(dir.path(), 1024), Arc::new(MemoryMetaStore::new())).unwrap();
    let dotted = set("a.b");
    let plain = set("a");

    stored(engine.store(&dotted, "c", b"secret-of-set-a.b").unwrap());
    stored(engine.store(&plain, "b.c", b"mine").unwrap());

    // Warm the cache for one pair before reading the other
    assert_eq!(engine.fetch(&dotted, "c").unwrap().as_ref(), b"secret-of-set-a.b");
    assert_eq!(engine.fetch(&plain, "b.c").unwrap().as_ref(), b"mine");
    assert_eq!(engine.fetch(&dotted, "c").unwrap().as_ref(), b"secret-of-set-a.b");
}

#[test]
fn record_pointing_into_another_set_is_rejected() {
    let dir = TempDir::new().unwrap();
    let meta = Arc::new(MemoryMetaStore::new());
    let engine = StorageEngine::open(&config(dir.path(), 1024), meta.clone()).unwrap();
    let other = stored(engine.store(&set("private"), "k", b"hidden").unwrap());

    assert!(meta.hsetnx("photos", "k", &other.to_string()).unwrap());
    let err = engine.fetch(&set("photos"), "k").unwrap_err();
    assert!(matches!(err, Error::MetadataStore(_)), "unexpected {err}");
}

#[test]
fn failed_rollover_does_not_skip_a_block() {
    let dir = TempDir::new().unwrap();
    let meta = Arc::new(MemoryMetaStore::new());
    let engine = StorageEngine::open(&config(dir.path(), 1024), meta.clone()).unwrap();
    let photos = set("photos");
    stored(engine.store(&photos, "h1", &[1u8; 500]).unwrap());
    stored(engine.store(&photos, "h2", &[2u8; 500]).unwrap());

    let blocker = dir.path().join("photos").join("b1");
    fs::create_dir(&blocker).unwrap();
    assert!(engine.store(&photos, "h3", &[3u8; 500]).unwrap_err().is_io_error());
    fs::remove_dir(&blocker).unwrap();

    let third = stored(engine.store(&photos, "h3", &[3u8; 500]).unwrap());
    assert_eq!(third.to_string(), "1#photos#node1#9000#1#0#500");
    assert_eq!(meta.get("photos.blk.node1").unwrap().as_deref(), Some("1"));
    assert_eq!(engine.fetch(&photos, "h3").unwrap().as_ref(), &[3u8; 500]);
}
