//! Concurrent writers on a shared ShardStore
//!
//! Every writer records when it acquires and releases its shard lock; the
//! log is then checked for interleaved critical sections on the same shard.

use crossbeam::channel;
use parking_lot::Mutex;
use shardpack::{ShardLayout, ShardStore, WriteMode};
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Acquired { shard: u8, writer: usize },
    Released { shard: u8, writer: usize },
}

#[test]
fn test_same_shard_critical_sections_never_interleave() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ShardStore::open(temp.path(), ShardLayout::default()).unwrap());
    let log = Arc::new(Mutex::new(Vec::new()));
    let writers = 8;
    let rounds = 25;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|writer| {
            let store = Arc::clone(&store);
            let log = Arc::clone(&log);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let mut offsets = Vec::new();
                for round in 0..rounds {
                    // Two writers per shard
                    let shard = (writer % 4) as u8;
                    let payload = vec![writer as u8; 16 + round];

                    let mut guard = store.lock(shard).unwrap();
                    log.lock().push(Event::Acquired { shard, writer });
                    let offset = guard.write(&payload, WriteMode::Append).unwrap();
                    log.lock().push(Event::Released { shard, writer });
                    drop(guard);

                    offsets.push((shard, offset, payload.len() as u64));
                }
                offsets
            })
        })
        .collect();

    let mut regions: HashMap<u8, Vec<(u64, u64)>> = HashMap::new();
    for handle in handles {
        for (shard, offset, len) in handle.join().unwrap() {
            regions.entry(shard).or_default().push((offset, offset + len));
        }
    }

    // Per shard, acquisitions and releases strictly alternate for one writer
    let log = log.lock();
    let mut holder: HashMap<u8, usize> = HashMap::new();
    for event in log.iter() {
        match *event {
            Event::Acquired { shard, writer } => {
                assert!(
                    holder.insert(shard, writer).is_none(),
                    "shard {} acquired by {} while held",
                    shard,
                    writer
                );
            }
            Event::Released { shard, writer } => {
                assert_eq!(holder.remove(&shard), Some(writer));
            }
        }
    }

    // No two appends landed on the same bytes
    for (shard, mut spans) in regions {
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap on shard {}: {:?}", shard, pair);
        }
        let total: u64 = spans.iter().map(|(start, end)| end - start).sum();
        assert_eq!(store.len(shard).unwrap(), total);
    }
}

#[test]
fn test_held_shard_does_not_block_others() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ShardStore::open(temp.path(), ShardLayout::default()).unwrap());

    let _held = store.lock(0).unwrap();

    let (tx, rx) = channel::unbounded();
    let handles: Vec<_> = (1..shardpack::SHARD_COUNT as u8)
        .map(|shard| {
            let store = Arc::clone(&store);
            let tx = tx.clone();
            std::thread::spawn(move || {
                store.write(shard, b"payload", WriteMode::Append).unwrap();
                tx.send(shard).unwrap();
            })
        })
        .collect();
    drop(tx);

    let mut done = Vec::new();
    for _ in 1..shardpack::SHARD_COUNT {
        done.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
    done.sort_unstable();
    assert_eq!(done, (1..shardpack::SHARD_COUNT as u8).collect::<Vec<_>>());

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_overwrite_and_append_on_one_shard() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ShardStore::open(temp.path(), ShardLayout::default()).unwrap());
    store.write(5, &[0u8; 64], WriteMode::Append).unwrap();

    let overwriter = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..100 {
                store.write(5, &[0xAAu8; 64], WriteMode::OverwriteAt(0)).unwrap();
            }
        })
    };
    let appender = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..100 {
                let offset = store.write(5, &[0xBBu8; 8], WriteMode::Append).unwrap();
                assert!(offset >= 64);
            }
        })
    };
    overwriter.join().unwrap();
    appender.join().unwrap();

    assert_eq!(store.len(5).unwrap(), 64 + 800);
    assert_eq!(store.read(5, 0, 64).unwrap(), vec![0xAAu8; 64]);
    assert_eq!(store.read(5, 64, 800).unwrap(), vec![0xBBu8; 800]);
}
