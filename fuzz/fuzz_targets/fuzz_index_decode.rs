#![no_main]
use libfuzzer_sys::fuzz_target;
use shardpack::{ArchiveIndex, SHARD_COUNT};

// Raw index bytes must decode or fail cleanly, never panic.
fuzz_target!(|data: &[u8]| {
    let Ok(index) = ArchiveIndex::decode(data) else {
        return;
    };

    for entry in &index {
        assert!((entry.shard_id as usize) < SHARD_COUNT);
    }

    // Whatever decoded must encode back to the same bytes
    let encoded = index.encode().unwrap();
    assert_eq!(encoded, data);
});
