#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shardpack::{ArchiveIndex, BlobCodec, CodecKind};

#[derive(Arbitrary, Debug)]
struct Input {
    zstd: bool,
    blob: Vec<u8>,
}

// Compressed index files from disk go through the codec first.
fuzz_target!(|input: Input| {
    let codec = if input.zstd {
        CodecKind::Zstd
    } else {
        CodecKind::Lz4
    };

    if let Ok(bytes) = codec.decompress(&input.blob) {
        let _ = ArchiveIndex::decode(&bytes);
    }
});
