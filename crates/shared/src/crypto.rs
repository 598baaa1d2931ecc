//! Digest utilities for archive checksums.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Read buffer size used when hashing streams.
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Hashes everything readable from `reader` without loading it into memory.
///
/// Returns the hex digest and the number of bytes consumed.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}
