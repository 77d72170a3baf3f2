// crates/runner-fleet-core/src/core/hashing.rs
// ============================================================================
// Module: Runner Fleet Content Hashing
// Description: Incremental SHA-256 digests for streamed payloads.
// Purpose: Hash blobs chunk by chunk without holding them in memory.
// Dependencies: sha2
// ============================================================================

//! ## Overview
//! [`StreamingDigest`] accumulates a SHA-256 digest across arbitrarily many
//! chunks and renders it as lowercase hex. It implements [`std::io::Write`]
//! so it can sit on either side of a tee.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::io;

use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Streaming Digest
// ============================================================================

/// Rolling SHA-256 accumulator.
#[derive(Clone, Default)]
pub struct StreamingDigest {
    /// Underlying hasher state.
    hasher: Sha256,
    /// Total bytes consumed.
    consumed: u64,
}

impl StreamingDigest {
    /// Creates an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk into the digest.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.consumed = self.consumed.saturating_add(chunk.len() as u64);
    }

    /// Returns the number of bytes consumed so far.
    #[must_use]
    pub const fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Finishes the digest and returns it as lowercase hex.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex_encode(&self.hasher.finalize())
    }

    /// Hashes a complete buffer in one call.
    #[must_use]
    pub fn digest_hex(bytes: &[u8]) -> String {
        let mut digest = Self::new();
        digest.update(bytes);
        digest.finalize_hex()
    }
}

impl fmt::Debug for StreamingDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingDigest").field("consumed", &self.consumed).finish_non_exhaustive()
    }
}

impl io::Write for StreamingDigest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_digest_matches_one_shot() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let mut digest = StreamingDigest::new();
        for chunk in payload.chunks(7) {
            digest.update(chunk);
        }
        assert_eq!(digest.consumed(), payload.len() as u64);
        assert_eq!(digest.finalize_hex(), StreamingDigest::digest_hex(payload));
    }

    #[test]
    fn empty_digest_is_known_value() {
        assert_eq!(
            StreamingDigest::digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
