//! BLAKE3 hashing primitives.
//!
//! Provides a one-shot hashing function and a streaming hasher whose digest
//! can be read at any point without disturbing further updates. Digests may
//! be truncated to any length up to the full 32 bytes.

use blake3::Hasher;

use crate::error::CryptoError;

/// Full BLAKE3 digest length in bytes.
pub const BLAKE3_DIGEST_LEN: usize = 32;

/// Compute the BLAKE3 hash of the given data.
#[must_use]
pub fn blake3(data: &[u8]) -> [u8; BLAKE3_DIGEST_LEN] {
    *::blake3::hash(data).as_bytes()
}

/// A streaming BLAKE3 hasher with a configurable (truncated) digest size.
pub struct Blake3Hasher {
    inner: Hasher,
    digest_size: usize,
}

impl Blake3Hasher {
    /// Create a streaming hasher producing full 32-byte digests.
    pub fn new() -> Self {
        Self {
            inner: Hasher::new(),
            digest_size: BLAKE3_DIGEST_LEN,
        }
    }

    /// Create a streaming hasher producing `digest_size`-byte digests,
    /// the first `digest_size` bytes of the full output.
    pub fn with_digest_size(digest_size: usize) -> Result<Self, CryptoError> {
        if digest_size == 0 || digest_size > BLAKE3_DIGEST_LEN {
            return Err(CryptoError::InvalidDigestSize {
                requested: digest_size,
                max: BLAKE3_DIGEST_LEN,
            });
        }
        Ok(Self {
            inner: Hasher::new(),
            digest_size,
        })
    }

    /// Digest length this hasher produces.
    pub fn digest_size(&self) -> usize {
        self.digest_size
    }

    /// Feed more data into the hasher.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Discard all fed data and start over.
    pub fn reset(&mut self) -> &mut Self {
        self.inner.reset();
        self
    }

    /// Digest of everything fed so far.
    ///
    /// Finalization happens on a snapshot of the internal state, so the
    /// hasher remains usable for further updates.
    #[must_use]
    pub fn cumulative_hash(&self) -> Vec<u8> {
        self.inner.finalize().as_bytes()[..self.digest_size].to_vec()
    }
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new()
    }
}
