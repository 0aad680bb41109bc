//! Cryptographic primitives for multi-party protocols.
//!
//! Currently BLAKE3 hashing: one-shot digests and a streaming hasher with
//! non-destructive cumulative reads, used for transcript hashing and
//! content addressing by the layers above.

pub mod error;
pub mod hash;

pub use error::CryptoError;
pub use hash::{BLAKE3_DIGEST_LEN, Blake3Hasher, blake3};
