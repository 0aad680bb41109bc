//! Crypto error types.

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("digest size {requested} out of range (1..={max})")]
    InvalidDigestSize { requested: usize, max: usize },
}
