//! Wire-level constants shared by every channel implementation.

/// Reserved key for end-to-end acknowledgements.
///
/// The trailing control bytes keep the key out of the printable namespace so
/// it cannot collide with an application-chosen key by accident.
pub const ACK_KEY: &str = "ACK\x01\x00";

/// Reserved key for the final send-count exchange during shutdown.
pub const FIN_KEY: &str = "FIN\x01\x00";

/// Size of a FIN payload: the sender's final send count as a little-endian u64.
pub const FIN_PAYLOAD_LEN: usize = 8;

/// Whether `key` is one of the reserved control keys.
pub fn is_reserved_key(key: &str) -> bool {
    key == ACK_KEY || key == FIN_KEY
}

/// Default receive/throttle timeout: 3 minutes.
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 3 * 60 * 1000;

/// Default throttle window: at most this many unacked sends in flight.
/// Zero disables throttling.
pub const DEFAULT_THROTTLE_WINDOW: u64 = 10;

/// Default fragmentation threshold for transports that chunk large payloads.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 512 * 1024;
