//! The outbound transport contract consumed by a channel.
//!
//! A channel never touches sockets: it hands keyed byte payloads to a
//! [`ChannelTransport`] and receives inbound events through its own
//! `on_message` / `on_chunked_message` surfaces, routed by a
//! [`ReceiverLoop`](crate::receiver::ReceiverLoop). A transport instance is
//! bound to one peer link.
//!
//! Transports may redeliver a message after a connection break; the channel
//! tolerates duplicates. Transports must preserve per-fragment integrity and
//! deliver `(chunk_idx, num_chunks)` metadata unchanged.

use crate::error::LinkError;

pub trait ChannelTransport: Send + Sync {
    /// Synchronous send: returns once the transport has accepted the payload
    /// for delivery.
    fn send(&self, key: &str, payload: &[u8]) -> Result<(), LinkError>;

    /// Enqueue a payload for asynchronous delivery. Never blocks on the wire.
    fn send_async(&self, key: &str, payload: Vec<u8>) -> Result<(), LinkError>;

    /// Block until every previously enqueued async send has been handed off.
    ///
    /// After this returns no async send callback is pending; the channel's
    /// shutdown sequence relies on that before draining acks.
    fn wait_async_sends_done(&self);
}
