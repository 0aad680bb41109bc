//! The stateful endpoint of one peer-to-peer link.
//!
//! A [`Channel`] owns the delivered-but-unread message store, the send/ack
//! counters, the throttle window, the table of in-progress reassemblies, and
//! the graceful-shutdown state machine. Application threads call
//! [`send`](Channel::send) / [`send_async`](Channel::send_async) /
//! [`recv`](Channel::recv); transport threads deliver inbound events through
//! [`on_message`](Channel::on_message) and
//! [`on_chunked_message`](Channel::on_chunked_message).
//!
//! # Locking
//!
//! One mutex guards the message store, the mutex-side counters, and the
//! shutdown flags. Two condition variables share it: `msg_db_cond` wakes
//! blocked receivers (and the shutdown wait on the peer's message count),
//! `ack_fin_cond` wakes throttle waiters and the shutdown FIN/ack waits.
//! `sent_count` is an atomic fetch-and-add counter so the send hot path never
//! takes the mutex; every predicate that involves it re-reads under the mutex.
//! The reassembly table has its own lock, as does each reassembly buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::chunked::ChunkedMessage;
use crate::config::LinkConfig;
use crate::constants::{ACK_KEY, FIN_KEY, FIN_PAYLOAD_LEN, is_reserved_key};
use crate::error::LinkError;
use crate::transport::ChannelTransport;

/// Position of a channel in its terminal sequence.
///
/// A channel is created `Active` and advances monotonically once
/// [`Channel::wait_link_task_finish`] starts. `Closed` means the link is
/// quiescent: every local send has been acked and every peer send has been
/// received, so tearing down the transport is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Active,
    /// No longer accepting payloads; unread messages acked and dropped.
    Draining,
    /// FIN exchanged and the peer's in-flight messages accounted for.
    FinExchanged,
    /// Local async send queue flushed.
    AsyncDrained,
    /// Every local send acknowledged.
    AckDrained,
    Closed,
}

/// State guarded by the primary mutex.
struct ChannelState {
    /// Delivered-but-unread payloads, unique keys.
    msg_db: HashMap<String, Vec<u8>>,
    /// Full application messages delivered locally.
    received_count: u64,
    /// Acks observed from the peer. May transiently exceed the peer's view of
    /// our send count when the transport redelivers.
    ack_count: u64,
    /// The peer's final send count, valid once `received_fin` is set.
    peer_sent_count: u64,
    received_fin: bool,
    /// Set by shutdown step 1: no payload is accepted into `msg_db` afterward.
    waiting_finish: bool,
    phase: LinkPhase,
}

/// One endpoint of a reliable, keyed, bidirectional message channel.
pub struct Channel {
    peer_rank: usize,
    transport: Arc<dyn ChannelTransport>,

    state: Mutex<ChannelState>,
    msg_db_cond: Condvar,
    ack_fin_cond: Condvar,

    /// Application messages handed to the transport. Fetch-and-add on the
    /// send hot path, outside the primary mutex.
    sent_count: AtomicU64,
    recv_timeout_ms: AtomicU64,
    throttle_window_size: AtomicU64,

    /// In-progress reassemblies, one buffer per key.
    chunk_table: Mutex<HashMap<String, Arc<ChunkedMessage>>>,
}

impl Channel {
    /// Create a channel endpoint for the link to `peer_rank`, sending through
    /// `transport`.
    pub fn new(peer_rank: usize, transport: Arc<dyn ChannelTransport>, config: &LinkConfig) -> Self {
        Self {
            peer_rank,
            transport,
            state: Mutex::new(ChannelState {
                msg_db: HashMap::new(),
                received_count: 0,
                ack_count: 0,
                peer_sent_count: 0,
                received_fin: false,
                waiting_finish: false,
                phase: LinkPhase::Active,
            }),
            msg_db_cond: Condvar::new(),
            ack_fin_cond: Condvar::new(),
            sent_count: AtomicU64::new(0),
            recv_timeout_ms: AtomicU64::new(config.recv_timeout_ms),
            throttle_window_size: AtomicU64::new(config.throttle_window_size),
            chunk_table: Mutex::new(HashMap::new()),
        }
    }

    /// The peer this endpoint is linked to.
    pub fn peer_rank(&self) -> usize {
        self.peer_rank
    }

    // ------------------------------------------------------------------ //
    // Configuration
    // ------------------------------------------------------------------ //

    /// Timeout for `recv` waits and throttle waits, in milliseconds.
    pub fn get_recv_timeout(&self) -> u64 {
        self.recv_timeout_ms.load(Ordering::Relaxed)
    }

    pub fn set_recv_timeout(&self, timeout_ms: u64) {
        self.recv_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    /// Change the throttle window. Zero disables throttling and releases any
    /// thread currently blocked on the window.
    pub fn set_throttle_window_size(&self, size: u64) {
        self.throttle_window_size.store(size, Ordering::Relaxed);
        // Waiters re-read the window inside their predicate.
        let _state = self.lock_state();
        self.ack_fin_cond.notify_all();
    }

    // ------------------------------------------------------------------ //
    // Observability
    // ------------------------------------------------------------------ //

    /// Number of application messages handed to the transport so far.
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    /// Number of full application messages delivered locally so far.
    pub fn received_count(&self) -> u64 {
        self.lock_state().received_count
    }

    /// Number of acks observed from the peer so far.
    pub fn ack_count(&self) -> u64 {
        self.lock_state().ack_count
    }

    /// Current position in the shutdown sequence.
    pub fn phase(&self) -> LinkPhase {
        self.lock_state().phase
    }

    // ------------------------------------------------------------------ //
    // Send / receive surface
    // ------------------------------------------------------------------ //

    /// Synchronous send: hands `value` to the transport under `key`, waits for
    /// transport acceptance, then applies throttling.
    pub fn send(&self, key: &str, value: &[u8]) -> Result<(), LinkError> {
        reject_reserved(key)?;
        self.transport.send(key, value)?;
        self.throttle_window_wait(self.sent_count.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Non-blocking dispatch to the transport's async send queue, then
    /// throttling. May block on the throttle window, never on delivery.
    pub fn send_async(&self, key: &str, value: Vec<u8>) -> Result<(), LinkError> {
        reject_reserved(key)?;
        self.transport.send_async(key, value)?;
        self.throttle_window_wait(self.sent_count.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Block until a payload for `key` is available, remove and return it,
    /// then ack the peer.
    ///
    /// Waits up to the configured receive timeout; on expiry the channel state
    /// is unchanged and the call may be retried.
    pub fn recv(&self, key: &str) -> Result<Vec<u8>, LinkError> {
        reject_reserved(key)?;
        let timeout_ms = self.get_recv_timeout();

        let value = {
            let state = self.lock_state();
            let (mut state, _timed_out) = self
                .msg_db_cond
                .wait_timeout_while(state, Duration::from_millis(timeout_ms), |s| {
                    !s.msg_db.contains_key(key)
                })
                .unwrap_or_else(|e| e.into_inner());
            match state.msg_db.remove(key) {
                Some(value) => value,
                None => {
                    return Err(LinkError::RecvTimeout {
                        key: key.to_string(),
                        timeout_ms,
                    });
                }
            }
        };

        // Ack outside the lock; enqueue only, never blocks on the wire.
        self.transport.send_async(ACK_KEY, Vec::new())?;
        Ok(value)
    }

    // ------------------------------------------------------------------ //
    // Inbound surface (transport threads)
    // ------------------------------------------------------------------ //

    /// Single-frame delivery: control steps complete inline, payloads are
    /// published to the message store.
    pub fn on_message(&self, key: &str, value: &[u8]) -> Result<(), LinkError> {
        let mut state = self.lock_state();
        if key == ACK_KEY {
            state.ack_count += 1;
            self.ack_fin_cond.notify_all();
            Ok(())
        } else if key == FIN_KEY {
            let bytes: [u8; FIN_PAYLOAD_LEN] = value.try_into().map_err(|_| {
                LinkError::Protocol(format!(
                    "FIN payload must be {FIN_PAYLOAD_LEN} bytes, got {}",
                    value.len()
                ))
            })?;
            if !state.received_fin {
                state.received_fin = true;
                state.peer_sent_count = u64::from_le_bytes(bytes);
                tracing::debug!(
                    peer = self.peer_rank,
                    peer_sent_count = state.peer_sent_count,
                    "received FIN"
                );
                self.ack_fin_cond.notify_all();
            }
            Ok(())
        } else {
            self.on_normal_message(&mut state, key, value.to_vec());
            Ok(())
        }
    }

    /// Fragment delivery. When the last fragment arrives the reassembled
    /// payload is published exactly once, no matter how many transport threads
    /// raced on the final fragments: removal from the reassembly table is the
    /// sole arbiter.
    pub fn on_chunked_message(
        &self,
        key: &str,
        value: &[u8],
        chunk_idx: usize,
        num_chunks: usize,
    ) -> Result<(), LinkError> {
        if is_reserved_key(key) {
            return Err(LinkError::Protocol(format!(
                "reserved key {key:?} arrived on the chunked surface"
            )));
        }
        if chunk_idx >= num_chunks {
            return Err(LinkError::Protocol(format!(
                "chunk index {chunk_idx} out of range for {num_chunks} chunks"
            )));
        }

        let buffer = {
            let mut table = self.lock_chunk_table();
            Arc::clone(
                table
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(ChunkedMessage::new(num_chunks))),
            )
        };

        buffer.add_chunk(chunk_idx, value.to_vec());
        tracing::trace!(
            peer = self.peer_rank,
            key,
            chunk_idx,
            num_chunks,
            filled = buffer.num_filled(),
            "fragment stored"
        );

        if buffer.is_full() {
            {
                let mut table = self.lock_chunk_table();
                if table.remove(key).is_none() {
                    // Another fragment handler won the race and will publish.
                    return Ok(());
                }
            }
            let payload = buffer.reassemble();
            let mut state = self.lock_state();
            self.on_normal_message(&mut state, key, payload);
        }
        Ok(())
    }

    /// Publish a complete payload under the primary mutex and wake receivers.
    ///
    /// Every delivery counts toward `received_count`, including the ones that
    /// are dropped: a duplicate key keeps its first payload, and a draining
    /// endpoint keeps nothing. Both drops still ack the peer so its throttle
    /// window moves.
    fn on_normal_message(&self, state: &mut ChannelState, key: &str, value: Vec<u8>) {
        state.received_count += 1;
        if state.waiting_finish {
            self.ack_inbound(key);
            tracing::warn!(peer = self.peer_rank, key, "draining, payload dropped and acked");
        } else if state.msg_db.contains_key(key) {
            self.ack_inbound(key);
            tracing::warn!(peer = self.peer_rank, key, "duplicate key, payload dropped");
        } else {
            state.msg_db.insert(key.to_string(), value);
        }
        self.msg_db_cond.notify_all();
    }

    /// Ack on behalf of a payload the application will never read.
    fn ack_inbound(&self, key: &str) {
        if let Err(e) = self.transport.send_async(ACK_KEY, Vec::new()) {
            tracing::warn!(peer = self.peer_rank, key, "failed to ack dropped payload: {e}");
        }
    }

    // ------------------------------------------------------------------ //
    // Throttling
    // ------------------------------------------------------------------ //

    /// Block until fewer than `throttle_window_size` sends are outstanding.
    ///
    /// `wait_count` is this send's position in the global send order; all
    /// sender threads wait on their own position.
    fn throttle_window_wait(&self, wait_count: u64) -> Result<(), LinkError> {
        if self.throttle_window_size.load(Ordering::Relaxed) == 0 {
            return Ok(());
        }
        let timeout_ms = self.get_recv_timeout();
        let state = self.lock_state();
        let (_state, timed_out) = self
            .ack_fin_cond
            .wait_timeout_while(state, Duration::from_millis(timeout_ms), |s| {
                let window = self.throttle_window_size.load(Ordering::Relaxed);
                window != 0 && s.ack_count + window <= wait_count
            })
            .unwrap_or_else(|e| e.into_inner());
        if timed_out.timed_out() {
            return Err(LinkError::ThrottleTimeout { timeout_ms });
        }
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Shutdown
    // ------------------------------------------------------------------ //

    /// The graceful shutdown barrier: four strictly ordered steps after which
    /// no in-flight payload or ack is outstanding on this link.
    ///
    /// 1. Stop accepting payloads; ack and drop everything unread.
    /// 2. Exchange FIN counts and wait for the peer's in-flight messages.
    /// 3. Drain the local async send queue.
    /// 4. Wait for every local send to be acked.
    ///
    /// On return the channel is quiescent and the transport may be closed.
    pub fn wait_link_task_finish(&self) -> Result<(), LinkError> {
        self.stop_receiving_and_ack_unread();
        self.wait_for_fin_and_flying_msgs()?;
        self.transport.wait_async_sends_done();
        self.set_phase(LinkPhase::AsyncDrained);
        self.wait_for_flying_ack();
        self.set_phase(LinkPhase::Closed);
        tracing::debug!(peer = self.peer_rank, "link quiescent");
        Ok(())
    }

    /// Step 1: enter drain mode and ack everything the application never read.
    fn stop_receiving_and_ack_unread(&self) {
        let mut state = self.lock_state();
        state.waiting_finish = true;
        state.phase = LinkPhase::Draining;
        for key in state.msg_db.keys() {
            tracing::warn!(peer = self.peer_rank, key, "unread at shutdown, acked and dropped");
            self.ack_inbound(key);
        }
        state.msg_db.clear();
    }

    /// Step 2: send our final send count, wait for the peer's, then wait until
    /// everything the peer sent has arrived.
    fn wait_for_fin_and_flying_msgs(&self) -> Result<(), LinkError> {
        let sent = self.sent_count.load(Ordering::Relaxed);
        self.transport.send_async(FIN_KEY, sent.to_le_bytes().to_vec())?;

        {
            let state = self.lock_state();
            let _state = self
                .ack_fin_cond
                .wait_while(state, |s| !s.received_fin)
                .unwrap_or_else(|e| e.into_inner());
        }
        {
            let state = self.lock_state();
            let mut state = self
                .msg_db_cond
                .wait_while(state, |s| s.received_count < s.peer_sent_count)
                .unwrap_or_else(|e| e.into_inner());
            if state.received_count > state.peer_sent_count {
                // Transport redelivery on a connection break, not a local bug.
                tracing::warn!(
                    peer = self.peer_rank,
                    received = state.received_count,
                    expected = state.peer_sent_count,
                    "duplicate deliveries observed during run"
                );
            }
            state.phase = LinkPhase::FinExchanged;
        }
        Ok(())
    }

    /// Step 4: wait until the peer has acked every send.
    fn wait_for_flying_ack(&self) {
        let state = self.lock_state();
        let mut state = self
            .ack_fin_cond
            .wait_while(state, |s| {
                s.ack_count < self.sent_count.load(Ordering::Relaxed)
            })
            .unwrap_or_else(|e| e.into_inner());
        let sent = self.sent_count.load(Ordering::Relaxed);
        if state.ack_count > sent {
            tracing::warn!(
                peer = self.peer_rank,
                acks = state.ack_count,
                sent,
                "duplicate acks observed during run"
            );
        }
        state.phase = LinkPhase::AckDrained;
    }

    fn set_phase(&self, phase: LinkPhase) {
        self.lock_state().phase = phase;
    }

    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_chunk_table(&self) -> MutexGuard<'_, HashMap<String, Arc<ChunkedMessage>>> {
        self.chunk_table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn reject_reserved(key: &str) -> Result<(), LinkError> {
    if is_reserved_key(key) {
        return Err(LinkError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Transport double that records outbound traffic and never blocks.
    #[derive(Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingTransport {
        fn outbound(&self) -> Vec<(String, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }

        fn ack_count(&self) -> usize {
            self.outbound().iter().filter(|(k, _)| k == ACK_KEY).count()
        }
    }

    impl ChannelTransport for RecordingTransport {
        fn send(&self, key: &str, payload: &[u8]) -> Result<(), LinkError> {
            self.sent.lock().unwrap().push((key.to_string(), payload.to_vec()));
            Ok(())
        }

        fn send_async(&self, key: &str, payload: Vec<u8>) -> Result<(), LinkError> {
            self.sent.lock().unwrap().push((key.to_string(), payload));
            Ok(())
        }

        fn wait_async_sends_done(&self) {}
    }

    fn test_channel(window: u64) -> (Arc<RecordingTransport>, Channel) {
        let transport = Arc::new(RecordingTransport::default());
        let config = LinkConfig {
            recv_timeout_ms: 200,
            throttle_window_size: window,
            ..LinkConfig::default()
        };
        let channel = Channel::new(1, Arc::clone(&transport) as Arc<dyn ChannelTransport>, &config);
        (transport, channel)
    }

    #[test]
    fn recv_returns_published_payload_and_acks() {
        let (transport, channel) = test_channel(0);
        channel.on_message("x", &[1, 2, 3]).unwrap();
        assert_eq!(channel.recv("x").unwrap(), vec![1, 2, 3]);
        assert_eq!(transport.ack_count(), 1);
        assert_eq!(channel.received_count(), 1);
    }

    #[test]
    fn recv_times_out_without_consuming_state() {
        let (_transport, channel) = test_channel(0);
        let err = channel.recv("missing").unwrap_err();
        assert!(matches!(err, LinkError::RecvTimeout { .. }));
        // A later delivery is still receivable.
        channel.on_message("missing", &[7]).unwrap();
        assert_eq!(channel.recv("missing").unwrap(), vec![7]);
    }

    #[test]
    fn reserved_keys_rejected_on_application_surface() {
        let (_transport, channel) = test_channel(0);
        for key in [ACK_KEY, FIN_KEY] {
            assert!(matches!(channel.send(key, &[]), Err(LinkError::InvalidKey(_))));
            assert!(matches!(
                channel.send_async(key, vec![]),
                Err(LinkError::InvalidKey(_))
            ));
            assert!(matches!(channel.recv(key), Err(LinkError::InvalidKey(_))));
        }
    }

    #[test]
    fn duplicate_key_keeps_first_and_acks_second() {
        let (transport, channel) = test_channel(0);
        channel.on_message("x", &[9]).unwrap();
        channel.on_message("x", &[8]).unwrap();
        assert_eq!(channel.received_count(), 2);
        assert_eq!(transport.ack_count(), 1); // the drop was acked
        assert_eq!(channel.recv("x").unwrap(), vec![9]);
        assert_eq!(transport.ack_count(), 2); // the read was acked too
    }

    #[test]
    fn ack_messages_bump_ack_count() {
        let (_transport, channel) = test_channel(0);
        channel.on_message(ACK_KEY, &[]).unwrap();
        channel.on_message(ACK_KEY, &[]).unwrap();
        assert_eq!(channel.ack_count(), 2);
    }

    #[test]
    fn fin_is_idempotent() {
        let (_transport, channel) = test_channel(0);
        channel.on_message(FIN_KEY, &5u64.to_le_bytes()).unwrap();
        channel.on_message(FIN_KEY, &99u64.to_le_bytes()).unwrap();
        let state = channel.lock_state();
        assert!(state.received_fin);
        assert_eq!(state.peer_sent_count, 5);
    }

    #[test]
    fn malformed_fin_is_a_protocol_error() {
        let (_transport, channel) = test_channel(0);
        let err = channel.on_message(FIN_KEY, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
        // The channel is still usable.
        channel.on_message("k", &[1]).unwrap();
        assert_eq!(channel.recv("k").unwrap(), vec![1]);
    }

    #[test]
    fn chunked_out_of_range_index_rejected() {
        let (_transport, channel) = test_channel(0);
        let err = channel.on_chunked_message("big", &[0], 2, 2).unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[test]
    fn chunked_reserved_key_rejected() {
        let (_transport, channel) = test_channel(0);
        let err = channel.on_chunked_message(ACK_KEY, &[0], 0, 1).unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[test]
    fn chunked_reassembles_out_of_order() {
        let (_transport, channel) = test_channel(0);
        channel.on_chunked_message("big", &[4, 5, 6], 1, 2).unwrap();
        channel.on_chunked_message("big", &[1, 2, 3], 0, 2).unwrap();
        assert_eq!(channel.recv("big").unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn throttle_blocks_at_window_and_releases_on_ack() {
        let (transport, channel) = test_channel(2);
        let channel = Arc::new(channel);
        channel.send_async("a", vec![1]).unwrap();

        // The second send fills the window; its caller blocks until an ack
        // brings the outstanding count back under the window.
        let blocked = Arc::clone(&channel);
        let handle = std::thread::spawn(move || blocked.send_async("b", vec![2]));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(transport.outbound().len(), 2); // handed off, caller waiting
        channel.on_message(ACK_KEY, &[]).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn throttle_times_out_without_acks() {
        // Window 1 makes every send wait for its own ack.
        let (_transport, channel) = test_channel(1);
        let err = channel.send("a", &[1]).unwrap_err();
        assert!(matches!(err, LinkError::ThrottleTimeout { .. }));
    }

    #[test]
    fn zero_window_never_throttles() {
        let (_transport, channel) = test_channel(0);
        for i in 0..32u8 {
            channel.send(&format!("k{i}"), &[i]).unwrap();
        }
        assert_eq!(channel.sent_count(), 32);
    }

    #[test]
    fn draining_drops_payloads_but_still_acks() {
        let (transport, channel) = test_channel(0);
        channel.on_message("late", &[0]).unwrap();

        // Peer claims one message sent; shutdown must ack the unread payload.
        channel.on_message(FIN_KEY, &1u64.to_le_bytes()).unwrap();
        channel.wait_link_task_finish().unwrap();
        assert_eq!(channel.phase(), LinkPhase::Closed);
        assert_eq!(transport.ack_count(), 1);

        // Anything arriving after drain is dropped and acked too.
        channel.on_message("later", &[1]).unwrap();
        assert_eq!(transport.ack_count(), 2);
        assert!(matches!(channel.recv("later"), Err(LinkError::RecvTimeout { .. })));
    }
}
