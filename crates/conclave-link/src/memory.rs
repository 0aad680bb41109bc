//! In-process transport: delivers directly into the remote receiver loop.
//!
//! One [`MemoryTransport`] is one direction of a duplex link. Synchronous
//! sends deliver inline on the caller's thread; asynchronous sends go through
//! a dedicated worker thread fed by an unbounded queue, which is what gives
//! the drain step of channel shutdown something real to wait on.
//!
//! The transport holds only a [`Weak`] reference to the remote receiver loop:
//! registries own channels, channels own transports, and nothing owns the far
//! side (which would cycle in an in-process pair). A send after the remote
//! loop is gone surfaces as an I/O failure.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::{Sender, unbounded};

use crate::channel::Channel;
use crate::config::LinkConfig;
use crate::constants::is_reserved_key;
use crate::error::LinkError;
use crate::receiver::ReceiverLoop;
use crate::transport::ChannelTransport;

/// Count of enqueued-but-undelivered async sends, with a condvar for drain.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

/// Delivery half shared by the caller thread and the async worker.
struct Outlet {
    /// Rank this endpoint appears as to the remote side.
    local_rank: usize,
    remote: Weak<ReceiverLoop>,
    /// Payloads above this size are fragmented. Zero disables fragmentation.
    max_payload_size: usize,
}

impl Outlet {
    fn deliver(&self, key: &str, payload: &[u8]) -> Result<(), LinkError> {
        let remote = self
            .remote
            .upgrade()
            .ok_or_else(|| LinkError::Io("remote receiver loop is gone".to_string()))?;

        if self.max_payload_size > 0
            && payload.len() > self.max_payload_size
            && !is_reserved_key(key)
        {
            let num_chunks = payload.len().div_ceil(self.max_payload_size);
            for (chunk_idx, chunk) in payload.chunks(self.max_payload_size).enumerate() {
                remote.on_chunked_message(self.local_rank, key, chunk, chunk_idx, num_chunks)?;
            }
            Ok(())
        } else {
            remote.on_message(self.local_rank, key, payload)
        }
    }
}

/// One endpoint of an in-process duplex link.
pub struct MemoryTransport {
    outlet: Arc<Outlet>,
    queue: Sender<(String, Vec<u8>)>,
    in_flight: Arc<InFlight>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryTransport {
    /// Create an endpoint that appears as `local_rank` to the remote side and
    /// delivers into `remote`. Spawns the async delivery worker.
    pub fn new(local_rank: usize, remote: &Arc<ReceiverLoop>, config: &LinkConfig) -> Arc<Self> {
        let outlet = Arc::new(Outlet {
            local_rank,
            remote: Arc::downgrade(remote),
            max_payload_size: config.max_payload_size,
        });
        let in_flight = Arc::new(InFlight::default());
        let (queue, rx) = unbounded::<(String, Vec<u8>)>();

        let worker_outlet = Arc::clone(&outlet);
        let worker_in_flight = Arc::clone(&in_flight);
        let worker = std::thread::spawn(move || {
            while let Ok((key, payload)) = rx.recv() {
                if let Err(e) = worker_outlet.deliver(&key, &payload) {
                    tracing::warn!(key = %key, "async delivery failed: {e}");
                }
                let mut count = worker_in_flight
                    .count
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                *count -= 1;
                if *count == 0 {
                    worker_in_flight.drained.notify_all();
                }
            }
        });

        Arc::new(Self {
            outlet,
            queue,
            in_flight,
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl ChannelTransport for MemoryTransport {
    fn send(&self, key: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.outlet.deliver(key, payload)
    }

    fn send_async(&self, key: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        // Count before enqueue so a drain started immediately after cannot
        // miss this send.
        *self.in_flight.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.queue.send((key.to_string(), payload)).is_err() {
            *self.in_flight.count.lock().unwrap_or_else(|e| e.into_inner()) -= 1;
            return Err(LinkError::Io("async send worker is gone".to_string()));
        }
        Ok(())
    }

    fn wait_async_sends_done(&self) {
        let count = self.in_flight.count.lock().unwrap_or_else(|e| e.into_inner());
        let _count = self
            .in_flight
            .drained
            .wait_while(count, |c| *c > 0)
            .unwrap_or_else(|e| e.into_inner());
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit.
        let (closed, _) = unbounded();
        self.queue = closed;
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

/// One side of an in-process pair: the channel plus the receiver loop that
/// dispatches inbound events to it.
pub struct MemoryEndpoint {
    pub channel: Arc<Channel>,
    pub receiver: Arc<ReceiverLoop>,
}

/// Wire two channel endpoints (ranks 0 and 1) into a duplex in-process link.
pub fn memory_pair(config: &LinkConfig) -> (MemoryEndpoint, MemoryEndpoint) {
    let receiver_a = Arc::new(ReceiverLoop::new());
    let receiver_b = Arc::new(ReceiverLoop::new());

    // A appears as rank 0 inside B's receiver loop and vice versa.
    let transport_a = MemoryTransport::new(0, &receiver_b, config);
    let transport_b = MemoryTransport::new(1, &receiver_a, config);

    let channel_a = Arc::new(Channel::new(1, transport_a, config));
    let channel_b = Arc::new(Channel::new(0, transport_b, config));

    receiver_a
        .add_listener(1, Arc::clone(&channel_a))
        .expect("fresh receiver loop");
    receiver_b
        .add_listener(0, Arc::clone(&channel_b))
        .expect("fresh receiver loop");

    (
        MemoryEndpoint {
            channel: channel_a,
            receiver: receiver_a,
        },
        MemoryEndpoint {
            channel: channel_b,
            receiver: receiver_b,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> LinkConfig {
        LinkConfig {
            recv_timeout_ms: 1000,
            throttle_window_size: 0,
            ..LinkConfig::default()
        }
    }

    #[test]
    fn duplex_round_trip() {
        let (a, b) = memory_pair(&quick_config());
        a.channel.send("x", &[1, 2, 3]).unwrap();
        assert_eq!(b.channel.recv("x").unwrap(), vec![1, 2, 3]);
        b.channel.send("y", &[4]).unwrap();
        assert_eq!(a.channel.recv("y").unwrap(), vec![4]);
    }

    #[test]
    fn async_sends_arrive_and_drain() {
        let (a, b) = memory_pair(&quick_config());
        for i in 0..16u8 {
            a.channel.send_async(&format!("k{i}"), vec![i]).unwrap();
        }
        for i in 0..16u8 {
            assert_eq!(b.channel.recv(&format!("k{i}")).unwrap(), vec![i]);
        }
    }

    #[test]
    fn large_payload_is_fragmented_and_reassembled() {
        let config = LinkConfig {
            max_payload_size: 4,
            ..quick_config()
        };
        let (a, b) = memory_pair(&config);
        let payload: Vec<u8> = (0..23).collect();
        a.channel.send("big", &payload).unwrap();
        assert_eq!(b.channel.recv("big").unwrap(), payload);
    }

    #[test]
    fn payload_at_threshold_is_not_fragmented() {
        let config = LinkConfig {
            max_payload_size: 8,
            ..quick_config()
        };
        let (a, b) = memory_pair(&config);
        a.channel.send("edge", &[0; 8]).unwrap();
        assert_eq!(b.channel.recv("edge").unwrap(), vec![0; 8]);
    }

    #[test]
    fn send_fails_after_remote_dropped() {
        let (a, b) = memory_pair(&quick_config());
        drop(b);
        let err = a.channel.send("x", &[1]).unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
    }
}
