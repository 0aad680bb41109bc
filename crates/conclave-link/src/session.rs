//! A process's view of one multi-party link set.
//!
//! A [`Session`] bundles the channels to every remote rank together with the
//! receiver loop that feeds them, and hands out per-invocation key namespaces
//! to the collective algorithms. Collectives must be invoked in the same
//! order on every rank; the per-session counter then advances in lockstep and
//! the derived keys line up across the parties.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::Channel;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::memory::MemoryTransport;
use crate::receiver::ReceiverLoop;

pub struct Session {
    rank: usize,
    receiver: Arc<ReceiverLoop>,
    /// Indexed by rank; `None` at the local rank.
    channels: Vec<Option<Arc<Channel>>>,
    collective_counter: AtomicU64,
}

impl Session {
    /// Assemble a session from pre-wired parts. `channels[rank]` must be
    /// `None` at the local rank and `Some` everywhere else.
    pub fn new(rank: usize, receiver: Arc<ReceiverLoop>, channels: Vec<Option<Arc<Channel>>>) -> Self {
        Self {
            rank,
            receiver,
            channels,
            collective_counter: AtomicU64::new(0),
        }
    }

    /// Build a fully connected in-process mesh of `world_size` sessions.
    ///
    /// Every ordered pair of ranks gets its own memory-transport link. Useful
    /// for tests and single-process protocol runs.
    pub fn in_process_mesh(world_size: usize, config: &LinkConfig) -> Vec<Session> {
        let receivers: Vec<Arc<ReceiverLoop>> =
            (0..world_size).map(|_| Arc::new(ReceiverLoop::new())).collect();

        let mut all_channels: Vec<Vec<Option<Arc<Channel>>>> =
            (0..world_size).map(|_| vec![None; world_size]).collect();

        for local in 0..world_size {
            for peer in 0..world_size {
                if local == peer {
                    continue;
                }
                let transport = MemoryTransport::new(local, &receivers[peer], config);
                let channel = Arc::new(Channel::new(peer, transport, config));
                receivers[local]
                    .add_listener(peer, Arc::clone(&channel))
                    .expect("rank registered twice in a fresh mesh");
                all_channels[local][peer] = Some(channel);
            }
        }

        receivers
            .into_iter()
            .zip(all_channels)
            .enumerate()
            .map(|(rank, (receiver, channels))| Session::new(rank, receiver, channels))
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.channels.len()
    }

    /// The receiver loop dispatching inbound events for this session.
    pub fn receiver(&self) -> &Arc<ReceiverLoop> {
        &self.receiver
    }

    /// The channel to `rank`.
    pub fn channel(&self, rank: usize) -> Result<&Arc<Channel>, LinkError> {
        self.channels
            .get(rank)
            .and_then(|c| c.as_ref())
            .ok_or(LinkError::NoListener(rank))
    }

    /// Derive a fresh key namespace for one collective invocation.
    pub(crate) fn next_collective_key(&self, tag: &str) -> String {
        let seq = self.collective_counter.fetch_add(1, Ordering::Relaxed);
        format!("{tag}:{seq}")
    }

    /// Gracefully shut down every link in the session.
    ///
    /// Returns once each channel is quiescent; closing transports afterwards
    /// is safe.
    pub fn shutdown(&self) -> Result<(), LinkError> {
        for channel in self.channels.iter().flatten() {
            channel.wait_link_task_finish()?;
        }
        tracing::debug!(rank = self.rank, "session quiescent");
        Ok(())
    }
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
    fn mesh_is_fully_connected() {
        let sessions = Session::in_process_mesh(3, &quick_config());
        assert_eq!(sessions.len(), 3);
        for (rank, session) in sessions.iter().enumerate() {
            assert_eq!(session.rank(), rank);
            assert_eq!(session.world_size(), 3);
            for peer in 0..3 {
                if peer == rank {
                    assert!(session.channel(peer).is_err());
                } else {
                    assert_eq!(session.channel(peer).unwrap().peer_rank(), peer);
                }
            }
        }
    }

    #[test]
    fn mesh_point_to_point_exchange() {
        let sessions = Session::in_process_mesh(3, &quick_config());
        sessions[0].channel(2).unwrap().send("hello", &[42]).unwrap();
        assert_eq!(sessions[2].channel(0).unwrap().recv("hello").unwrap(), vec![42]);
    }

    #[test]
    fn collective_keys_advance_in_lockstep() {
        let sessions = Session::in_process_mesh(2, &quick_config());
        let k0 = sessions[0].next_collective_key("round");
        let k1 = sessions[1].next_collective_key("round");
        assert_eq!(k0, k1);
        assert_ne!(k0, sessions[0].next_collective_key("round"));
    }
}
