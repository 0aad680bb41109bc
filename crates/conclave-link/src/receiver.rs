//! Demultiplexer routing inbound transport events to channels by peer rank.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::channel::Channel;
use crate::error::LinkError;

/// A concurrent mapping from peer rank to the [`Channel`] handling that link.
///
/// The registry owns its channels and outlives every transport that delivers
/// into it; transports hold only non-owning references back.
#[derive(Default)]
pub struct ReceiverLoop {
    listeners: RwLock<HashMap<usize, Arc<Channel>>>,
}

impl ReceiverLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the channel for `rank`. Each rank may be registered once.
    pub fn add_listener(&self, rank: usize, channel: Arc<Channel>) -> Result<(), LinkError> {
        let mut listeners = self.write_listeners();
        if listeners.contains_key(&rank) {
            return Err(LinkError::DuplicateListener(rank));
        }
        listeners.insert(rank, channel);
        Ok(())
    }

    /// The channel registered for `rank`, if any.
    pub fn listener(&self, rank: usize) -> Option<Arc<Channel>> {
        self.read_listeners().get(&rank).cloned()
    }

    /// Route a single-frame inbound event to the channel for `rank`.
    pub fn on_message(&self, rank: usize, key: &str, value: &[u8]) -> Result<(), LinkError> {
        self.listener(rank)
            .ok_or(LinkError::NoListener(rank))?
            .on_message(key, value)
    }

    /// Route a fragment inbound event to the channel for `rank`.
    pub fn on_chunked_message(
        &self,
        rank: usize,
        key: &str,
        value: &[u8],
        chunk_idx: usize,
        num_chunks: usize,
    ) -> Result<(), LinkError> {
        self.listener(rank)
            .ok_or(LinkError::NoListener(rank))?
            .on_chunked_message(key, value, chunk_idx, num_chunks)
    }

    fn read_listeners(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<usize, Arc<Channel>>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_listeners(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<usize, Arc<Channel>>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}
