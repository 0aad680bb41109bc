//! Reliable, keyed, bidirectional point-to-point message channels for
//! multi-party protocols.
//!
//! The core is the [`Channel`]: one endpoint of a peer-to-peer link layered
//! on an unreliable best-effort transport. It provides message-key addressed
//! delivery, end-to-end acknowledgement with send-window throttling,
//! automatic reassembly of fragmented payloads, and a graceful shutdown
//! handshake that loses no in-flight payload and silently accepts no
//! duplicate. Collective algorithms ([`algorithm`]) run on top of the channel
//! surface via a [`Session`].

pub mod algorithm;
pub mod channel;
pub mod chunked;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod memory;
pub mod receiver;
pub mod session;
pub mod transport;

pub use channel::{Channel, LinkPhase};
pub use chunked::ChunkedMessage;
pub use config::LinkConfig;
pub use error::{CollectiveError, LinkError};
pub use memory::{MemoryEndpoint, MemoryTransport, memory_pair};
pub use receiver::ReceiverLoop;
pub use session::Session;
pub use transport::ChannelTransport;
