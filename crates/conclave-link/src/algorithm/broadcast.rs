//! One-to-all replication of a single buffer.

use super::check_root;
use crate::error::CollectiveError;
use crate::session::Session;

/// Replicate `input` from `root` to every rank.
///
/// Returns the broadcast buffer on every rank; `input` is ignored off-root.
pub fn broadcast(
    session: &Session,
    root: usize,
    input: &[u8],
    tag: &str,
) -> Result<Vec<u8>, CollectiveError> {
    check_root(session, root)?;
    let key = session.next_collective_key(tag);

    if session.rank() == root {
        for peer in 0..session.world_size() {
            if peer == root {
                continue;
            }
            session.channel(peer)?.send(&key, input)?;
        }
        Ok(input.to_vec())
    } else {
        Ok(session.channel(root)?.recv(&key)?)
    }
}
