//! All-to-one collection of per-rank buffers.

use super::check_root;
use crate::error::CollectiveError;
use crate::session::Session;

/// Collect every rank's `input` at `root`.
///
/// The root returns `Some` with one buffer per rank, ordered by rank and
/// including its own input; every other rank sends its buffer and returns
/// `None`.
pub fn gather(
    session: &Session,
    root: usize,
    input: &[u8],
    tag: &str,
) -> Result<Option<Vec<Vec<u8>>>, CollectiveError> {
    check_root(session, root)?;
    let key = session.next_collective_key(tag);

    if session.rank() == root {
        let mut outputs = Vec::with_capacity(session.world_size());
        for peer in 0..session.world_size() {
            if peer == root {
                outputs.push(input.to_vec());
            } else {
                outputs.push(session.channel(peer)?.recv(&key)?);
            }
        }
        Ok(Some(outputs))
    } else {
        session.channel(root)?.send(&key, input)?;
        Ok(None)
    }
}
