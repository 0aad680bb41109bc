//! One-to-all distribution of per-rank buffers.

use super::check_root;
use crate::error::CollectiveError;
use crate::session::Session;

/// Distribute `inputs[i]` from `root` to rank `i`.
///
/// At the root, `inputs` must hold one buffer per rank; the root keeps
/// `inputs[root]`. Off-root, `inputs` is ignored and the received slice is
/// returned.
pub fn scatter(
    session: &Session,
    root: usize,
    inputs: &[Vec<u8>],
    tag: &str,
) -> Result<Vec<u8>, CollectiveError> {
    check_root(session, root)?;
    if session.rank() == root && inputs.len() != session.world_size() {
        // Validate before deriving the key so a failed call leaves the
        // collective counter aligned with the other ranks.
        return Err(CollectiveError::InputArity {
            expected: session.world_size(),
            actual: inputs.len(),
        });
    }
    let key = session.next_collective_key(tag);

    if session.rank() == root {
        for (peer, input) in inputs.iter().enumerate() {
            if peer == root {
                continue;
            }
            session.channel(peer)?.send(&key, input)?;
        }
        Ok(inputs[root].clone())
    } else {
        Ok(session.channel(root)?.recv(&key)?)
    }
}
