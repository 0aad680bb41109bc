//! Collective algorithms over the channel surface.
//!
//! Every collective takes the session, a root rank where relevant, and a tag
//! naming the invocation; the tag plus the session's collective counter form
//! the message keys, so the same tag may be reused across rounds. Collectives
//! must be invoked in the same order on every rank.

mod broadcast;
mod gather;
mod scatter;

pub use broadcast::broadcast;
pub use gather::gather;
pub use scatter::scatter;

use crate::error::CollectiveError;
use crate::session::Session;

/// Shared validation: `root` must name a rank inside the session.
fn check_root(session: &Session, root: usize) -> Result<(), CollectiveError> {
    if root >= session.world_size() {
        return Err(CollectiveError::InvalidRoot {
            root,
            world_size: session.world_size(),
        });
    }
    Ok(())
}
