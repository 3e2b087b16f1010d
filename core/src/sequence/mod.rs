//! Sequence id lifecycle management
//!
//! Stateful models need every request of a logical session to carry the same
//! sequence id, in order, with no two requests of one session in flight at
//! once. The [`SequenceManager`] owns the valid id range as a fixed arena and
//! hands ids out as [`SequenceLease`]s: holding a lease is holding the id.
//!
//! # Example
//!
//! ```ignore
//! let manager = Arc::new(SequenceManager::new(&SequenceOptions::new(1, 4, 3), vec![], None)?);
//! let lease = manager.acquire().expect("an id is free");
//! request.sequence = Some(lease.flags());
//! // ... send ...
//! drop(lease); // id becomes claimable again
//! ```

mod manager;
mod policy;

pub use manager::{SequenceLease, SequenceManager, SequenceSnapshot};
pub use policy::SequenceLengthPolicy;

#[cfg(test)]
mod tests;
