//! The artifact builder ("chef"): turns a source descriptor into a locally available
//! installable archive, going to the cache first and materializing atomically on a miss.

pub use crate::chef::Chef;
pub use crate::error::ChefError;
pub use crate::fingerprint::fingerprint;
pub use crate::index::{ArchiveIndex, IndexError};

mod chef;
mod error;
mod fingerprint;
mod index;
mod locks;
