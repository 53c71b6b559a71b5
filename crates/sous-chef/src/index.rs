use thiserror::Error;
use url::Url;

use sous_types::{PackageName, Version};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Package `{0}` ({1}) was not found in the index")]
    NotFound(PackageName, Version),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The package-index collaborator: maps a registry package to the URL of its archive.
///
/// Index protocol and response caching are the surrounding tool's concern; the chef only
/// consults it on a cache miss for a `registry` source.
pub trait ArchiveIndex: Send + Sync {
    fn find_archive(&self, name: &PackageName, version: &Version) -> Result<Url, IndexError>;
}
