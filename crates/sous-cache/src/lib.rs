//! The process-wide artifact cache: content-addressed directories keyed by source
//! fingerprints, with atomic rename-into-place materialization so readers never observe
//! a partial artifact.

use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs_err as fs;
use tempfile::{TempDir, tempdir};

pub use crate::cache_key::{CacheKey, CacheKeyHasher, digest};
pub use crate::canonical_url::{CanonicalUrl, RepositoryUrl};

mod cache_key;
mod canonical_url;

/// A [`CacheEntry`] which may or may not exist yet.
#[derive(Debug, Clone)]
pub struct CacheEntry(PathBuf);

impl CacheEntry {
    /// Create a new [`CacheEntry`] from a directory and a file name.
    pub fn new(dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> Self {
        Self(dir.into().join(file))
    }

    /// Convert the [`CacheEntry`] into a [`PathBuf`].
    #[inline]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Return the path to the [`CacheEntry`].
    #[inline]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Return the cache entry's parent directory.
    #[inline]
    pub fn dir(&self) -> &Path {
        self.0.parent().unwrap_or(&self.0)
    }
}

/// A subdirectory within the cache, scoped to one bucket and one fingerprint.
#[derive(Debug, Clone)]
pub struct CacheShard(PathBuf);

impl CacheShard {
    /// Return a [`CacheEntry`] within this shard.
    pub fn entry(&self, file: impl AsRef<Path>) -> CacheEntry {
        CacheEntry::new(&self.0, file)
    }
}

impl AsRef<Path> for CacheShard {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Deref for CacheShard {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The main cache abstraction.
#[derive(Debug, Clone)]
pub struct Cache {
    /// The cache directory.
    root: PathBuf,
    /// A temporary cache directory, kept alive for ephemeral caches and dropped with the
    /// last handle.
    _temp_dir_drop: Option<Arc<TempDir>>,
}

impl Cache {
    /// A persistent cache directory at `root`.
    pub fn from_path(root: impl Into<PathBuf>) -> Result<Self, io::Error> {
        Ok(Self {
            root: Self::init(root.into())?,
            _temp_dir_drop: None,
        })
    }

    /// Create a temporary cache directory.
    pub fn temp() -> Result<Self, io::Error> {
        let temp_dir = tempdir()?;
        Ok(Self {
            root: Self::init(temp_dir.path().to_path_buf())?,
            _temp_dir_drop: Some(Arc::new(temp_dir)),
        })
    }

    /// Return the root of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The folder for a specific cache bucket.
    pub fn bucket(&self, cache_bucket: CacheBucket) -> PathBuf {
        self.root.join(cache_bucket.to_str())
    }

    /// Compute a shard in the cache.
    pub fn shard(&self, cache_bucket: CacheBucket, dir: impl AsRef<Path>) -> CacheShard {
        CacheShard(self.bucket(cache_bucket).join(dir.as_ref()))
    }

    /// Compute an entry in the cache.
    pub fn entry(
        &self,
        cache_bucket: CacheBucket,
        dir: impl AsRef<Path>,
        file: impl AsRef<Path>,
    ) -> CacheEntry {
        CacheEntry::new(self.bucket(cache_bucket).join(dir), file)
    }

    /// Initialize the cache root: create the directory and mark it for backup tools.
    fn init(root: PathBuf) -> Result<PathBuf, io::Error> {
        fs::create_dir_all(&root)?;

        // Add the CACHEDIR.TAG.
        let cachedir_tag = root.join("CACHEDIR.TAG");
        if !cachedir_tag.exists() {
            fs::write(
                cachedir_tag,
                "Signature: 8a477f597d28d172789f06886806bc55\n\
                 # This file is a cache directory tag automatically created by sous.\n\
                 # For information about cache directory tags see https://bford.info/cachedir/\n",
            )?;
        }

        fs::canonicalize(root)
    }
}

/// The subdirectories of the cache root, one per kind of materialized content.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheBucket {
    /// Downloaded or copied installable archives.
    Archives,
    /// Wheels built from project directories.
    Builds,
    /// Version-control working copies.
    Git,
}

impl CacheBucket {
    fn to_str(self) -> &'static str {
        match self {
            Self::Archives => "archives-v0",
            Self::Builds => "builds-v0",
            Self::Git => "git-v0",
        }
    }
}
