use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs_err as fs;
use futures::StreamExt;
use reqwest::Client;
use tempfile::NamedTempFile;
use tracing::debug;
use url::Url;

use sous_cache::{Cache, CacheBucket, CacheEntry, CacheShard};
use sous_traits::{BuildContext, Fetch};
use sous_types::{Package, Source};

use crate::error::ChefError;
use crate::fingerprint::fingerprint;
use crate::index::ArchiveIndex;
use crate::locks::Locks;

/// Resolves a source descriptor to a locally available installable archive.
///
/// Returns a cached archive if the source fingerprint is known; otherwise downloads (for
/// archive and URL sources) or builds (for local trees, via the injected [`BuildContext`])
/// into the cache. Materialization is atomic: an archive only becomes visible at its final
/// path once fully written, and a failed download leaves nothing behind.
pub struct Chef<T: BuildContext + Send + Sync> {
    cache: Cache,
    client: Client,
    index: Arc<dyn ArchiveIndex>,
    context: T,
    locks: Locks,
}

impl<T: BuildContext + Send + Sync> Chef<T> {
    /// Initialize a new chef over the given cache.
    pub fn new(cache: Cache, index: Arc<dyn ArchiveIndex>, context: T) -> Self {
        Self {
            cache,
            client: Client::new(),
            index,
            context,
            locks: Locks::default(),
        }
    }

    /// Return the cache this chef materializes into.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Return the cache directory in which the package's artifact lives (or would live).
    pub fn get_cache_directory_for(&self, package: &Package) -> CacheShard {
        let bucket = match package.source() {
            Source::Registry | Source::File { .. } | Source::Url { .. } => CacheBucket::Archives,
            Source::Directory { .. } | Source::Git { .. } => CacheBucket::Builds,
        };
        self.cache.shard(bucket, fingerprint(package))
    }

    /// Return the cached archive for the package, if one has been fully materialized.
    pub fn get_cached_archive_for(&self, package: &Package) -> Result<Option<PathBuf>, ChefError> {
        let shard = self.get_cache_directory_for(package);
        let entries = match fs::read_dir(shard.as_ref()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Dot-prefixed names are staging leftovers from an interrupted run, never
            // finished archives.
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            return Ok(Some(entry.path()));
        }
        Ok(None)
    }

    /// Resolve the package to a local archive, downloading or building on a cache miss.
    ///
    /// Develop sources have no artifact by definition; asking for one is a caller error
    /// surfaced as [`ChefError::Develop`].
    pub async fn get_artifact(&self, package: &Package) -> Result<PathBuf, ChefError> {
        let lock = self.locks.acquire(&fingerprint(package)).await;
        let _guard = lock.lock().await;

        match package.source() {
            Source::Registry => {
                if let Some(archive) = self.get_cached_archive_for(package)? {
                    debug!("Using cached archive for {package}");
                    return Ok(archive);
                }
                let url = self
                    .index
                    .find_archive(package.name(), package.version())?;
                self.fetch_url(package, &url).await
            }
            Source::Url { url } => {
                if let Some(archive) = self.get_cached_archive_for(package)? {
                    debug!("Using cached archive for {package}");
                    return Ok(archive);
                }
                self.fetch_url(package, url).await
            }
            Source::File { path } => {
                if let Some(archive) = self.get_cached_archive_for(package)? {
                    debug!("Using cached archive for {package}");
                    return Ok(archive);
                }
                self.copy_archive(package, path).await
            }
            Source::Directory { path, develop } => {
                if *develop {
                    return Err(ChefError::Develop(package.name().clone()));
                }
                self.build_tree(package, path).await
            }
            Source::Git { develop, .. } => {
                if *develop {
                    return Err(ChefError::Develop(package.name().clone()));
                }
                let fetch = self.checkout_inner(package).await?;
                self.build_tree(package, &fetch.path).await
            }
        }
    }

    /// Check out the package's repository into the cache and return the working copy.
    pub async fn checkout(&self, package: &Package) -> Result<Fetch, ChefError> {
        self.checkout_inner(package).await
    }

    /// Build an artifact from a working copy already checked out via [`Chef::checkout`],
    /// without fetching the repository again.
    pub async fn build_working_copy(
        &self,
        package: &Package,
        fetch: &Fetch,
    ) -> Result<PathBuf, ChefError> {
        let lock = self.locks.acquire(&fingerprint(package)).await;
        let _guard = lock.lock().await;
        self.build_tree(package, &fetch.path).await
    }

    async fn checkout_inner(&self, package: &Package) -> Result<Fetch, ChefError> {
        let Source::Git {
            url,
            reference,
            resolved_reference,
            ..
        } = package.source()
        else {
            return Err(ChefError::NotVcs(package.name().clone()));
        };

        let target = self.cache.shard(CacheBucket::Git, fingerprint(package));
        let lock = self.locks.acquire(&target.to_string_lossy()).await;
        let _guard = lock.lock().await;

        let reference = resolved_reference.as_deref().unwrap_or(reference);
        debug!("Checking out {url} at `{reference}`");
        let fetch = self
            .context
            .checkout(url, Some(reference), target.as_ref())
            .await
            .map_err(|source| ChefError::Checkout {
                url: Box::new(url.clone()),
                source,
            })?;
        Ok(fetch)
    }

    /// Download a remote archive into the cache, atomically.
    async fn fetch_url(&self, package: &Package, url: &Url) -> Result<PathBuf, ChefError> {
        let shard = self.get_cache_directory_for(package);
        let entry = shard.entry(archive_filename(package, Some(url)));
        fs::create_dir_all(entry.dir())?;

        match self.download_archive(url, &entry).await {
            Ok(()) => Ok(entry.into_path_buf()),
            Err(err) => {
                // A stale same-named artifact from an earlier run must not survive a
                // failed download as a phantom cache hit.
                if entry.path().exists() {
                    let _ = fs::remove_file(entry.path());
                }
                Err(err)
            }
        }
    }

    async fn download_archive(&self, url: &Url, entry: &CacheEntry) -> Result<(), ChefError> {
        debug!("Downloading {url}");
        let download = |source| ChefError::Download {
            url: Box::new(url.clone()),
            source,
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(download)?;

        // Stream into a temporary file outside the shard, then rename into place, so a
        // half-written archive is never visible as a cache hit, even if the process
        // dies mid-download.
        let mut temp = NamedTempFile::new_in(self.cache.root())?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download)?;
            temp.write_all(&chunk)?;
        }
        temp.persist(entry.path()).map_err(|err| err.error)?;
        Ok(())
    }

    /// Copy a local archive into the cache, atomically.
    async fn copy_archive(&self, package: &Package, path: &Path) -> Result<PathBuf, ChefError> {
        if !path.is_file() {
            return Err(ChefError::MissingArchive {
                path: path.to_path_buf(),
            });
        }

        let shard = self.get_cache_directory_for(package);
        let entry = shard.entry(archive_filename(package, None));
        fs::create_dir_all(entry.dir())?;

        let temp = NamedTempFile::new_in(self.cache.root())?;
        fs::copy(path, temp.path())?;
        temp.persist(entry.path()).map_err(|err| err.error)?;
        Ok(entry.into_path_buf())
    }

    /// Build a wheel from a project tree into the cache.
    ///
    /// Local trees mutate without the fingerprint noticing, so directories are rebuilt on
    /// every request; only the final rename into the build shard is cached state.
    async fn build_tree(&self, package: &Package, path: &Path) -> Result<PathBuf, ChefError> {
        debug!("Building {package} from {}", path.display());
        let temp = tempfile::tempdir_in(self.cache.root())?;
        let filename = self
            .context
            .build_directory(path, temp.path())
            .await
            .map_err(|source| ChefError::Build {
                path: path.to_path_buf(),
                source,
            })?;

        let shard = self.get_cache_directory_for(package);
        let entry = shard.entry(&filename);
        fs::create_dir_all(entry.dir())?;
        if entry.path().exists() {
            fs::remove_file(entry.path())?;
        }
        fs::rename(temp.path().join(&filename), entry.path())?;
        Ok(entry.into_path_buf())
    }
}

/// The file name under which a package's archive is cached: the URL's (or local
/// archive's) own file name where one exists, a synthesized one otherwise.
fn archive_filename(package: &Package, url: Option<&Url>) -> String {
    if let Source::File { path } = package.source() {
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            return name.to_string();
        }
    }
    if let Some(segment) = url
        .and_then(|url| url.path_segments())
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
    {
        return segment.to_string();
    }
    format!("{}-{}.tar.gz", package.name(), package.version())
}
