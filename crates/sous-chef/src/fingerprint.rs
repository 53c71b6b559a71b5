use sous_cache::{CacheKey, CacheKeyHasher, CanonicalUrl, RepositoryUrl, digest};
use sous_types::{Package, Source};

/// Compute the stable cache key for a package's source.
///
/// Two descriptors share a fingerprint exactly when they address the same content: the
/// source kind is mixed in so kinds never collide, URLs are canonicalized, and Git sources
/// are keyed by repository plus the reference actually requested (the resolved commit,
/// once known).
pub fn fingerprint(package: &Package) -> String {
    digest(&SourceKey(package))
}

struct SourceKey<'a>(&'a Package);

impl CacheKey for SourceKey<'_> {
    fn cache_key(&self, state: &mut CacheKeyHasher) {
        match self.0.source() {
            Source::Registry => {
                "registry".cache_key(state);
                self.0.name().as_str().cache_key(state);
                self.0.version().as_str().cache_key(state);
            }
            Source::File { path } => {
                "file".cache_key(state);
                path.cache_key(state);
            }
            Source::Directory { path, .. } => {
                // The develop flag changes how the tree is installed, not what it is.
                "directory".cache_key(state);
                path.cache_key(state);
            }
            Source::Url { url } => {
                "url".cache_key(state);
                CanonicalUrl::new(url).cache_key(state);
            }
            Source::Git {
                url,
                reference,
                resolved_reference,
                ..
            } => {
                "git".cache_key(state);
                RepositoryUrl::new(url).cache_key(state);
                resolved_reference
                    .as_deref()
                    .unwrap_or(reference)
                    .cache_key(state);
            }
        }
    }
}
