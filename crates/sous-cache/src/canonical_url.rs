use url::Url;

use crate::cache_key::{CacheKey, CacheKeyHasher};

/// A wrapper around `Url` which represents a "canonical" version of an original URL.
///
/// A "canonical" url is only intended for internal comparison and cache-addressing purposes.
/// It papers over mistakes such as depending on `github.com/foo/bar` vs.
/// `github.com/foo/bar.git`, and provides no means to read the underlying string value,
/// because all fetching must still happen within the context of the original URL.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct CanonicalUrl(Url);

impl CanonicalUrl {
    pub fn new(url: &Url) -> Self {
        let mut url = url.clone();

        // Strip a trailing slash.
        if url.path().ends_with('/') {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty();
            }
        }

        // If a URL starts with a kind (like `git+`), remove it.
        if let Some(suffix) = url.as_str().strip_prefix("git+") {
            // If a Git URL ends in a reference (like a branch, tag, or commit), remove it.
            let stripped = match suffix.rsplit_once('@') {
                Some((prefix, _)) => prefix.parse(),
                None => suffix.parse(),
            };
            if let Ok(stripped) = stripped {
                url = stripped;
            }
        }

        // GitHub treats paths case-insensitively, but they hash differently, and we're
        // gonna be hashing them.
        if url.host_str() == Some("github.com") {
            let path = url.path().to_lowercase();
            url.set_path(&path);
        }

        // Repos can generally be accessed with or without `.git` extension.
        if url.path().ends_with(".git") {
            let path = url.path().trim_end_matches(".git").to_owned();
            url.set_path(&path);
        }

        Self(url)
    }
}

impl CacheKey for CanonicalUrl {
    fn cache_key(&self, state: &mut CacheKeyHasher) {
        // `as_str` gives the serialization of a url (which has a spec) and so insulates
        // against possible changes in how the `Url` crate does hashing.
        self.0.as_str().cache_key(state);
    }
}

/// Like [`CanonicalUrl`], but with the fragment and query also stripped, so that
/// `git+https://github.com/demo/demo.git@main` and `git+https://github.com/demo/demo.git@v1.0`
/// address the same repository.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct RepositoryUrl(Url);

impl RepositoryUrl {
    pub fn new(url: &Url) -> Self {
        let CanonicalUrl(mut url) = CanonicalUrl::new(url);
        url.set_fragment(None);
        url.set_query(None);
        Self(url)
    }
}

impl CacheKey for RepositoryUrl {
    fn cache_key(&self, state: &mut CacheKeyHasher) {
        self.0.as_str().cache_key(state);
    }
}
