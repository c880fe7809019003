//! Repository addressing: canonical URLs and the identifiers derived from them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LocusError;

const COLLECTION_PREFIX: &str = "repo-";
const COLLECTION_HEX_LEN: usize = 8;
const DOCUMENT_HEX_LEN: usize = 16;

/// Stable identifier of a repository collection.
///
/// Always `repo-` followed by 8 lowercase hex characters taken from the
/// SHA-256 digest of the canonical repository URL.
///
/// # Examples
///
/// ```
/// use locus_core::CollectionId;
///
/// let id = CollectionId::derive("https://github.com/acme/widgets");
/// assert_eq!(id.as_str(), "repo-6e07f075");
/// assert_eq!(id, CollectionId::derive("https://github.com/acme/widgets"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    /// Derive the id for a canonical URL string. Pure and total.
    pub fn derive(canonical_url: &str) -> Self {
        let hex = hex_digest(canonical_url.as_bytes());
        Self(format!("{COLLECTION_PREFIX}{}", &hex[..COLLECTION_HEX_LEN]))
    }

    /// Accept an id supplied by a caller, checking its shape.
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::InvalidUrl`] when `raw` is not `repo-` plus
    /// 8 lowercase hex characters.
    pub fn parse(raw: &str) -> Result<Self, LocusError> {
        let hex = raw
            .strip_prefix(COLLECTION_PREFIX)
            .filter(|h| h.len() == COLLECTION_HEX_LEN)
            .filter(|h| h.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        match hex {
            Some(_) => Ok(Self(raw.to_string())),
            None => Err(LocusError::InvalidUrl(format!(
                "'{raw}' is not a collection id (expected repo-xxxxxxxx)"
            ))),
        }
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CollectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Full SHA-256 digest of a canonical URL, hex encoded.
///
/// The collection id is a prefix of this value.
pub(crate) fn url_digest(canonical_url: &str) -> String {
    hex_digest(canonical_url.as_bytes())
}

/// Stable document id: a hash of the repository-relative path.
///
/// Paths are normalised to forward slashes first so the same file gets the
/// same id on every platform.
///
/// # Examples
///
/// ```
/// use locus_core::document_id;
///
/// assert_eq!(document_id("src/auth.rs"), document_id("src\\auth.rs"));
/// assert_ne!(document_id("src/auth.rs"), document_id("src/login.rs"));
/// assert_eq!(document_id("src/auth.rs").len(), 16);
/// ```
pub fn document_id(relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    hex_digest(normalized.as_bytes())[..DOCUMENT_HEX_LEN].to_string()
}

/// SHA-256 of raw file bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex_digest(bytes)
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Where a repository comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "location")]
pub enum UrlKind {
    /// Cloned over the network.
    Remote(String),
    /// Read in place from the local filesystem.
    Local(PathBuf),
}

/// A validated, canonicalised repository location.
///
/// Canonicalisation trims whitespace and drops one trailing `/` and a
/// trailing `.git`, so `https://github.com/acme/widgets.git/` and
/// `https://github.com/acme/widgets` address the same collection.
///
/// # Examples
///
/// ```
/// use locus_core::RepositoryUrl;
///
/// let url = RepositoryUrl::parse(" https://github.com/acme/widgets.git ").unwrap();
/// assert_eq!(url.canonical(), "https://github.com/acme/widgets");
/// assert_eq!(url.owner(), "acme");
/// assert_eq!(url.name(), "widgets");
/// assert!(url.is_github());
/// assert_eq!(url.collection_id().as_str(), "repo-6e07f075");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryUrl {
    canonical: String,
    owner: String,
    name: String,
    host: Option<String>,
    kind: UrlKind,
}

fn github_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https://github\.com/[A-Za-z0-9._-]+/[A-Za-z0-9._-]+/?$")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

fn https_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https?://([A-Za-z0-9.-]+(?::[0-9]+)?)/(?:[A-Za-z0-9._~-]+/)*([A-Za-z0-9._-]+)/([A-Za-z0-9._-]+)$")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

fn ssh_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^git@([A-Za-z0-9.-]+):(?:[A-Za-z0-9._~-]+/)*([A-Za-z0-9._-]+)/([A-Za-z0-9._-]+)$")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

fn canonicalize(input: &str) -> String {
    let mut s = input.trim();
    if let Some(stripped) = s.strip_suffix('/') {
        s = stripped;
    }
    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped;
    }
    s.to_string()
}

impl RepositoryUrl {
    /// Parse a remote URL (`https://host/owner/name`, `git@host:owner/name`),
    /// a `file://` URL, or an existing local directory.
    ///
    /// # Errors
    ///
    /// Returns [`LocusError::InvalidUrl`] when the input matches none of the
    /// accepted forms, or a `github.com` URL fails the GitHub shape check.
    pub fn parse(input: &str) -> Result<Self, LocusError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LocusError::InvalidUrl("empty repository URL".into()));
        }

        if trimmed.starts_with("https://github.com/") && !github_pattern().is_match(trimmed) {
            return Err(LocusError::InvalidUrl(format!(
                "'{trimmed}' is not a GitHub repository URL (expected https://github.com/<owner>/<repo>)"
            )));
        }

        let canonical = canonicalize(trimmed);

        if let Some(caps) = https_pattern().captures(&canonical) {
            return Ok(Self {
                owner: caps[2].to_string(),
                name: caps[3].to_string(),
                host: Some(caps[1].to_lowercase()),
                kind: UrlKind::Remote(canonical.clone()),
                canonical,
            });
        }

        if let Some(caps) = ssh_pattern().captures(&canonical) {
            return Ok(Self {
                owner: caps[2].to_string(),
                name: caps[3].to_string(),
                host: Some(caps[1].to_lowercase()),
                kind: UrlKind::Remote(canonical.clone()),
                canonical,
            });
        }

        let local = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        let path = Path::new(local);
        if path.is_dir() {
            let absolute = path.canonicalize()?;
            return Ok(Self::local(absolute));
        }

        Err(LocusError::InvalidUrl(format!(
            "'{trimmed}' is neither a repository URL nor an existing directory"
        )))
    }

    /// Build a location for an already-resolved local directory.
    pub fn local(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string());
        let owner = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local".to_string());
        let canonical = format!("file://{}", path.display());
        Self {
            canonical,
            owner,
            name,
            host: None,
            kind: UrlKind::Local(path),
        }
    }

    /// The canonical string the collection id is derived from.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Repository owner (or parent directory for local paths).
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote or local source.
    pub fn kind(&self) -> &UrlKind {
        &self.kind
    }

    /// Whether this repository is hosted on github.com.
    pub fn is_github(&self) -> bool {
        self.host.as_deref() == Some("github.com")
    }

    /// The collection id for this repository.
    pub fn collection_id(&self) -> CollectionId {
        CollectionId::derive(&self.canonical)
    }

    /// Full digest of the canonical URL.
    pub fn digest(&self) -> String {
        url_digest(&self.canonical)
    }

    /// Browser link to a file, for GitHub-hosted repositories.
    ///
    /// # Examples
    ///
    /// ```
    /// use locus_core::RepositoryUrl;
    ///
    /// let url = RepositoryUrl::parse("https://github.com/acme/widgets").unwrap();
    /// assert_eq!(
    ///     url.blob_url("src/auth.rs").as_deref(),
    ///     Some("https://github.com/acme/widgets/blob/HEAD/src/auth.rs")
    /// );
    /// ```
    pub fn blob_url(&self, relative_path: &str) -> Option<String> {
        if !self.is_github() {
            return None;
        }
        Some(format!(
            "https://github.com/{}/{}/blob/HEAD/{}",
            self.owner, self.name, relative_path
        ))
    }
}

impl fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn acme_widgets_has_fixed_id() {
        let first = RepositoryUrl::parse("https://github.com/acme/widgets").unwrap();
        let second = RepositoryUrl::parse("https://github.com/acme/widgets/").unwrap();
        assert_eq!(first.collection_id().as_str(), "repo-6e07f075");
        assert_eq!(first.collection_id(), second.collection_id());
    }

    #[test]
    fn id_shape_is_bounded_lowercase_hex() {
        let id = CollectionId::derive("https://gitlab.com/group/sub/project");
        assert_eq!(id.as_str().len(), COLLECTION_PREFIX.len() + COLLECTION_HEX_LEN);
        assert!(CollectionId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(CollectionId::parse("repo-6E07F075").is_err());
        assert!(CollectionId::parse("repo-6e07f07").is_err());
        assert!(CollectionId::parse("col-6e07f075").is_err());
    }

    #[test]
    fn rejects_non_repository_github_urls() {
        assert!(RepositoryUrl::parse("https://github.com/acme").is_err());
        assert!(RepositoryUrl::parse("https://github.com/acme/widgets/tree/main").is_err());
        assert!(RepositoryUrl::parse("").is_err());
        assert!(RepositoryUrl::parse("not a url").is_err());
    }

    #[test]
    fn accepts_ssh_and_other_hosts() {
        let ssh = RepositoryUrl::parse("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(ssh.owner(), "acme");
        assert_eq!(ssh.name(), "widgets");
        assert!(ssh.is_github());

        let gitlab = RepositoryUrl::parse("https://gitlab.com/group/sub/project").unwrap();
        assert_eq!(gitlab.owner(), "sub");
        assert_eq!(gitlab.name(), "project");
        assert!(!gitlab.is_github());
        assert!(gitlab.blob_url("a.rs").is_none());
    }

    #[test]
    fn accepts_local_directories() {
        let dir = tempfile::tempdir().unwrap();
        let url = RepositoryUrl::parse(&dir.path().display().to_string()).unwrap();
        assert!(matches!(url.kind(), UrlKind::Local(_)));
        assert!(url.canonical().starts_with("file://"));

        let via_scheme = RepositoryUrl::parse(&format!("file://{}", dir.path().display())).unwrap();
        assert_eq!(url.collection_id(), via_scheme.collection_id());
    }

    #[test]
    fn digests_are_unique_over_many_urls() {
        let mut digests = HashSet::new();
        for i in 0..100_000u32 {
            let url = format!("https://github.com/owner{}/repo{}", i % 317, i);
            assert!(digests.insert(url_digest(&url)), "digest collision at {url}");
        }
    }

    #[test]
    fn truncated_ids_are_unique_at_moderate_scale() {
        // 2_000 ids in a 32-bit space: collision odds are about 1 in 2000.
        let mut ids = HashSet::new();
        for i in 0..2_000u32 {
            let url = format!("https://github.com/org-{i}/service-{i}");
            assert!(ids.insert(CollectionId::derive(&url)), "id collision at {url}");
        }
    }

    proptest! {
        #[test]
        fn derive_is_pure(owner in "[A-Za-z0-9_-]{1,20}", name in "[A-Za-z0-9_-]{1,30}") {
            let url = format!("https://github.com/{owner}/{name}");
            let a = RepositoryUrl::parse(&url).unwrap();
            let b = RepositoryUrl::parse(&url).unwrap();
            prop_assert_eq!(a.collection_id(), b.collection_id());
            prop_assert!(a.collection_id().as_str().starts_with("repo-"));
        }

        #[test]
        fn distinct_urls_have_distinct_digests(a in "[a-z]{1,12}/[a-z]{1,12}", b in "[a-z]{1,12}/[a-z]{1,12}") {
            prop_assume!(a != b);
            let ua = format!("https://github.com/{a}");
            let ub = format!("https://github.com/{b}");
            prop_assert_ne!(url_digest(&ua), url_digest(&ub));
        }

        #[test]
        fn document_id_is_stable(path in "[a-z]{1,8}(/[a-z]{1,8}){0,4}\\.[a-z]{1,3}") {
            prop_assert_eq!(document_id(&path), document_id(&path));
        }
    }
}
