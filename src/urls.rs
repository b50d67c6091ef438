//! URL normalization, validation, and crawl-scope checks.
//!
//! Normalization is best-effort: a string that does not parse as a URL is
//! returned unchanged, never an error. The normalized form is what the
//! crawler's `visited` set is keyed on, so normalization must be idempotent.

use url::Url;

use crate::error::{DocdexError, Result};

/// Options controlling [`normalize_url`].
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Lowercase the host and path.
    pub lowercase: bool,
    /// Drop the `#fragment`.
    pub strip_fragment: bool,
    /// Drop a trailing slash, except on the root path `/`.
    pub strip_trailing_slash: bool,
    /// Drop the query string. Off by default; package-registry strategies
    /// enable it because those sites encode navigation in the query.
    pub strip_query: bool,
    /// Collapse a terminal `index.{html,htm,asp,php,jsp}` segment into its
    /// directory. Segments merely containing "index" are preserved.
    pub collapse_index: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            strip_fragment: true,
            strip_trailing_slash: true,
            strip_query: false,
            collapse_index: true,
        }
    }
}

impl NormalizeOptions {
    /// Defaults plus query stripping (NPM, PyPI, GitHub strategies).
    pub fn stripping_query() -> Self {
        Self {
            strip_query: true,
            ..Self::default()
        }
    }
}

const INDEX_SUFFIXES: &[&str] = &[
    "index.html",
    "index.htm",
    "index.asp",
    "index.php",
    "index.jsp",
];

/// Canonicalize a URL string. Malformed input is returned unchanged.
pub fn normalize_url(raw: &str, opts: &NormalizeOptions) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.cannot_be_a_base() {
        return raw.to_string();
    }

    if opts.strip_fragment {
        url.set_fragment(None);
    }
    if opts.strip_query {
        url.set_query(None);
    }

    let mut path = url.path().to_string();
    if opts.lowercase {
        path = path.to_lowercase();
    }
    if opts.collapse_index {
        if let Some(idx) = path.rfind('/') {
            let last = &path[idx + 1..];
            if INDEX_SUFFIXES.contains(&last.to_lowercase().as_str()) {
                path.truncate(idx + 1);
            }
        }
    }
    if opts.strip_trailing_slash && path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    url.to_string()
}

/// Crawl scope restricting which discovered links are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Same host and the target path lives under the base URL's directory.
    #[default]
    Subpages,
    /// Same host, any path.
    Hostname,
    /// Same registrable domain (last two host labels), any subdomain.
    Domain,
}

/// Directory portion of a path, always with a trailing slash.
/// A path that already ends in `/` is its own directory.
fn parent_dir(path: &str) -> String {
    if path.ends_with('/') {
        return path.to_string();
    }
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "/".to_string(),
    }
}

fn last_two_labels(host: &str) -> String {
    let labels: Vec<&str> = host.rsplitn(3, '.').collect();
    if labels.len() < 2 {
        return host.to_string();
    }
    format!("{}.{}", labels[1], labels[0])
}

/// Whether `target` is within `scope` of `base`. Different schemes never
/// pass, regardless of scope.
pub fn in_scope(base: &Url, target: &Url, scope: Scope) -> bool {
    if base.scheme() != target.scheme() {
        return false;
    }
    let (Some(base_host), Some(target_host)) = (base.host_str(), target.host_str()) else {
        return base.host_str() == target.host_str();
    };
    match scope {
        Scope::Hostname => base_host.eq_ignore_ascii_case(target_host),
        Scope::Domain => {
            last_two_labels(&base_host.to_lowercase())
                == last_two_labels(&target_host.to_lowercase())
        }
        Scope::Subpages => {
            base_host.eq_ignore_ascii_case(target_host)
                && target.path().starts_with(&parent_dir(base.path()))
        }
    }
}

/// Parse a URL and require an `http(s)` or `file` scheme.
pub fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| DocdexError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" | "file" => Ok(url),
        other => Err(DocdexError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        normalize_url(raw, &NormalizeOptions::default())
    }

    #[test]
    fn lowercases_host_and_collapses_index_suffix() {
        assert_eq!(
            norm("https://EX.com/docs/index.html?x=1"),
            "https://ex.com/docs?x=1"
        );
    }

    #[test]
    fn strips_fragment_and_trailing_slash() {
        assert_eq!(norm("https://a.com/docs/#intro"), "https://a.com/docs");
        assert_eq!(norm("https://a.com/"), "https://a.com/");
    }

    #[test]
    fn preserves_index_tokens_inside_segments() {
        assert_eq!(
            norm("https://a.com/indexing/page"),
            "https://a.com/indexing/page"
        );
        assert_eq!(norm("https://a.com/reindex.html"), "https://a.com/reindex.html");
        assert_eq!(
            norm("https://a.com/index.html/guide"),
            "https://a.com/index.html/guide"
        );
    }

    #[test]
    fn index_collapse_on_root_keeps_root() {
        assert_eq!(norm("https://a.com/index.html"), "https://a.com/");
    }

    #[test]
    fn keeps_query_by_default_and_strips_when_asked() {
        assert_eq!(norm("https://a.com/p?tab=readme"), "https://a.com/p?tab=readme");
        assert_eq!(
            normalize_url("https://a.com/p?tab=readme", &NormalizeOptions::stripping_query()),
            "https://a.com/p"
        );
    }

    #[test]
    fn malformed_input_is_returned_unchanged() {
        assert_eq!(norm("::not a url::"), "::not a url::");
        assert_eq!(norm(""), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "https://EX.com/Docs/Index.HTML?x=1#frag",
            "https://a.com/docs/",
            "https://a.com",
            "file:///tmp/Docs/index.htm",
            "not-a-url",
        ] {
            let once = norm(raw);
            assert_eq!(norm(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn subpages_scope_uses_base_parent_dir() {
        let base = Url::parse("https://a.com/docs/start").unwrap();
        let ok = Url::parse("https://a.com/docs/intro").unwrap();
        let bad = Url::parse("https://a.com/api").unwrap();
        assert!(in_scope(&base, &ok, Scope::Subpages));
        assert!(!in_scope(&base, &bad, Scope::Subpages));
    }

    #[test]
    fn directory_base_is_its_own_parent() {
        let base = Url::parse("https://a.com/docs/").unwrap();
        let inside = Url::parse("https://a.com/docs/deep/page").unwrap();
        assert!(in_scope(&base, &inside, Scope::Subpages));
    }

    #[test]
    fn hostname_and_domain_scopes() {
        let base = Url::parse("https://docs.a.com/x").unwrap();
        let same_host = Url::parse("https://docs.a.com/api").unwrap();
        let sibling = Url::parse("https://api.a.com/y").unwrap();
        let other = Url::parse("https://b.com/y").unwrap();
        assert!(in_scope(&base, &same_host, Scope::Hostname));
        assert!(!in_scope(&base, &sibling, Scope::Hostname));
        assert!(in_scope(&base, &sibling, Scope::Domain));
        assert!(!in_scope(&base, &other, Scope::Domain));
    }

    #[test]
    fn scheme_mismatch_always_fails() {
        let base = Url::parse("https://a.com/docs/").unwrap();
        let http = Url::parse("http://a.com/docs/page").unwrap();
        assert!(!in_scope(&base, &http, Scope::Subpages));
        assert!(!in_scope(&base, &http, Scope::Hostname));
        assert!(!in_scope(&base, &http, Scope::Domain));
    }

    #[test]
    fn parse_url_rejects_unknown_schemes() {
        assert!(parse_url("https://a.com").is_ok());
        assert!(parse_url("file:///tmp/docs").is_ok());
        assert!(parse_url("ftp://a.com").is_err());
        assert!(parse_url("nonsense").is_err());
    }
}
