//! Semantic-version handling: target grammar, coercion, ordering, and
//! best-version resolution over the set of indexed versions.
//!
//! The empty string is the "unversioned" partition. It sorts first in
//! listings and is never part of semver resolution.

use regex::Regex;
use semver::{Version, VersionReq};
use std::sync::OnceLock;

use crate::error::{DocdexError, Result};

/// Accepted version-target grammar: `5`, `5.2`, `5.2.1`, `5.x`, `5.x.x`,
/// `5.2.x`. Anything else (including `5.x.2`) is rejected.
fn target_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(\.(?:x(\.x)?|\d+(\.(x|\d+))?))?$").unwrap())
}

/// Parse a stored version string into a semver version, tolerating the
/// partial forms packages commonly publish (`1`, `1.2`, `v1.2.3`).
pub fn coerce_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }
    let parts: Vec<&str> = trimmed.split('.').collect();
    let padded = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

/// Whether a submitted version string is acceptable for indexing: empty
/// (unversioned) or coerceable to semver.
pub fn is_valid_version(raw: &str) -> bool {
    raw.is_empty() || coerce_version(raw).is_some()
}

/// Sort versions for listings: unversioned (empty) first, then semver-valid
/// versions ascending, then the rest in raw string order.
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        use std::cmp::Ordering;
        match (a.is_empty(), b.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => match (coerce_version(a), coerce_version(b)) {
                (Some(va), Some(vb)) => va.cmp(&vb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            },
        }
    });
}

/// Resolve the best indexed version for a target.
///
/// `versions` is the full set of indexed version strings for the library;
/// only semver-valid entries participate. Rules:
///
/// - absent, empty, or `"latest"` target: the maximum indexed version;
/// - full semver target: the maximum indexed version `<=` the target
///   (an exact hit included), so older versions act as fallbacks;
/// - partial or `x`-form target (`5`, `1.1`, `1.x`, `5.2.x`): treated as
///   a tilde range over the numeric prefix;
/// - anything else: [`DocdexError::InvalidVersion`].
pub fn find_best_version(library: &str, versions: &[String], target: Option<&str>) -> Result<String> {
    let mut semver_versions: Vec<(Version, &String)> = versions
        .iter()
        .filter(|raw| !raw.is_empty())
        .filter_map(|raw| coerce_version(raw).map(|v| (v, raw)))
        .collect();
    semver_versions.sort_by(|a, b| a.0.cmp(&b.0));

    let not_found = |requested: &str| DocdexError::VersionNotFound {
        library: library.to_string(),
        requested: requested.to_string(),
        available: versions.to_vec(),
    };

    let target = target.unwrap_or("latest");
    if target.is_empty() || target.eq_ignore_ascii_case("latest") {
        return semver_versions
            .last()
            .map(|(_, raw)| (*raw).clone())
            .ok_or_else(|| not_found("latest"));
    }

    if !target_regex().is_match(target) {
        return Err(DocdexError::InvalidVersion(target.to_string()));
    }

    let best = if let Ok(exact) = Version::parse(target) {
        // Full semver: exact match or anything older.
        semver_versions
            .iter()
            .rev()
            .find(|(v, _)| *v <= exact)
            .map(|(_, raw)| (*raw).clone())
    } else {
        // Partial / x-form: tilde range over the numeric prefix.
        let prefix: Vec<&str> = target
            .split('.')
            .take_while(|part| *part != "x" && *part != "X")
            .collect();
        let req = VersionReq::parse(&format!("~{}", prefix.join(".")))
            .map_err(|_| DocdexError::InvalidVersion(target.to_string()))?;
        semver_versions
            .iter()
            .rev()
            .find(|(v, _)| req.matches(v))
            .map(|(_, raw)| (*raw).clone())
    };

    best.ok_or_else(|| not_found(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn latest_picks_maximum() {
        let vs = versions(&["1.0.0", "1.1.0", "1.1.1"]);
        assert_eq!(find_best_version("lib", &vs, None).unwrap(), "1.1.1");
        assert_eq!(find_best_version("lib", &vs, Some("latest")).unwrap(), "1.1.1");
        assert_eq!(find_best_version("lib", &vs, Some("")).unwrap(), "1.1.1");
    }

    #[test]
    fn full_semver_falls_back_to_older() {
        let vs = versions(&["1.0.0", "1.1.0", "1.1.1"]);
        assert_eq!(find_best_version("lib", &vs, Some("2.0.0")).unwrap(), "1.1.1");
        assert_eq!(find_best_version("lib", &vs, Some("1.1.0")).unwrap(), "1.1.0");
        assert_eq!(find_best_version("lib", &vs, Some("1.0.5")).unwrap(), "1.0.0");
    }

    #[test]
    fn x_range_matches_within_major() {
        let vs = versions(&["1.0.0", "1.1.0", "1.1.1", "2.0.0"]);
        assert_eq!(find_best_version("lib", &vs, Some("1.x")).unwrap(), "1.1.1");
        assert_eq!(find_best_version("lib", &vs, Some("1.x.x")).unwrap(), "1.1.1");
        assert_eq!(find_best_version("lib", &vs, Some("1.1.x")).unwrap(), "1.1.1");
    }

    #[test]
    fn partial_target_is_tilde() {
        let vs = versions(&["1.0.0", "1.1.0", "1.2.3", "2.0.0"]);
        assert_eq!(find_best_version("lib", &vs, Some("1")).unwrap(), "1.2.3");
        assert_eq!(find_best_version("lib", &vs, Some("1.1")).unwrap(), "1.1.0");
    }

    #[test]
    fn malformed_targets_are_rejected() {
        let vs = versions(&["1.0.0"]);
        for bad in ["1.x.2", "x", "1.2.3.4", "^1.0", "abc"] {
            assert!(
                matches!(
                    find_best_version("lib", &vs, Some(bad)),
                    Err(DocdexError::InvalidVersion(_))
                ),
                "expected InvalidVersion for {bad}"
            );
        }
    }

    #[test]
    fn empty_satisfying_set_is_version_not_found() {
        let vs = versions(&["2.0.0"]);
        assert!(matches!(
            find_best_version("lib", &vs, Some("1.x")),
            Err(DocdexError::VersionNotFound { .. })
        ));
        let none: Vec<String> = Vec::new();
        assert!(matches!(
            find_best_version("lib", &none, None),
            Err(DocdexError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn unversioned_is_excluded_from_resolution() {
        let vs = versions(&["", "1.0.0"]);
        assert_eq!(find_best_version("lib", &vs, None).unwrap(), "1.0.0");
    }

    #[test]
    fn coercion_accepts_partial_and_v_prefixed() {
        assert_eq!(coerce_version("1").unwrap().to_string(), "1.0.0");
        assert_eq!(coerce_version("1.2").unwrap().to_string(), "1.2.0");
        assert_eq!(coerce_version("v1.2.3").unwrap().to_string(), "1.2.3");
        assert!(coerce_version("not-a-version").is_none());
    }

    #[test]
    fn listing_order_puts_unversioned_first() {
        let mut vs = versions(&["2.0.0", "", "1.10.0", "weird", "1.2.0"]);
        sort_versions(&mut vs);
        assert_eq!(vs, versions(&["", "1.2.0", "1.10.0", "2.0.0", "weird"]));
    }
}
