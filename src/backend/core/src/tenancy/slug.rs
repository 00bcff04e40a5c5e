//! Organization slug derivation.

use regex::Regex;
use std::sync::LazyLock;

/// Runs of characters that cannot appear in a slug.
static SEPARATOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("Invalid slug separator regex"));

/// Lowercase, collapse every run of non-alphanumerics into `-`, trim dashes.
/// Falls back to `org` for names with nothing usable in them.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let slug = SEPARATOR_REGEX.replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "org".to_string()
    } else {
        slug.to_string()
    }
}

/// Candidate slugs in probing order: `base`, `base-1`, `base-2`, ...
pub fn candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((1u32..).map(move |n| format!("{}-{}", base, n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp"), "acme-corp");
        assert_eq!(slugify("  Acme,  Corp & Sons!! "), "acme-corp-sons");
        assert_eq!(slugify("***"), "org");
    }

    #[test]
    fn test_candidates() {
        let first: Vec<String> = candidates("acme").take(3).collect();
        assert_eq!(first, vec!["acme", "acme-1", "acme-2"]);
    }
}
