//! Path and content fingerprints.
//!
//! Clients on every platform compute the same value, so the hash works on
//! UTF-16 code units with 32-bit wrap-around arithmetic.

use serde::{Deserialize, Serialize};

/// Fingerprints identifying an entity's path and content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFingerprint {
    /// Hash of the normalized path
    pub path_hash: String,
    /// Hash of the full content
    pub content_hash: String,
}

/// Compute the path and content fingerprints for an entity.
pub fn fingerprint(path: &str, content: &str) -> EntityFingerprint {
    EntityFingerprint {
        path_hash: path_fingerprint(path),
        content_hash: hash_text(content),
    }
}

/// Fingerprint of a path after normalization.
pub fn path_fingerprint(path: &str) -> String {
    hash_text(&normalize_path(path))
}

/// Fingerprint of a content body.
pub fn content_fingerprint(content: &str) -> String {
    hash_text(content)
}

/// Normalize a vault-relative path: forward slashes, no leading or trailing separator.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Rolling `h * 31 + unit` hash over UTF-16 code units, rendered as a signed decimal.
pub fn hash_text(text: &str) -> String {
    text.encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit))
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_values() {
        assert_eq!(hash_text(""), "0");
        assert_eq!(hash_text("a"), "97");
        assert_eq!(hash_text("ab"), "3105");
        // Matches the widely deployed JavaScript string hash.
        assert_eq!(hash_text("hello"), "99162322");
    }

    #[test]
    fn test_hash_wraps_instead_of_overflowing() {
        let long = "x".repeat(10_000);
        let first = hash_text(&long);
        assert_eq!(first, hash_text(&long));
        assert!(first.parse::<i32>().is_ok());
    }

    #[test]
    fn test_hash_uses_utf16_units() {
        // U+1F600 is a surrogate pair: 0xD83D 0xDE00
        let expected = (0xD83Di32 * 31 + 0xDE00).to_string();
        assert_eq!(hash_text("\u{1F600}"), expected);
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(normalize_path("/notes/today.md/"), "notes/today.md");
        assert_eq!(normalize_path("notes\\today.md"), "notes/today.md");
        assert_eq!(
            path_fingerprint("/notes/today.md"),
            path_fingerprint("notes/today.md")
        );
    }

    #[test]
    fn test_fingerprint_pairs_path_and_content() {
        let fp = fingerprint("a.md", "body");
        assert_eq!(fp.path_hash, hash_text("a.md"));
        assert_eq!(fp.content_hash, hash_text("body"));
        assert_ne!(fp.path_hash, fingerprint("b.md", "body").path_hash);
    }
}
