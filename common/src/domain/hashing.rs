use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Deterministic digest of a file set: sha256 over `path:sha256` lines sorted
/// by path. Two file sets with the same content produce the same fingerprint
/// regardless of listing order.
pub fn fingerprint<'a, I>(files: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut entries: Vec<(&str, &str)> = files.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (path, sha) in entries {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(sha.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn fingerprint_ignores_listing_order() {
        let a = fingerprint([("b.md", "2"), ("a.md", "1")]);
        let b = fingerprint([("a.md", "1"), ("b.md", "2")]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_content_or_path() {
        let base = fingerprint([("a.md", "1")]);
        assert_ne!(base, fingerprint([("a.md", "2")]));
        assert_ne!(base, fingerprint([("b.md", "1")]));
    }
}
