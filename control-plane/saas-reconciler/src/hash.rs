//! Content fingerprints used to detect configuration changes.
//!
//! The fingerprint is a change detector, not a security primitive: the
//! mapping is rendered in a canonical key-sorted form, hashed with CRC-32 and
//! the decimal digest is re-encoded with an alphabet that is safe to embed in
//! annotation and label values.

use std::collections::BTreeMap;

/// Alphabet without vowels and look-alike characters, so encoded values
/// never spell words and survive label value validation.
const SAFE_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Fingerprint a key/value mapping. The result does not depend on the
/// iteration order of `data`; when a key repeats, the last value wins.
pub fn hash<K, V, I>(data: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    let sorted: BTreeMap<String, Vec<u8>> = data
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_vec()))
        .collect();
    let digest = crc32fast::hash(&canonical_form(&sorted));
    safe_encode(&digest.to_string())
}

/// Length-prefixed rendering of the sorted entries. Prefixing both key and
/// value keeps `{"ab": "c"}` and `{"a": "bc"}` apart.
fn canonical_form(sorted: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let mut buf = Vec::new();
    for (k, v) in sorted {
        buf.extend_from_slice(format!("{}:", k.len()).as_bytes());
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(format!("={}:", v.len()).as_bytes());
        buf.extend_from_slice(v);
        buf.push(b';');
    }
    buf
}

/// Map every byte of `s` onto [`SAFE_ALPHABET`].
pub fn safe_encode(s: &str) -> String {
    s.bytes()
        .map(|b| SAFE_ALPHABET[b as usize % SAFE_ALPHABET.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn hash_ignores_input_order() {
        let forward = vec![("A", "1"), ("B", "2"), ("C", "3")];
        let mut reversed = forward.clone();
        reversed.reverse();
        let as_map: HashMap<&str, &str> = forward.iter().copied().collect();

        let h = hash(forward);
        assert_eq!(h, hash(reversed));
        assert_eq!(h, hash(as_map));
    }

    #[test]
    fn hash_changes_with_content() {
        let base = hash([("KEY", "v1")]);
        assert_ne!(base, hash([("KEY", "v2")]));
        assert_ne!(base, hash([("KEY2", "v1")]));
        assert_ne!(base, hash([("KEY", "v1"), ("OTHER", "")]));
        assert_ne!(hash([("ab", "c")]), hash([("a", "bc")]));
    }

    #[test]
    fn hash_is_annotation_safe() {
        let h = hash([("password", b"\x00\xff binary".as_slice())]);
        assert!(!h.is_empty());
        assert!(h.len() <= 10, "u32 decimal digest has at most 10 digits");
        assert!(h.bytes().all(|b| SAFE_ALPHABET.contains(&b)));
    }

    #[test]
    fn safe_encode_is_stable() {
        assert_eq!(safe_encode("0123"), safe_encode("0123"));
        assert_eq!(safe_encode(""), "");
        assert_ne!(safe_encode("1"), safe_encode("2"));
    }
}
