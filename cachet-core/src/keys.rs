//! Composite cache keys.
//!
//! A composite key encodes a prefix, one or more parts and an optional hash
//! field as `prefix|part1|part2/field`. Decoding splits on both separators
//! and assigns segments positionally.
//!
//! Separators occurring inside a part are NOT escaped: `create_key("p",
//! "a/b", &[])` decodes as three segments. Callers must keep `|` and `/` out
//! of key parts if they need lossless round trips.
//!
//! Keys carry no trailing `|`. Clients that append one build different keys
//! for the same parts and will not see entries written here.

/// Separator between key parts.
pub const KEYS_SEPARATOR: char = '|';

/// Separator between a key and its hash field.
pub const FIELD_SEPARATOR: char = '/';

/// Join a prefix and key parts into one cache key.
pub fn create_key(prefix: &str, first_part: &str, parts: &[&str]) -> String {
    let capacity = prefix.len()
        + first_part.len()
        + parts.iter().map(|p| p.len() + 1).sum::<usize>()
        + 1;
    let mut key = String::with_capacity(capacity);
    key.push_str(prefix);
    key.push(KEYS_SEPARATOR);
    key.push_str(first_part);
    for part in parts {
        key.push(KEYS_SEPARATOR);
        key.push_str(part);
    }
    key
}

/// Append a hash field to a key.
pub fn key_with_field(key: &str, field: &str) -> String {
    let mut out = String::with_capacity(key.len() + field.len() + 1);
    out.push_str(key);
    out.push(FIELD_SEPARATOR);
    out.push_str(field);
    out
}

/// True if the key carries a hash field.
pub fn has_field(key: &str) -> bool {
    key.contains(FIELD_SEPARATOR)
}

/// Split a composite key on its last field separator.
///
/// Without a separator the whole input is the key and the field is empty.
pub fn split_key_and_field(s: &str) -> (&str, &str) {
    match s.rfind(FIELD_SEPARATOR) {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    }
}

/// All segments of a key, treating the field separator as a part separator.
///
/// An empty key has no segments.
pub fn split_parts(key: &str) -> Vec<&str> {
    if key.is_empty() {
        return Vec::new();
    }
    key.split([KEYS_SEPARATOR, FIELD_SEPARATOR]).collect()
}

/// Assign the segments of `key` (prefix included) to `slots` in order.
///
/// Excess segments are ignored; slots without a segment are left untouched.
pub fn unpack_key_with_prefix(key: &str, slots: &mut [&mut String]) {
    assign(split_parts(key).into_iter(), slots);
}

/// Same as [`unpack_key_with_prefix`], skipping the prefix segment.
pub fn unpack_key(key: &str, slots: &mut [&mut String]) {
    assign(split_parts(key).into_iter().skip(1), slots);
}

fn assign<'a>(segments: impl Iterator<Item = &'a str>, slots: &mut [&mut String]) {
    for (slot, segment) in slots.iter_mut().zip(segments) {
        slot.clear();
        slot.push_str(segment);
    }
}

/// A structured composite key.
///
/// Built with [`CompositeKey::new`] so a key always has a prefix and at
/// least one part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    inner: CompositeKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CompositeKeyInner {
    prefix: String,
    parts: Vec<String>,
    field: Option<String>,
}

impl CompositeKey {
    pub fn new(prefix: impl Into<String>, first_part: impl Into<String>) -> Self {
        Self {
            inner: CompositeKeyInner {
                prefix: prefix.into(),
                parts: vec![first_part.into()],
                field: None,
            },
        }
    }

    /// Add another part.
    pub fn part(mut self, part: impl Into<String>) -> Self {
        self.inner.parts.push(part.into());
        self
    }

    /// Address a hash field under this key.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.inner.field = Some(field.into());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    pub fn parts(&self) -> &[String] {
        &self.inner.parts
    }

    pub fn field(&self) -> Option<&str> {
        self.inner.field.as_deref()
    }

    /// The scalar (or hash) key without the field.
    pub fn key(&self) -> String {
        let rest: Vec<&str> = self.inner.parts[1..].iter().map(String::as_str).collect();
        create_key(&self.inner.prefix, &self.inner.parts[0], &rest)
    }

    /// Encode to `prefix|part1|.../field`.
    pub fn encode(&self) -> String {
        let key = self.key();
        match &self.inner.field {
            Some(field) => key_with_field(&key, field),
            None => key,
        }
    }

    /// Decode a key produced by [`CompositeKey::encode`].
    ///
    /// Returns `None` when the input has fewer than two segments.
    pub fn decode(s: &str) -> Option<Self> {
        let (key, field) = if has_field(s) {
            let (key, field) = split_key_and_field(s);
            (key, Some(field.to_string()))
        } else {
            (s, None)
        };
        let mut segments = split_parts(key).into_iter();
        let prefix = segments.next()?;
        let first = segments.next()?;
        Some(Self {
            inner: CompositeKeyInner {
                prefix: prefix.to_string(),
                parts: std::iter::once(first)
                    .chain(segments)
                    .map(str::to_string)
                    .collect(),
                field,
            },
        })
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack_with_prefix(key: &str, slots: usize) -> Vec<String> {
        let mut out = vec![String::new(); slots];
        let mut refs: Vec<&mut String> = out.iter_mut().collect();
        unpack_key_with_prefix(key, &mut refs);
        out
    }

    #[test]
    fn test_unpack_all_params_present() {
        assert_eq!(
            unpack_with_prefix("prefix|a|b|c|d", 5),
            vec!["prefix", "a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_unpack_with_field() {
        assert_eq!(
            unpack_with_prefix("prefix|a|b|c/field", 5),
            vec!["prefix", "a", "b", "c", "field"]
        );
    }

    #[test]
    fn test_unpack_more_slots_than_segments() {
        let mut a = String::new();
        let mut b = String::new();
        let mut untouched = "keep".to_string();
        unpack_key_with_prefix("prefix|a", &mut [&mut a, &mut b, &mut untouched]);
        assert_eq!(a, "prefix");
        assert_eq!(b, "a");
        assert_eq!(untouched, "keep");
    }

    #[test]
    fn test_unpack_fewer_slots_than_segments() {
        assert_eq!(unpack_with_prefix("prefix|a|b|c|d", 3), vec!["prefix", "a", "b"]);
    }

    #[test]
    fn test_unpack_only_prefix() {
        assert_eq!(unpack_with_prefix("prefix", 1), vec!["prefix"]);
    }

    #[test]
    fn test_unpack_empty_string() {
        assert!(split_parts("").is_empty());
        let mut slot = "keep".to_string();
        unpack_key_with_prefix("", &mut [&mut slot]);
        assert_eq!(slot, "keep");
    }

    #[test]
    fn test_unpack_key_skips_prefix() {
        let mut id = String::new();
        let mut sub = String::new();
        unpack_key("usr-by-id|42|x", &mut [&mut id, &mut sub]);
        assert_eq!(id, "42");
        assert_eq!(sub, "x");
    }

    #[test]
    fn test_create_key() {
        assert_eq!(create_key("prefix", "key1", &[]), "prefix|key1");
        assert_eq!(
            create_key("prefix", "key1", &["key2", "key3"]),
            "prefix|key1|key2|key3"
        );
    }

    #[test]
    fn test_trailing_separator_key_is_a_different_key() {
        let key = create_key("usr-by-id", "42", &[]);
        assert_ne!(key, "usr-by-id|42|");
        assert_eq!(split_parts("usr-by-id|42|"), vec!["usr-by-id", "42", ""]);
        assert_eq!(split_parts(&key), vec!["usr-by-id", "42"]);
    }

    #[test]
    fn test_key_with_field() {
        assert_eq!(key_with_field("k", "f"), "k/f");
        assert!(has_field("k/f"));
        assert!(!has_field("k|f"));
    }

    #[test]
    fn test_split_key_and_field_uses_last_separator() {
        assert_eq!(split_key_and_field("a/b/c"), ("a/b", "c"));
        assert_eq!(split_key_and_field("plain"), ("plain", ""));
        assert_eq!(split_key_and_field("k/"), ("k", ""));
    }

    #[test]
    fn test_separator_inside_part_is_not_escaped() {
        let key = create_key("p", "a/b", &[]);
        assert_eq!(split_parts(&key), vec!["p", "a", "b"]);
    }

    #[test]
    fn test_composite_key_encode_decode() {
        let key = CompositeKey::new("usr-by-dpmt", "sales")
            .part("emea")
            .with_field("u42");
        assert_eq!(key.encode(), "usr-by-dpmt|sales|emea/u42");
        assert_eq!(key.key(), "usr-by-dpmt|sales|emea");

        let decoded = CompositeKey::decode(&key.encode()).expect("decode should succeed");
        assert_eq!(decoded, key);
        assert_eq!(decoded.field(), Some("u42"));
    }

    #[test]
    fn test_composite_key_decode_rejects_short_input() {
        assert!(CompositeKey::decode("").is_none());
        assert!(CompositeKey::decode("prefix").is_none());
    }
}
