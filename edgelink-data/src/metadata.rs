/// An insertion-ordered list of `(key, value)` string pairs with
/// case-insensitive key equality and last-write-wins semantics.
///
/// Mirrors the manual linked list the source implementation keeps for
/// per-frame metadata, generalized per the REDESIGN FLAGS guidance to a
/// small `Vec`-backed map: metadata lists are short (a handful of
/// entries per frame) so a linear scan is both simpler and faster than
/// a hashmap here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Metadata::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Sets `key` to `value`, replacing any existing value for a
    /// case-insensitively equal key in place (last-write-wins).
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        match self.position(key) {
            Some(idx) => self.entries[idx].1 = value.into(),
            None => self.entries.push((key.to_owned(), value.into())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|idx| self.entries[idx].1.as_str())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|idx| self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compares two metadata lists as multisets of (key, value) pairs,
    /// ignoring insertion order.
    pub fn same_contents_as(&self, other: &Metadata) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(k, v)| other.get(k) == Some(v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_case_insensitive_and_last_write_wins() {
        let mut md = Metadata::new();
        md.set("K", "a");
        md.set("k", "b");
        assert_eq!(md.get("K"), Some("b"));
        assert_eq!(md.len(), 1);
    }

    #[test]
    fn same_contents_ignores_order() {
        let mut a = Metadata::new();
        a.set("x", "1");
        a.set("y", "2");

        let mut b = Metadata::new();
        b.set("y", "2");
        b.set("x", "1");

        assert!(a.same_contents_as(&b));
    }
}
