//! The closed set of event kinds the relay is willing to broadcast.

/// Event kinds every relay accepts unless configured otherwise.
pub const DEFAULT_EVENT_KINDS: &[&str] = &["character_message", "user_message"];

/// Append-only allow-list of event kinds.
///
/// Order of declaration is kept so the welcome and diagnostics responses list
/// kinds the way the operator wrote them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventVocabulary {
    kinds: Vec<String>,
}

impl EventVocabulary {
    /// An empty vocabulary. Every submission is ignored until kinds are added.
    pub fn empty() -> Self {
        Self { kinds: Vec::new() }
    }

    /// Build a vocabulary from a list of kinds, skipping duplicates.
    pub fn from_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocabulary = Self::empty();
        for kind in kinds {
            let _ = vocabulary.insert(kind);
        }
        vocabulary
    }

    /// Add a kind. Returns `false` when it was already present.
    pub fn insert(&mut self, kind: impl Into<String>) -> bool {
        let kind = kind.into();
        if self.contains(&kind) {
            return false;
        }
        self.kinds.push(kind);
        true
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        let _ = self.insert(kind);
        self
    }

    /// Whether `kind` may be broadcast.
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k == kind)
    }

    /// Kinds in declaration order.
    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    /// Number of kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether no kind is allowed.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for EventVocabulary {
    fn default() -> Self {
        Self::from_kinds(DEFAULT_EVENT_KINDS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_contains_builtin_kinds() {
        let v = EventVocabulary::default();
        assert!(v.contains("character_message"));
        assert!(v.contains("user_message"));
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn unknown_kind_not_contained() {
        let v = EventVocabulary::default();
        assert!(!v.contains("unsupported_event"));
        assert!(!v.contains(""));
    }

    #[test]
    fn insert_is_append_only_and_deduplicated() {
        let mut v = EventVocabulary::default();
        assert!(v.insert("typing"));
        assert!(!v.insert("typing"));
        assert!(!v.insert("user_message"));
        assert_eq!(v.kinds(), ["character_message", "user_message", "typing"]);
    }

    #[test]
    fn from_kinds_preserves_order() {
        let v = EventVocabulary::from_kinds(["b", "a", "b", "c"]);
        assert_eq!(v.kinds(), ["b", "a", "c"]);
    }

    #[test]
    fn empty_vocabulary() {
        let v = EventVocabulary::empty();
        assert!(v.is_empty());
        assert!(!v.contains("character_message"));
    }

    #[test]
    fn with_kind_chains() {
        let v = EventVocabulary::empty().with_kind("x").with_kind("y");
        assert_eq!(v.kinds(), ["x", "y"]);
    }
}
