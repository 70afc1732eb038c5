/// Resolved forwarding address to original recipient, in the order the
/// recipients were accepted.
///
/// Transactions rarely carry more than a handful of recipients, so a vector
/// is searched linearly.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecipientMap {
    entries: Vec<(String, String)>,
}

impl RecipientMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, resolved: &str) -> bool {
        self.entries.iter().any(|(r, _)| r == resolved)
    }

    /// Record `resolved` as standing for `original`. Returns `false`, leaving
    /// the map untouched, if `resolved` is already present.
    pub fn insert(&mut self, resolved: String, original: String) -> bool {
        if self.contains(&resolved) {
            return false;
        }

        self.entries.push((resolved, original));
        true
    }

    /// Remove `resolved`, returning the original recipient it stood for.
    pub fn remove(&mut self, resolved: &str) -> Option<String> {
        let index = self.entries.iter().position(|(r, _)| r == resolved)?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn original(&self, resolved: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(r, _)| r == resolved)
            .map(|(_, original)| original.as_str())
    }

    /// Original recipients still in the map, in acceptance order.
    #[must_use]
    pub fn originals(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(_, original)| original.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
