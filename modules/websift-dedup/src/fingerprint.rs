//! Per-job fingerprint table: tier-0 key → accepted canonical row.

use std::collections::HashMap;

use crate::canonical::CanonicalRow;

/// Accepted rows of one job, indexed by row id and by tier-0 key.
///
/// The key index holds at most one row id per key; a later accepted row with
/// the same key (possible in entity mode, where tier-0 alone does not
/// reject) takes over the key while the earlier row stays addressable by id.
#[derive(Default)]
pub struct FingerprintTable {
    rows: HashMap<String, CanonicalRow>,
    keys: HashMap<String, String>,
}

impl FingerprintTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row currently holding a tier-0 key.
    pub fn lookup(&self, key: &str) -> Option<&CanonicalRow> {
        self.keys.get(key).and_then(|id| self.rows.get(id))
    }

    pub fn get(&self, row_id: &str) -> Option<&CanonicalRow> {
        self.rows.get(row_id)
    }

    pub fn insert(&mut self, row: CanonicalRow) {
        self.keys.insert(row.tier0_key(), row.row_id.clone());
        self.rows.insert(row.row_id.clone(), row);
    }

    pub fn rows(&self) -> impl Iterator<Item = &CanonicalRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use serde_json::json;
    use websift_common::DedupMode;

    fn row(id: &str, name: &str, url: &str) -> CanonicalRow {
        canonicalize(&json!({"id": id, "name": name, "url": url}), DedupMode::Company)
    }

    #[test]
    fn one_row_per_key() {
        let mut table = FingerprintTable::new();
        table.insert(row("a", "Apple", "https://apple.com"));
        table.insert(row("b", "Apple", "https://www.apple.com"));

        // Same tier-0 key: the key points at the later row, both stay by id.
        let hit = table.lookup("apple:apple.com:generic").unwrap();
        assert_eq!(hit.row_id, "b");
        assert_eq!(table.len(), 2);
        assert!(table.get("a").is_some());
    }

    #[test]
    fn lookup_miss() {
        let table = FingerprintTable::new();
        assert!(table.lookup("apple:apple.com:generic").is_none());
        assert!(table.is_empty());
    }
}
