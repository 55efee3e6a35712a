//! Exact-match index: normalized term to entries

use crate::IndexEntry;
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct ExactIndex {
    terms: HashMap<String, Vec<IndexEntry>>,
    entries: usize,
}

impl ExactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Returns false when an entry with the same
    /// (term, type, source) already exists.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        let bucket = self.terms.entry(entry.term.clone()).or_default();
        if bucket
            .iter()
            .any(|e| e.entity_type == entry.entity_type && e.source == entry.source)
        {
            return false;
        }
        bucket.push(entry);
        self.entries += 1;
        true
    }

    /// Entries for an already-normalized term
    pub fn get(&self, term: &str) -> &[IndexEntry] {
        self.terms.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entries whose term strictly contains `query`
    pub fn containing<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a IndexEntry> + 'a {
        self.terms
            .iter()
            .filter(move |(term, _)| term.as_str() != query && term.contains(query))
            .flat_map(|(_, entries)| entries.iter())
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.terms.values().flat_map(|entries| entries.iter())
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
