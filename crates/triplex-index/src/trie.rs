//! Prefix trie over normalized terms

use crate::IndexEntry;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
struct TrieNode {
    children: BTreeMap<char, TrieNode>,
    entries: Vec<IndexEntry>,
}

/// Character trie returning every entry stored under a prefix
#[derive(Debug, Default, Clone)]
pub struct PrefixTrie {
    root: TrieNode,
    terms: usize,
    entries: usize,
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry under its term. Duplicate (type, source) pairs on
    /// the same term are ignored.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        let mut node = &mut self.root;
        for ch in entry.term.chars() {
            node = node.children.entry(ch).or_default();
        }
        if node
            .entries
            .iter()
            .any(|e| e.entity_type == entry.entity_type && e.source == entry.source)
        {
            return false;
        }
        if node.entries.is_empty() {
            self.terms += 1;
        }
        node.entries.push(entry);
        self.entries += 1;
        true
    }

    /// Depth-first collection of entries whose term starts with `prefix`,
    /// stopping after `limit` entries.
    pub fn search_prefix(&self, prefix: &str, limit: usize) -> Vec<&IndexEntry> {
        let mut node = &self.root;
        for ch in prefix.chars() {
            match node.children.get(&ch) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }

        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            for entry in &current.entries {
                if out.len() >= limit {
                    return out;
                }
                out.push(entry);
            }
            // Reverse so lexicographically smaller children are visited first
            stack.extend(current.children.values().rev());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        let mut stack = vec![&self.root];
        let mut all = Vec::with_capacity(self.entries);
        while let Some(node) = stack.pop() {
            all.extend(node.entries.iter());
            stack.extend(node.children.values());
        }
        all.into_iter()
    }

    pub fn term_count(&self) -> usize {
        self.terms
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexSource;

    fn trie(terms: &[(&str, &str)]) -> PrefixTrie {
        let mut trie = PrefixTrie::new();
        for (term, ty) in terms {
            trie.insert(IndexEntry::new(*term, *ty, 0.9, IndexSource::Keyword));
        }
        trie
    }

    #[test]
    fn test_prefix_search() {
        let trie = trie(&[
            ("ant colony", "Algorithm"),
            ("ant colony optimization", "Algorithm"),
            ("antenna", "Device"),
            ("bee", "Animal"),
        ]);

        let hits = trie.search_prefix("ant", 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].term, "ant colony");

        assert!(trie.search_prefix("zebra", 10).is_empty());
        assert_eq!(trie.search_prefix("", 10).len(), 4);
    }

    #[test]
    fn test_prefix_search_respects_limit() {
        let trie = trie(&[("aa", "X"), ("ab", "Y"), ("ac", "Z")]);
        assert_eq!(trie.search_prefix("a", 2).len(), 2);
    }

    #[test]
    fn test_counts() {
        let mut trie = trie(&[("tsp", "Problem")]);
        assert!(!trie.insert(IndexEntry::new("tsp", "Problem", 0.9, IndexSource::Keyword)));
        assert!(trie.insert(IndexEntry::new("tsp", "Acronym", 0.9, IndexSource::Keyword)));
        assert_eq!(trie.term_count(), 1);
        assert_eq!(trie.len(), 2);
        assert_eq!(trie.iter().count(), 2);
    }

    #[test]
    fn test_unicode_terms() {
        let trie = trie(&[("蚁群算法", "Algorithm")]);
        assert_eq!(trie.search_prefix("蚁群", 5).len(), 1);
    }
}
