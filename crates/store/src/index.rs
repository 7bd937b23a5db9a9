//! Keyword index over client hostnames and usernames.

use crate::urn::Urn;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Maps lowercased keywords to the clients carrying them.
#[derive(Debug, Default)]
pub struct ClientIndex {
    inner: RwLock<IndexInner>,
}

#[derive(Debug, Default)]
struct IndexInner {
    keywords: BTreeMap<String, BTreeSet<Urn>>,
    by_client: HashMap<Urn, BTreeSet<String>>,
}

impl ClientIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split an indexed attribute value into keywords. A hostname yields
    /// itself and its dotted labels; username lists split on whitespace
    /// and commas.
    pub fn keywords_for(value: &str) -> BTreeSet<String> {
        let mut keywords = BTreeSet::new();
        for word in value.split(|c: char| c.is_whitespace() || c == ',') {
            let word = word.trim().to_lowercase();
            if word.is_empty() {
                continue;
            }
            for label in word.split('.').filter(|l| !l.is_empty()) {
                keywords.insert(label.to_string());
            }
            keywords.insert(word);
        }
        keywords
    }

    /// Replace the keywords recorded for `client`.
    pub fn update(&self, client: &Urn, keywords: BTreeSet<String>) {
        let mut inner = self.inner.write();
        inner.remove_client(client);
        for keyword in &keywords {
            inner
                .keywords
                .entry(keyword.clone())
                .or_default()
                .insert(client.clone());
        }
        inner.by_client.insert(client.clone(), keywords);
    }

    pub fn remove(&self, client: &Urn) {
        self.inner.write().remove_client(client);
    }

    /// Clients with a keyword containing `term`, case-insensitively, in URN order.
    pub fn lookup(&self, term: &str) -> Vec<Urn> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        let mut found = BTreeSet::new();
        for (keyword, clients) in &inner.keywords {
            if keyword.contains(&term) {
                found.extend(clients.iter().cloned());
            }
        }
        found.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexInner {
    fn remove_client(&mut self, client: &Urn) {
        let Some(old) = self.by_client.remove(client) else {
            return;
        };
        for keyword in old {
            if let Some(clients) = self.keywords.get_mut(&keyword) {
                clients.remove(client);
                if clients.is_empty() {
                    self.keywords.remove(&keyword);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_for_hostname_and_users() {
        let kw = ClientIndex::keywords_for("Host-A.Example.com");
        assert!(kw.contains("host-a.example.com"));
        assert!(kw.contains("host-a"));
        assert!(kw.contains("example"));

        let users = ClientIndex::keywords_for("alice, bob  carol");
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn test_lookup_substring_case_insensitive() {
        let index = ClientIndex::new();
        index.update(&Urn::new("C.1"), ClientIndex::keywords_for("foo.example.com"));
        index.update(&Urn::new("C.2"), ClientIndex::keywords_for("barfoo"));
        index.update(&Urn::new("C.3"), ClientIndex::keywords_for("baz"));

        assert_eq!(index.lookup("FOO"), vec![Urn::new("C.1"), Urn::new("C.2")]);
        assert!(index.lookup("   ").is_empty());
    }

    #[test]
    fn test_update_replaces_stale_keywords() {
        let index = ClientIndex::new();
        let client = Urn::new("C.1");
        index.update(&client, ClientIndex::keywords_for("old-name"));
        index.update(&client, ClientIndex::keywords_for("new-name"));

        assert!(index.lookup("old").is_empty());
        assert_eq!(index.lookup("new"), vec![client.clone()]);
        index.remove(&client);
        assert!(index.is_empty());
    }
}
