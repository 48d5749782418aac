use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[.,!?;:'"`()\[\]{}]"#).unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a label for matching: lowercase, drop punctuation, collapse spaces
pub fn normalize_label(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").to_string()
}

/// Hands out ids that are unique within one graph. Ids supplied by the model
/// are kept when free; missing or duplicate ones are replaced with
/// `{prefix}_{n}`, skipping any value already taken.
#[derive(Debug, Default)]
pub struct IdRegistry {
    taken: HashSet<String>,
    counters: HashMap<&'static str, usize>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, candidate: Option<&str>, prefix: &'static str) -> String {
        if let Some(id) = candidate.map(str::trim).filter(|id| !id.is_empty()) {
            if self.taken.insert(id.to_string()) {
                return id.to_string();
            }
        }

        self.synthesize(prefix)
    }

    fn synthesize(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        loop {
            *counter += 1;
            let id = format!("{}_{}", prefix, counter);
            if self.taken.insert(id.clone()) {
                return id;
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.taken.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_label("GraphRAG"), "graphrag");
        assert_eq!(normalize_label("GraphRAG!"), "graphrag");
        assert_eq!(normalize_label("  Acme,   Inc.  "), "acme inc");
    }

    #[test]
    fn test_claim_keeps_free_ids() {
        let mut ids = IdRegistry::new();
        assert_eq!(ids.claim(Some("E1"), "entity"), "E1");
        assert_eq!(ids.claim(Some(" E2 "), "entity"), "E2");
    }

    #[test]
    fn test_claim_replaces_missing_and_duplicates() {
        let mut ids = IdRegistry::new();
        assert_eq!(ids.claim(Some("entity_1"), "entity"), "entity_1");

        assert_eq!(ids.claim(Some("x"), "entity"), "x");
        assert_eq!(ids.claim(Some("x"), "entity"), "entity_2");
        assert_eq!(ids.claim(None, "entity"), "entity_3");
        assert_eq!(ids.claim(Some(""), "rel"), "rel_1");
        assert!(ids.contains("entity_1"));
    }
}
