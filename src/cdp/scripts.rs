//! Scripts the debuggee has parsed during the current session

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    pub url: String,
    pub source_map_url: Option<String>,
}

/// Script id to URL mapping and its reverse
///
/// Entries are only ever added while a session runs; the registry is
/// emptied as a whole on disconnect.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    by_id: HashMap<String, ScriptInfo>,
    by_url: HashMap<String, String>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parsed script; a URL parsed again points at its newest id
    pub fn insert(&mut self, script_id: &str, url: &str, source_map_url: Option<String>) {
        if !url.is_empty() {
            self.by_url.insert(url.to_string(), script_id.to_string());
        }
        self.by_id
            .entry(script_id.to_string())
            .or_insert_with(|| ScriptInfo {
                url: url.to_string(),
                source_map_url: source_map_url.filter(|s| !s.is_empty()),
            });
    }

    pub fn get(&self, script_id: &str) -> Option<&ScriptInfo> {
        self.by_id.get(script_id)
    }

    pub fn url(&self, script_id: &str) -> Option<&str> {
        self.get(script_id).map(|info| info.url.as_str())
    }

    pub fn script_id(&self, url: &str) -> Option<&str> {
        self.by_url.get(url).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_url.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_both_ways() {
        let mut scripts = ScriptRegistry::new();
        scripts.insert("12", "file:///app/main.js", Some("main.js.map".to_string()));
        scripts.insert("13", "", None);

        assert_eq!(scripts.url("12"), Some("file:///app/main.js"));
        assert_eq!(scripts.script_id("file:///app/main.js"), Some("12"));
        assert_eq!(
            scripts.get("12").and_then(|s| s.source_map_url.as_deref()),
            Some("main.js.map")
        );
        assert_eq!(scripts.url("13"), Some(""));
        assert_eq!(scripts.script_id(""), None);
        assert_eq!(scripts.len(), 2);
    }

    #[test]
    fn test_entries_are_not_overwritten() {
        let mut scripts = ScriptRegistry::new();
        scripts.insert("1", "file:///a.js", None);
        scripts.insert("1", "file:///b.js", None);
        assert_eq!(scripts.url("1"), Some("file:///a.js"));

        scripts.clear();
        assert!(scripts.is_empty());
        assert_eq!(scripts.script_id("file:///a.js"), None);
    }
}
