use std::collections::HashSet;

use serde_json::{Map, Value};

/// Who is online in the current room, as projected from presence syncs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceTracker {
    names: Vec<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the online list from a presence snapshot. Returns whether it
    /// changed.
    pub fn apply(&mut self, snapshot: &Value) -> bool {
        let names = online_names(snapshot);
        if names == self.names {
            return false;
        }
        self.names = names;
        true
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Distinct display names in a presence snapshot, first seen first.
///
/// The snapshot is a mapping of keys to lists of payloads, possibly nested. A
/// payload carries its name in `user` (or `username`); payloads without a
/// usable name are skipped.
pub fn online_names(snapshot: &Value) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    collect(snapshot, &mut seen, &mut names);
    names
}

fn collect(value: &Value, seen: &mut HashSet<String>, names: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, seen, names);
            }
        }
        Value::Object(map) if is_payload(map) => {
            let name = ["user", "username"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .unwrap_or_default();
            if !name.is_empty() && seen.insert(name.to_string()) {
                names.push(name.to_string());
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect(nested, seen, names);
            }
        }
        _ => {}
    }
}

fn is_payload(map: &Map<String, Value>) -> bool {
    map.contains_key("user") || map.contains_key("username")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dedups_names_across_keys() {
        let snapshot = json!({
            "a": [{"user": "asha", "online_at": "2024-01-01T00:00:00Z"}],
            "b": [{"user": "ravi"}, {"user": "asha"}],
        });
        let mut tracker = PresenceTracker::new();
        assert!(tracker.apply(&snapshot));
        assert_eq!(tracker.count(), 2);
        assert!(tracker.is_online("asha"));
        assert!(tracker.is_online("ravi"));
        assert!(!tracker.apply(&snapshot));
    }

    #[test]
    fn skips_unnamed_and_odd_payloads() {
        let snapshot = json!({
            "a": [{"user": ""}, {"user": null}, {"online_at": "x"}, 7, "text"],
            "b": {"nested": [{"username": "meera"}]},
        });
        assert_eq!(online_names(&snapshot), ["meera"]);
    }

    #[test]
    fn empty_snapshot_clears_list() {
        let mut tracker = PresenceTracker::new();
        tracker.apply(&json!({"a": [{"user": "asha"}]}));
        assert!(tracker.apply(&json!({})));
        assert_eq!(tracker.count(), 0);
        assert!(online_names(&Value::Null).is_empty());
    }
}
