//! Driver capability flags and their projection to catalog feature tags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a driver can do. `extras` carries driver-specific flags beyond the
/// common set, e.g. `port_forwarding` for SSH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub desktop: bool,
    #[serde(default)]
    pub file_transfer: bool,
    #[serde(default)]
    pub clipboard: bool,
    #[serde(default)]
    pub session_recording: bool,
    #[serde(default)]
    pub metrics: bool,
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, bool>,
}

impl DriverCapabilities {
    /// Project the flags to stable catalog feature tags, sorted
    /// lexicographically. Extras contribute only their `true` keys.
    pub fn feature_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        for (flag, tag) in [
            (self.terminal, "terminal"),
            (self.desktop, "desktop"),
            (self.file_transfer, "file_transfer"),
            (self.clipboard, "clipboard"),
            (self.session_recording, "session_recording"),
            (self.metrics, "metrics"),
            (self.reconnect, "reconnect"),
        ] {
            if flag {
                tags.push(tag.to_string());
            }
        }
        for (name, enabled) in &self.extras {
            if *enabled {
                tags.push(name.clone());
            }
        }
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_tags_are_sorted_and_stable() {
        let mut extras = BTreeMap::new();
        extras.insert("port_forwarding".to_string(), true);
        extras.insert("agent_forwarding".to_string(), false);
        let caps = DriverCapabilities {
            terminal: true,
            file_transfer: true,
            reconnect: true,
            extras,
            ..Default::default()
        };

        let tags = caps.feature_tags();
        assert_eq!(
            tags,
            vec!["file_transfer", "port_forwarding", "reconnect", "terminal"]
        );
        // Projection is deterministic.
        assert_eq!(tags, caps.feature_tags());
    }

    #[test]
    fn no_capabilities_means_no_tags() {
        assert!(DriverCapabilities::default().feature_tags().is_empty());
    }
}
