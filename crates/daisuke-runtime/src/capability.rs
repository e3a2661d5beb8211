//! Runner capabilities.
//!
//! A runner declares what it can do in its manifest. Role capabilities
//! (content source, tracker, local source) decide which operations the host
//! may invoke; permission capabilities gate host functions such as HTTP.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A capability that a runner can declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Produces content listings and chapter lists.
    ContentSource,

    /// Records external reading progress and accepts entry forms.
    ContentTracker,

    /// A content source that can report read markers without a remote call.
    LocalContentSource,

    /// Access to network (HTTP requests).
    Network,

    /// Custom capability for extension.
    Custom(String),
}

impl Capability {
    /// Parse a capability from a string.
    pub fn parse(s: &str) -> Self {
        match s {
            "content_source" => Capability::ContentSource,
            "content_tracker" => Capability::ContentTracker,
            "local_content_source" => Capability::LocalContentSource,
            "network" => Capability::Network,
            other => Capability::Custom(other.to_string()),
        }
    }

    /// Convert capability to string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Capability::ContentSource => "content_source",
            Capability::ContentTracker => "content_tracker",
            Capability::LocalContentSource => "local_content_source",
            Capability::Network => "network",
            Capability::Custom(s) => s,
        }
    }
}

/// A set of capabilities.
///
/// `LocalContentSource` refines `ContentSource`, so inserting it also grants
/// the content source role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: HashSet<Capability>,
}

impl CapabilitySet {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self {
            capabilities: HashSet::new(),
        }
    }

    /// Create a capability set from a list of capability strings.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        strings
            .into_iter()
            .map(|s| Capability::parse(s.as_ref()))
            .collect()
    }

    /// Add a capability to the set.
    pub fn add(&mut self, cap: Capability) {
        if cap == Capability::LocalContentSource {
            self.capabilities.insert(Capability::ContentSource);
        }
        self.capabilities.insert(cap);
    }

    /// Check if the set contains a capability.
    pub fn has(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    pub fn is_source(&self) -> bool {
        self.has(&Capability::ContentSource)
    }

    pub fn is_tracker(&self) -> bool {
        self.has(&Capability::ContentTracker)
    }

    pub fn is_local_source(&self) -> bool {
        self.has(&Capability::LocalContentSource)
    }

    /// Get all capabilities in the set.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    /// Get the number of capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = Self::new();
        for cap in iter {
            set.add(cap);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for name in ["content_source", "content_tracker", "local_content_source", "network"] {
            assert_eq!(Capability::parse(name).as_str(), name);
        }
        assert_eq!(
            Capability::parse("clipboard"),
            Capability::Custom("clipboard".to_string())
        );
    }

    #[test]
    fn test_local_source_implies_source() {
        let caps = CapabilitySet::from_strings(["local_content_source"]);
        assert!(caps.is_local_source());
        assert!(caps.is_source());
        assert!(!caps.is_tracker());
        assert_eq!(caps.len(), 2);
    }

    #[test]
    fn test_tracker_only() {
        let caps = CapabilitySet::from_strings(["content_tracker", "network"]);
        assert!(caps.is_tracker());
        assert!(!caps.is_source());
        assert!(caps.has(&Capability::Network));
    }
}
