//! Element identity captured at decision time.
//!
//! A fingerprint is computed once per decision cycle and stored in the step
//! history. Two hashes are kept: the exact hash covers every attribute, the
//! stable hash drops transient state classes (`hover`, `focus`, …) from the
//! `class` attribute so that a re-render which only toggled interaction state
//! still resolves to the same element.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Class-name fragments that describe transient interaction state.
const VOLATILE_CLASS_FRAGMENTS: &[&str] = &[
    "hover",
    "focus",
    "focused",
    "focus-visible",
    "focus-within",
    "active",
    "visited",
    "pressed",
    "selected",
    "checked",
    "open",
    "opened",
    "expanded",
    "loading",
    "animating",
    "transition",
];

/// One interactive element of an observed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomElement {
    /// Index the decision backend uses to address this element.
    pub index: u32,
    pub tag: String,
    pub xpath: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub accessible_name: String,
}

impl DomElement {
    pub fn new(index: u32, tag: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            index,
            tag: tag.into().to_lowercase(),
            xpath: xpath.into(),
            attributes: BTreeMap::new(),
            accessible_name: String::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.accessible_name = name.into();
        self
    }

    pub fn fingerprint(&self) -> ElementFingerprint {
        ElementFingerprint::capture(self)
    }
}

/// The recorded identity of a DOM node. Never mutated after capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementFingerprint {
    pub exact_hash: String,
    /// Absent in recordings made before stable hashing existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_hash: Option<String>,
    pub xpath: String,
    #[serde(default)]
    pub accessible_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub node_tag: String,
}

impl ElementFingerprint {
    /// Hashes cover tag, attributes and accessible name. Position is kept
    /// apart in `xpath` so a moved element still matches by hash.
    pub fn capture(element: &DomElement) -> Self {
        let tag = element.tag.to_lowercase();
        let exact_hash = hash_identity(&tag, &element.attributes, &element.accessible_name);
        let stable_attributes = stable_attributes(&element.attributes);
        let stable_hash = hash_identity(&tag, &stable_attributes, &element.accessible_name);

        Self {
            exact_hash,
            stable_hash: Some(stable_hash),
            xpath: element.xpath.clone(),
            accessible_name: element.accessible_name.clone(),
            attributes: element.attributes.clone(),
            node_tag: tag,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The identity used to decide whether two recorded steps touched the
    /// same element.
    pub fn identity(&self) -> &str {
        self.stable_hash.as_deref().unwrap_or(&self.exact_hash)
    }
}

/// Whether a single class token describes transient interaction state.
pub fn is_volatile_class(token: &str) -> bool {
    let lower = token.to_lowercase();
    let trimmed = lower.trim_start_matches(':');
    if VOLATILE_CLASS_FRAGMENTS.contains(&trimmed) {
        return true;
    }
    trimmed
        .split(['-', '_', ':'])
        .filter(|part| !part.is_empty())
        .any(|part| VOLATILE_CLASS_FRAGMENTS.contains(&part))
}

/// Attributes with volatile class tokens removed.
pub fn stable_attributes(attributes: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut out = attributes.clone();
    if let Some(class) = attributes.get("class") {
        let kept: Vec<&str> = class
            .split_whitespace()
            .filter(|token| !is_volatile_class(token))
            .collect();
        if kept.is_empty() {
            out.remove("class");
        } else {
            out.insert("class".to_string(), kept.join(" "));
        }
    }
    out
}

fn hash_identity(tag: &str, attributes: &BTreeMap<String, String>, accessible_name: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tag.as_bytes());
    hasher.update(&[0]);
    for (key, value) in attributes {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(accessible_name.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(class: &str) -> DomElement {
        DomElement::new(1, "BUTTON", "/html/body/div/button[1]")
            .with_attribute("class", class)
            .with_attribute("id", "submit")
            .with_name("Submit")
    }

    #[test]
    fn test_volatile_classes() {
        assert!(is_volatile_class("hover"));
        assert!(is_volatile_class("is-focused"));
        assert!(is_volatile_class("btn--active"));
        assert!(is_volatile_class(":focus"));
        assert!(!is_volatile_class("btn-primary"));
        assert!(!is_volatile_class("hoverboard"));
    }

    #[test]
    fn test_stable_hash_ignores_state_classes() {
        let idle = button("btn btn-primary").fingerprint();
        let hovered = button("btn btn-primary is-hover focus").fingerprint();
        assert_ne!(idle.exact_hash, hovered.exact_hash);
        assert_eq!(idle.stable_hash, hovered.stable_hash);
    }

    #[test]
    fn test_moved_element_keeps_hashes() {
        let here = button("btn").fingerprint();
        let moved = DomElement::new(9, "button", "/html/body/main/section[2]/button[1]")
            .with_attribute("class", "btn")
            .with_attribute("id", "submit")
            .with_name("Submit")
            .fingerprint();
        assert_eq!(here.exact_hash, moved.exact_hash);
        assert_eq!(here.stable_hash, moved.stable_hash);
        assert_ne!(here.xpath, moved.xpath);
    }

    #[test]
    fn test_tag_is_lowercased() {
        let fp = button("btn").fingerprint();
        assert_eq!(fp.node_tag, "button");
    }

    #[test]
    fn test_missing_stable_hash_deserializes() {
        let raw = r#"{"exact_hash":"abc","xpath":"/a","node_tag":"a"}"#;
        let fp: ElementFingerprint = serde_json::from_str(raw).unwrap();
        assert!(fp.stable_hash.is_none());
        assert_eq!(fp.identity(), "abc");
    }
}
