//! Re-resolving a recorded element fingerprint against a live element set.

use serde::{Deserialize, Serialize};
use tracing::debug;

use rein_core::{DomElement, ElementFingerprint, ReinError, Result};

/// Attributes that identify an element on their own when their value is
/// unique on the page.
const IDENTIFYING_ATTRIBUTES: &[&str] = &["name", "id", "aria-label"];

/// How many same-tag candidates a failed match lists.
const MAX_CANDIDATES: usize = 10;

/// The cascade level that produced a match, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    Exact,
    Stable,
    XPath,
    NameAndTag,
    UniqueAttribute,
}

#[derive(Debug, Clone, Copy)]
pub struct ElementMatch<'a> {
    pub element: &'a DomElement,
    pub level: MatchLevel,
}

/// Find the live element a recorded fingerprint refers to.
///
/// Levels are tried in order and the first hit wins:
/// exact hash, stable hash, xpath, accessible name plus tag, then a unique
/// `name`/`id`/`aria-label` value. Never guesses: when nothing matches the
/// error lists the live elements with the same tag.
pub fn resolve<'a>(
    fingerprint: &ElementFingerprint,
    elements: &'a [DomElement],
) -> Result<ElementMatch<'a>> {
    let live: Vec<(&DomElement, ElementFingerprint)> =
        elements.iter().map(|e| (e, e.fingerprint())).collect();

    let found = by_hash(fingerprint, &live, |fp| Some(fp.exact_hash.as_str()))
        .map(|e| (e, MatchLevel::Exact))
        .or_else(|| {
            fingerprint.stable_hash.as_ref()?;
            by_hash(fingerprint, &live, |fp| fp.stable_hash.as_deref())
                .map(|e| (e, MatchLevel::Stable))
        })
        .or_else(|| {
            elements
                .iter()
                .find(|e| e.xpath == fingerprint.xpath)
                .map(|e| (e, MatchLevel::XPath))
        })
        .or_else(|| {
            if fingerprint.accessible_name.is_empty() {
                return None;
            }
            elements
                .iter()
                .find(|e| {
                    e.tag == fingerprint.node_tag && e.accessible_name == fingerprint.accessible_name
                })
                .map(|e| (e, MatchLevel::NameAndTag))
        })
        .or_else(|| unique_attribute_match(fingerprint, elements).map(|e| (e, MatchLevel::UniqueAttribute)));

    match found {
        Some((element, level)) => {
            debug!(?level, index = element.index, xpath = %element.xpath, "resolved element");
            Ok(ElementMatch { element, level })
        }
        None => Err(ReinError::ElementNotFound(describe_miss(fingerprint, elements))),
    }
}

/// The live element whose hash (picked by `key`) equals the recorded one.
/// Identical siblings share a hash, so the one at the recorded xpath wins.
fn by_hash<'a>(
    fingerprint: &ElementFingerprint,
    live: &[(&'a DomElement, ElementFingerprint)],
    key: impl Fn(&ElementFingerprint) -> Option<&str>,
) -> Option<&'a DomElement> {
    let wanted = key(fingerprint)?;
    let mut hits = live
        .iter()
        .filter(|(_, fp)| key(fp) == Some(wanted))
        .map(|(e, _)| *e);
    let first = hits.next()?;
    if first.xpath == fingerprint.xpath {
        return Some(first);
    }
    Some(hits.find(|e| e.xpath == fingerprint.xpath).unwrap_or(first))
}

fn unique_attribute_match<'a>(
    fingerprint: &ElementFingerprint,
    elements: &'a [DomElement],
) -> Option<&'a DomElement> {
    IDENTIFYING_ATTRIBUTES.iter().find_map(|key| {
        let wanted = fingerprint.attribute(key).filter(|v| !v.is_empty())?;
        let mut hits = elements
            .iter()
            .filter(|e| e.attributes.get(*key).map(String::as_str) == Some(wanted));
        match (hits.next(), hits.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    })
}

fn describe_miss(fingerprint: &ElementFingerprint, elements: &[DomElement]) -> String {
    let same_tag: Vec<&DomElement> = elements
        .iter()
        .filter(|e| e.tag == fingerprint.node_tag)
        .collect();
    let mut message = format!(
        "no live match for <{}> '{}' at {}",
        fingerprint.node_tag, fingerprint.accessible_name, fingerprint.xpath
    );
    if same_tag.is_empty() {
        message.push_str(&format!("; the page has no <{}> elements", fingerprint.node_tag));
        return message;
    }
    message.push_str(&format!("; {} <{}> candidates:", same_tag.len(), fingerprint.node_tag));
    for e in same_tag.iter().take(MAX_CANDIDATES) {
        message.push_str(&format!("\n  [{}] '{}' {}", e.index, e.accessible_name, e.xpath));
    }
    if same_tag.len() > MAX_CANDIDATES {
        message.push_str(&format!("\n  ... and {} more", same_tag.len() - MAX_CANDIDATES));
    }
    message
}
