use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use rein_core::{DomElement, PageObservation, ReinError, Result};

use crate::browser::BrowserContext;

/// Produces the page view the decision backend sees.
///
/// Implementations must either return a real observation or fail; an empty
/// placeholder that looks valid is never acceptable.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn observe(&self, browser: &dyn BrowserContext) -> Result<PageObservation>;
}

/// Collects interactive elements straight from the DOM with one script.
pub struct DomObserver {
    max_elements: usize,
    max_text_chars: usize,
}

impl Default for DomObserver {
    fn default() -> Self {
        Self {
            max_elements: 300,
            max_text_chars: 20_000,
        }
    }
}

#[derive(Deserialize)]
struct RawElement {
    tag: String,
    xpath: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct RawObservation {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
    elements: Vec<RawElement>,
}

const OBSERVE_SCRIPT: &str = r#"
    const selectors = 'a, button, input, select, textarea, summary, [role], [onclick], [tabindex], [aria-haspopup], [contenteditable="true"]';
    const xpathOf = (node) => {
        const parts = [];
        for (let el = node; el && el.nodeType === 1; el = el.parentElement) {
            let i = 1;
            for (let s = el.previousElementSibling; s; s = s.previousElementSibling) {
                if (s.tagName === el.tagName) i++;
            }
            parts.unshift(el.tagName.toLowerCase() + '[' + i + ']');
        }
        return '/' + parts.join('/');
    };
    const elements = [];
    for (const el of document.querySelectorAll(selectors)) {
        const rect = el.getBoundingClientRect();
        if (rect.width === 0 && rect.height === 0) continue;
        const attributes = {};
        for (const a of el.attributes) {
            if (a.value.length <= 200) attributes[a.name] = a.value;
        }
        const name = (el.getAttribute('aria-label') || el.innerText || el.value ||
            el.placeholder || el.title || el.alt || '').trim().slice(0, 120);
        elements.push({ tag: el.tagName.toLowerCase(), xpath: xpathOf(el), attributes, name });
        if (elements.length >= MAX_ELEMENTS) break;
    }
    return {
        url: location.href,
        title: document.title,
        text: (document.body ? document.body.innerText : '').slice(0, MAX_TEXT),
        elements,
    };
"#;

impl DomObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_elements: usize, max_text_chars: usize) -> Self {
        Self {
            max_elements,
            max_text_chars,
        }
    }

    fn script(&self) -> String {
        let body = OBSERVE_SCRIPT
            .replace("MAX_ELEMENTS", &self.max_elements.to_string())
            .replace("MAX_TEXT", &self.max_text_chars.to_string());
        format!("(() => {{{body}}})()")
    }
}

#[async_trait]
impl Observer for DomObserver {
    async fn observe(&self, browser: &dyn BrowserContext) -> Result<PageObservation> {
        let raw = browser
            .evaluate(&self.script())
            .await
            .map_err(|e| ReinError::ObservationFailed(e.to_string()))?;
        if raw.is_null() {
            return Err(ReinError::ObservationFailed(
                "page returned no observation".into(),
            ));
        }
        let raw: RawObservation = serde_json::from_value(raw)
            .map_err(|e| ReinError::ObservationFailed(format!("invalid observation: {e}")))?;

        let elements: Vec<DomElement> = raw
            .elements
            .into_iter()
            .enumerate()
            .map(|(i, e)| DomElement {
                index: i as u32,
                tag: e.tag.to_lowercase(),
                xpath: e.xpath,
                attributes: e.attributes,
                accessible_name: e.name,
            })
            .collect();
        debug!(url = %raw.url, elements = elements.len(), "observed page");

        Ok(PageObservation {
            target_id: browser.focused_target(),
            url: raw.url,
            title: raw.title,
            elements,
            text: raw.text,
        })
    }
}
