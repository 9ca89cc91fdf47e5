//! Page lifecycle tracking used to decide when a navigation has settled.

use std::collections::VecDeque;
use std::time::Instant;
use url::Url;

/// Lifecycle names that count as "the page is usable".
pub const READY_EVENTS: &[&str] = &["networkIdle", "load"];

/// One `Page.lifecycleEvent` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub name: String,
    pub loader_id: String,
    pub frame_id: String,
    pub at: Instant,
}

impl LifecycleEvent {
    pub fn is_ready(&self) -> bool {
        READY_EVENTS.contains(&self.name.as_str())
    }
}

/// Result of waiting for a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationReadiness {
    /// A ready event arrived; carries its name.
    Settled(String),
    /// The domain-aware timeout elapsed first. The page may still be usable.
    TimedOut,
}

impl NavigationReadiness {
    pub fn is_settled(&self) -> bool {
        matches!(self, NavigationReadiness::Settled(_))
    }
}

/// Bounded per-session buffer of recent lifecycle events.
#[derive(Debug)]
pub struct LifecycleBuffer {
    events: VecDeque<LifecycleEvent>,
    capacity: usize,
}

impl LifecycleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: LifecycleEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The first ready event for `loader_id`. With no loader id (same-document
    /// navigations report none) any ready event after `since` counts.
    pub fn ready_for(&self, loader_id: Option<&str>, since: Instant) -> Option<&LifecycleEvent> {
        self.events.iter().find(|e| {
            e.is_ready()
                && match loader_id {
                    Some(id) => e.loader_id == id,
                    None => e.at >= since,
                }
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Whether two URLs share scheme, host and port. Unparseable URLs are
/// treated as cross-origin, which only lengthens the wait.
pub fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin() && a.origin().is_tuple(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, loader: &str) -> LifecycleEvent {
        LifecycleEvent {
            name: name.into(),
            loader_id: loader.into(),
            frame_id: "F".into(),
            at: Instant::now(),
        }
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut buf = LifecycleBuffer::new(2);
        buf.push(event("init", "L1"));
        buf.push(event("DOMContentLoaded", "L1"));
        buf.push(event("load", "L1"));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_ready_for_loader() {
        let start = Instant::now();
        let mut buf = LifecycleBuffer::new(10);
        buf.push(event("load", "OLD"));
        buf.push(event("DOMContentLoaded", "NEW"));
        assert!(buf.ready_for(Some("NEW"), start).is_none());
        buf.push(event("networkIdle", "NEW"));
        assert_eq!(buf.ready_for(Some("NEW"), start).unwrap().name, "networkIdle");
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin("https://a.test/x", "https://a.test/y?q=1"));
        assert!(!same_origin("https://a.test/", "https://b.test/"));
        assert!(!same_origin("http://a.test/", "https://a.test/"));
        assert!(!same_origin("about:blank", "about:blank"));
    }
}
