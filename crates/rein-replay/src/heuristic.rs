//! Recognizing transient menus during replay.
//!
//! Dropdowns often close between the recorded timing and the replay timing,
//! so an item click fails with "element not found". When the failing element
//! looks like a menu item and the previous recorded step looks like the menu
//! opener, the engine re-runs the opener once before retrying.

use rein_core::ElementFingerprint;

/// Decides what counts as a menu opener and a menu item. Site conventions
/// vary, so this is pluggable.
pub trait MenuHeuristic: Send + Sync {
    fn is_menu_opener(&self, element: &ElementFingerprint) -> bool;

    fn is_menu_item(&self, element: &ElementFingerprint) -> bool;
}

/// Never reopens anything.
pub struct NoMenuHeuristic;

impl MenuHeuristic for NoMenuHeuristic {
    fn is_menu_opener(&self, _element: &ElementFingerprint) -> bool {
        false
    }

    fn is_menu_item(&self, _element: &ElementFingerprint) -> bool {
        false
    }
}

/// ARIA semantics first, then common class-name conventions.
#[derive(Debug, Clone)]
pub struct DefaultMenuHeuristic {
    pub opener_classes: Vec<String>,
    pub item_classes: Vec<String>,
}

impl Default for DefaultMenuHeuristic {
    fn default() -> Self {
        Self {
            opener_classes: ["dropdown-toggle", "menu-trigger", "menu-button", "select-trigger"]
                .map(String::from)
                .to_vec(),
            item_classes: ["dropdown-item", "menu-item", "menuitem", "select-option"]
                .map(String::from)
                .to_vec(),
        }
    }
}

const ITEM_ROLES: &[&str] = &["menuitem", "menuitemcheckbox", "menuitemradio", "option"];

fn has_class(element: &ElementFingerprint, wanted: &[String]) -> bool {
    element.attribute("class").is_some_and(|class| {
        class
            .split_whitespace()
            .any(|token| wanted.iter().any(|w| token.eq_ignore_ascii_case(w)))
    })
}

impl MenuHeuristic for DefaultMenuHeuristic {
    fn is_menu_opener(&self, element: &ElementFingerprint) -> bool {
        if let Some(popup) = element.attribute("aria-haspopup")
            && popup != "false"
        {
            return true;
        }
        element.attribute("aria-expanded").is_some()
            || element.attribute("role") == Some("combobox")
            || element.node_tag == "summary"
            || has_class(element, &self.opener_classes)
    }

    fn is_menu_item(&self, element: &ElementFingerprint) -> bool {
        element
            .attribute("role")
            .is_some_and(|role| ITEM_ROLES.contains(&role))
            || element.node_tag == "option"
            || has_class(element, &self.item_classes)
    }
}
