//! Intent filters.
//!
//! A receiver registers an [`IntentFilter`] describing what it wants to
//! observe. Matching is structural: actions, categories, data scheme, and
//! MIME type. The `priority` field orders receivers during ordered
//! broadcast delivery (higher first).

use serde::{Deserialize, Serialize};

use crate::intent::Intent;

/// Matching rules registered by a receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentFilter {
    /// Actions this filter accepts. A filter with no actions matches
    /// nothing; broadcast receivers always name their actions.
    pub actions: Vec<String>,
    /// Categories this filter is able to serve.
    pub categories: Vec<String>,
    /// Accepted data URI schemes. Empty accepts any (including none).
    pub schemes: Vec<String>,
    /// Accepted MIME types; `image/*` and `*/*` wildcards are understood.
    pub mime_types: Vec<String>,
    /// Delivery priority for ordered broadcasts, higher first.
    pub priority: i32,
}

impl IntentFilter {
    pub fn new(action: impl Into<String>) -> Self {
        Self { actions: vec![action.into()], ..Default::default() }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.schemes.push(scheme.into());
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_types.push(mime.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    /// Whether `intent` satisfies this filter.
    ///
    /// - The intent's action must be listed (an actionless intent never
    ///   matches).
    /// - Every category carried by the intent must be served by the filter.
    /// - If the filter restricts schemes, the intent's data scheme must be
    ///   listed.
    /// - If the filter restricts MIME types, the intent's type must match
    ///   one of them (wildcard subtypes allowed).
    pub fn matches(&self, intent: &Intent) -> bool {
        match intent.action.as_deref() {
            Some(action) if self.has_action(action) => {}
            _ => return false,
        }

        for category in &intent.categories {
            if !self.categories.iter().any(|c| c == category) {
                return false;
            }
        }

        if !self.schemes.is_empty() {
            match intent.scheme() {
                Some(scheme) if self.schemes.iter().any(|s| s == scheme) => {}
                _ => return false,
            }
        }

        if !self.mime_types.is_empty() {
            match intent.mime_type.as_deref() {
                Some(mime) if self.mime_types.iter().any(|m| mime_matches(m, mime)) => {}
                _ => return false,
            }
        }

        true
    }
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    if pattern == "*/*" || pattern == mime {
        return true;
    }
    match (pattern.split_once('/'), mime.split_once('/')) {
        (Some((ptype, "*")), Some((mtype, _))) => ptype == mtype,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::actions;

    #[test]
    fn action_must_match() {
        let filter = IntentFilter::new(actions::PACKAGE_ADDED);
        assert!(filter.matches(&Intent::new(actions::PACKAGE_ADDED)));
        assert!(!filter.matches(&Intent::new(actions::PACKAGE_REMOVED)));
        assert!(!filter.matches(&Intent::default()));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = IntentFilter::default();
        assert!(!filter.matches(&Intent::new("anything")));
    }

    #[test]
    fn intent_categories_must_all_be_served() {
        let filter = IntentFilter::new("view").with_category("browsable");
        let plain = Intent::new("view");
        let browsable = Intent::new("view").with_category("browsable");
        let exotic = Intent::new("view").with_category("browsable").with_category("car-mode");

        assert!(filter.matches(&plain));
        assert!(filter.matches(&browsable));
        assert!(!filter.matches(&exotic));
    }

    #[test]
    fn scheme_restriction() {
        let filter = IntentFilter::new(actions::PACKAGE_ADDED).with_scheme("package");
        assert!(filter.matches(
            &Intent::new(actions::PACKAGE_ADDED).with_data("package:com.example")
        ));
        assert!(!filter.matches(&Intent::new(actions::PACKAGE_ADDED)));
        assert!(!filter.matches(
            &Intent::new(actions::PACKAGE_ADDED).with_data("content://media/1")
        ));
    }

    #[test]
    fn mime_wildcards() {
        let filter = IntentFilter::new("view").with_mime_type("image/*");
        assert!(filter.matches(&Intent::new("view").with_mime_type("image/png")));
        assert!(!filter.matches(&Intent::new("view").with_mime_type("audio/ogg")));

        let any = IntentFilter::new("view").with_mime_type("*/*");
        assert!(any.matches(&Intent::new("view").with_mime_type("audio/ogg")));
        assert!(!any.matches(&Intent::new("view")));
    }
}
