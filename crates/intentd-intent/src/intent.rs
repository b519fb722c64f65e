//! The [`Intent`] type: an addressed message.
//!
//! An intent names an abstract operation (`action`), optionally addressed
//! at a concrete component, carrying a data URI, a MIME type, categories,
//! a flag word, and a typed extras payload.
//!
//! Intents are immutable-ish: senders build them, and only the dispatcher
//! rewrites the queue-control bits of the flag word while routing (see the
//! dispatch crate). Two notions of identity matter:
//!
//! - full equality (`PartialEq`) -- everything including flags and extras;
//! - [`Intent::filter_equals`] -- the identity used for sticky replacement
//!   and replace-pending collapse, which ignores flags and extras.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::extras::Extras;

// ---------------------------------------------------------------------------
// Well-known actions
// ---------------------------------------------------------------------------

/// Action strings with dispatcher-visible semantics.
///
/// The dispatcher routes some of these to dedicated queues and applies
/// self-exclusion rules on the package-change family; everything else is
/// opaque to it.
pub mod actions {
    /// Sent once after the system finishes booting.
    pub const BOOT_COMPLETED: &str = "intentd.action.BOOT_COMPLETED";
    /// A package was installed.
    pub const PACKAGE_ADDED: &str = "intentd.action.PACKAGE_ADDED";
    /// A package was changed (components enabled/disabled).
    pub const PACKAGE_CHANGED: &str = "intentd.action.PACKAGE_CHANGED";
    /// A package was removed.
    pub const PACKAGE_REMOVED: &str = "intentd.action.PACKAGE_REMOVED";
    /// A new version of a package was installed over an existing one.
    pub const PACKAGE_REPLACED: &str = "intentd.action.PACKAGE_REPLACED";
    /// A package's processes were killed and restarted.
    pub const PACKAGE_RESTARTED: &str = "intentd.action.PACKAGE_RESTARTED";
    /// A package's persistent data was cleared.
    pub const PACKAGE_DATA_CLEARED: &str = "intentd.action.PACKAGE_DATA_CLEARED";
    /// Packages on external storage became available.
    pub const EXTERNAL_APPLICATIONS_AVAILABLE: &str =
        "intentd.action.EXTERNAL_APPLICATIONS_AVAILABLE";
    /// External power was connected.
    pub const POWER_CONNECTED: &str = "intentd.action.POWER_CONNECTED";
    /// External power was disconnected.
    pub const POWER_DISCONNECTED: &str = "intentd.action.POWER_DISCONNECTED";
    /// Network connectivity changed.
    pub const CONNECTIVITY_CHANGE: &str = "intentd.action.CONNECTIVITY_CHANGE";
    /// The set of login accounts changed.
    pub const ACCOUNTS_CHANGED: &str = "intentd.action.ACCOUNTS_CHANGED";

    /// Extras key: list of package names affected by
    /// [`EXTERNAL_APPLICATIONS_AVAILABLE`].
    pub const EXTRA_CHANGED_PACKAGE_LIST: &str = "intentd.extra.CHANGED_PACKAGE_LIST";
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

bitflags::bitflags! {
    /// Intent flag word.
    ///
    /// The `RECEIVER_*` bits steer broadcast delivery. `RECEIVER_BOOTING`,
    /// `RECEIVER_LONG_TIME`, and `RECEIVER_NON_SYSTEM_APP` are queue-control
    /// bits owned by the dispatcher: sender-supplied copies are stripped
    /// before routing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct IntentFlags: u32 {
        /// Only deliver to dynamically registered receivers, never to
        /// manifest-declared components.
        const RECEIVER_REGISTERED_ONLY = 0x4000_0000;
        /// A filter-equal broadcast already pending in the same queue is
        /// replaced instead of queueing a second copy.
        const RECEIVER_REPLACE_PENDING = 0x2000_0000;
        /// Deliver on the foreground queue regardless of origin.
        const RECEIVER_FOREGROUND = 0x1000_0000;
        /// Routed to the one-shot boot queue (dispatcher-owned).
        const RECEIVER_BOOTING = 0x0800_0000;
        /// Routed to the long-time queue for slow system-wide broadcasts
        /// (dispatcher-owned).
        const RECEIVER_LONG_TIME = 0x0400_0000;
        /// Routed to the non-system-app queue (dispatcher-owned).
        const RECEIVER_NON_SYSTEM_APP = 0x0200_0000;
        /// The launched activity is excluded from the recents list.
        const ACTIVITY_EXCLUDE_FROM_RECENTS = 0x0080_0000;
    }
}

impl IntentFlags {
    /// The queue-control bits only the dispatcher may set.
    pub const QUEUE_CONTROL: IntentFlags = IntentFlags::RECEIVER_BOOTING
        .union(IntentFlags::RECEIVER_LONG_TIME)
        .union(IntentFlags::RECEIVER_NON_SYSTEM_APP);
}

// ---------------------------------------------------------------------------
// ComponentName
// ---------------------------------------------------------------------------

/// Fully qualified name of a component inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self { package: package.into(), class: class.into() }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// An addressed message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// The abstract operation, e.g. [`actions::PACKAGE_ADDED`].
    pub action: Option<String>,
    /// Data URI the operation applies to, e.g. `package:com.example.app`.
    pub data: Option<String>,
    /// MIME type of the data.
    pub mime_type: Option<String>,
    /// Explicit target component; broadcasts targeting one skip resolution.
    pub component: Option<ComponentName>,
    /// Restrict resolution to a single package.
    pub package: Option<String>,
    /// Categories the target must handle.
    pub categories: BTreeSet<String>,
    /// Flag word; see [`IntentFlags`].
    pub flags: IntentFlags,
    /// Typed payload.
    pub extras: Extras,
}

impl Intent {
    pub fn new(action: impl Into<String>) -> Self {
        Self { action: Some(action.into()), ..Default::default() }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_component(mut self, component: ComponentName) -> Self {
        self.component = Some(component);
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    pub fn with_flags(mut self, flags: IntentFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: crate::ExtraValue) -> Self {
        self.extras.put(key, value);
        self
    }

    pub fn add_flags(&mut self, flags: IntentFlags) {
        self.flags |= flags;
    }

    pub fn clear_flags(&mut self, flags: IntentFlags) {
        self.flags &= !flags;
    }

    /// Scheme of the data URI, if any.
    pub fn scheme(&self) -> Option<&str> {
        self.data.as_deref().and_then(|d| d.split_once(':').map(|(s, _)| s))
    }

    /// Scheme-specific part of the data URI: for `package:com.example.app`
    /// this is `com.example.app`.
    pub fn scheme_specific_part(&self) -> Option<&str> {
        self.data.as_deref().and_then(|d| d.split_once(':').map(|(_, rest)| rest))
    }

    /// Identity used for sticky replacement and replace-pending collapse:
    /// action, data, MIME type, package, component, and categories.
    /// Flags and extras are excluded.
    pub fn filter_equals(&self, other: &Intent) -> bool {
        self.action == other.action
            && self.data == other.data
            && self.mime_type == other.mime_type
            && self.package == other.package
            && self.component == other.component
            && self.categories == other.categories
    }

    /// Compact one-line form for log output.
    pub fn to_short_string(&self) -> String {
        let mut s = String::from("Intent {");
        if let Some(action) = &self.action {
            s.push_str(" act=");
            s.push_str(action);
        }
        if let Some(data) = &self.data {
            s.push_str(" dat=");
            s.push_str(data);
        }
        if let Some(component) = &self.component {
            s.push_str(&format!(" cmp={component}"));
        }
        if !self.flags.is_empty() {
            s.push_str(&format!(" flg={:#x}", self.flags.bits()));
        }
        s.push_str(" }");
        s
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_short_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
