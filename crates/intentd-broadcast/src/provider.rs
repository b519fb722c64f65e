//! Package-info provider seam.
//!
//! The dispatcher needs four facts it does not own: application info for a
//! package, the manifest-declared receivers matching an intent, per-user
//! debugging restrictions, and permission grants. In production these live
//! behind IPC in the package service; here they sit behind
//! [`PackageProvider`].
//!
//! Calls may block (they are documented as such and the dispatcher invokes
//! them sparingly, memoizing uid classifications). A provider error is
//! never fatal to dispatch: callers treat it as an empty result and log a
//! warning.

use bitflags::bitflags;
use intentd_intent::{ComponentName, Intent, UserId};
use serde::{Deserialize, Serialize};

/// A provider call failed to reach its backing service.
#[derive(Debug, thiserror::Error)]
#[error("package provider unavailable: {reason}")]
pub struct ProviderError {
    pub reason: String,
}

impl ProviderError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Minimal application facts the dispatcher consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub package: String,
    pub uid: u32,
    /// Whether the package is part of the system image.
    pub system: bool,
}

bitflags! {
    /// Flags on a manifest-declared receiver component.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ComponentFlags: u32 {
        /// Only instantiated for the primary user.
        const PRIMARY_USER_ONLY = 0x0000_0001;
        /// One instance serves all users; de-duplicated across user scans.
        const SINGLE_USER = 0x0000_0002;
    }
}

/// A manifest-declared receiver resolved for an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    pub component: ComponentName,
    pub priority: i32,
    pub flags: ComponentFlags,
    pub owning_user: UserId,
}

/// Facts the dispatcher queries from the package service.
pub trait PackageProvider: Send + Sync + 'static {
    /// Application info for `package` as seen by `user`.
    fn application_info(
        &self,
        package: &str,
        user: UserId,
    ) -> Result<Option<ApplicationInfo>, ProviderError>;

    /// Manifest-declared receivers matching `intent` for `user`.
    fn query_intent_receivers(
        &self,
        intent: &Intent,
        resolved_type: Option<&str>,
        user: UserId,
    ) -> Result<Vec<ResolvedComponent>, ProviderError>;

    /// Whether `user` is barred from debugging features (shell-driven
    /// broadcasts skip such users).
    fn has_debugging_restriction(&self, user: UserId) -> Result<bool, ProviderError>;

    /// Whether the process `pid`/`uid` holds `permission`.
    fn check_permission(&self, permission: &str, pid: u32, uid: u32) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory provider
// ---------------------------------------------------------------------------

/// Table-backed [`PackageProvider`] for tests and embedding without a real
/// package service.
#[derive(Debug, Default)]
pub struct InMemoryPackageProvider {
    apps: Vec<ApplicationInfo>,
    receivers: Vec<(String, ResolvedComponent)>,
    restricted_users: Vec<UserId>,
    permissions: Vec<(String, u32)>,
}

impl InMemoryPackageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(mut self, package: impl Into<String>, uid: u32, system: bool) -> Self {
        self.apps.push(ApplicationInfo { package: package.into(), uid, system });
        self
    }

    /// Declare a manifest receiver for `action`.
    pub fn with_receiver(
        mut self,
        action: impl Into<String>,
        component: ComponentName,
        priority: i32,
        flags: ComponentFlags,
        owning_user: UserId,
    ) -> Self {
        self.receivers.push((
            action.into(),
            ResolvedComponent { component, priority, flags, owning_user },
        ));
        self
    }

    pub fn with_restricted_user(mut self, user: UserId) -> Self {
        self.restricted_users.push(user);
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>, uid: u32) -> Self {
        self.permissions.push((permission.into(), uid));
        self
    }
}

impl PackageProvider for InMemoryPackageProvider {
    fn application_info(
        &self,
        package: &str,
        _user: UserId,
    ) -> Result<Option<ApplicationInfo>, ProviderError> {
        Ok(self.apps.iter().find(|a| a.package == package).cloned())
    }

    fn query_intent_receivers(
        &self,
        intent: &Intent,
        _resolved_type: Option<&str>,
        user: UserId,
    ) -> Result<Vec<ResolvedComponent>, ProviderError> {
        let Some(action) = intent.action.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(self
            .receivers
            .iter()
            .filter(|(a, rc)| {
                a == action && (rc.owning_user == user || rc.flags.contains(ComponentFlags::SINGLE_USER))
            })
            .map(|(_, rc)| ResolvedComponent { owning_user: user, ..rc.clone() })
            .collect())
    }

    fn has_debugging_restriction(&self, user: UserId) -> Result<bool, ProviderError> {
        Ok(self.restricted_users.contains(&user))
    }

    fn check_permission(&self, permission: &str, _pid: u32, uid: u32) -> bool {
        self.permissions.iter().any(|(p, u)| p == permission && *u == uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentd_intent::USER_OWNER;

    #[test]
    fn in_memory_provider_lookups() {
        let provider = InMemoryPackageProvider::new()
            .with_app("com.example.app", 10_001, false)
            .with_app("com.vendor.core", 1000, true)
            .with_permission("intentd.permission.BROADCAST_STICKY", 1000);

        let info = provider.application_info("com.vendor.core", USER_OWNER).unwrap().unwrap();
        assert!(info.system);
        assert!(provider.application_info("com.absent", USER_OWNER).unwrap().is_none());

        assert!(provider.check_permission("intentd.permission.BROADCAST_STICKY", 1, 1000));
        assert!(!provider.check_permission("intentd.permission.BROADCAST_STICKY", 1, 10_001));
    }

    #[test]
    fn receiver_query_scopes_by_user() {
        let provider = InMemoryPackageProvider::new()
            .with_receiver(
                "intentd.action.SYNC",
                ComponentName::new("com.a", "SyncReceiver"),
                0,
                ComponentFlags::empty(),
                USER_OWNER,
            )
            .with_receiver(
                "intentd.action.SYNC",
                ComponentName::new("com.b", "GlobalReceiver"),
                0,
                ComponentFlags::SINGLE_USER,
                USER_OWNER,
            );

        let intent = Intent::new("intentd.action.SYNC");
        let owner = provider.query_intent_receivers(&intent, None, USER_OWNER).unwrap();
        assert_eq!(owner.len(), 2);

        // The non-single-user receiver does not resolve for user 10.
        let secondary = provider.query_intent_receivers(&intent, None, 10).unwrap();
        assert_eq!(secondary.len(), 1);
        assert_eq!(secondary[0].component.package, "com.b");
    }
}
