//! Pending intents.
//!
//! A pending intent is a reusable, de-duplicated handle wrapping a
//! deferred send: the owner hands it out, and whoever holds it can later
//! fire the wrapped operation with the owner's identity. De-duplication is
//! structural: two requests with the same [`PendingKey`] share one record.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use intentd_intent::{Intent, UserId};

use crate::dispatcher::BroadcastDispatcher;
use crate::endpoint::ReceiverEndpoint;
use crate::error::{BroadcastError, Result};
use crate::record::{BroadcastOptions, Caller};

bitflags::bitflags! {
    /// Behavior flags of a pending-intent record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PendingFlags: u32 {
        /// The record can be sent exactly once.
        const ONE_SHOT = 0x4000_0000;
        /// Only return an existing record, never create one.
        const NO_CREATE = 0x2000_0000;
        /// Cancel an existing record with the same key before creating.
        const CANCEL_CURRENT = 0x1000_0000;
        /// Replace the template of an existing record with the same key.
        const UPDATE_CURRENT = 0x0800_0000;
        /// Senders cannot fill in any part of the template intent.
        const IMMUTABLE = 0x0400_0000;
    }
}

/// What firing the record does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    StartActivity,
    Broadcast,
    StartService,
    ActivityResult,
}

/// Structural identity of a pending-intent record.
///
/// Equality compares the template intent with
/// [`Intent::filter_equals`]; the hash is computed once at construction
/// over the same fields, so equal keys always collide.
#[derive(Debug, Clone)]
pub struct PendingKey {
    pub kind: PendingKind,
    pub package: String,
    pub request_code: i32,
    pub intent: Option<Intent>,
    pub resolved_type: Option<String>,
    pub flags: PendingFlags,
    pub user_id: UserId,
    hash: u64,
}

impl PendingKey {
    pub fn new(
        kind: PendingKind,
        package: impl Into<String>,
        request_code: i32,
        intent: Option<Intent>,
        resolved_type: Option<String>,
        flags: PendingFlags,
        user_id: UserId,
    ) -> Self {
        let package = package.into();
        let mut hasher = std::hash::DefaultHasher::new();
        kind.hash(&mut hasher);
        package.hash(&mut hasher);
        request_code.hash(&mut hasher);
        resolved_type.hash(&mut hasher);
        flags.bits().hash(&mut hasher);
        user_id.hash(&mut hasher);
        if let Some(intent) = &intent {
            intent.action.hash(&mut hasher);
            intent.data.hash(&mut hasher);
            intent.mime_type.hash(&mut hasher);
            intent.package.hash(&mut hasher);
            intent.component.hash(&mut hasher);
            for category in &intent.categories {
                category.hash(&mut hasher);
            }
        }
        let hash = hasher.finish();
        Self { kind, package, request_code, intent, resolved_type, flags, user_id, hash }
    }
}

impl PartialEq for PendingKey {
    fn eq(&self, other: &Self) -> bool {
        let intents_equal = match (&self.intent, &other.intent) {
            (Some(a), Some(b)) => a.filter_equals(b),
            (None, None) => true,
            _ => false,
        };
        self.kind == other.kind
            && self.package == other.package
            && self.request_code == other.request_code
            && self.resolved_type == other.resolved_type
            && self.flags == other.flags
            && self.user_id == other.user_id
            && intents_equal
    }
}

impl Eq for PendingKey {}

impl Hash for PendingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Seam for the non-broadcast target kinds and for background-execution
/// grants. Activity and service starts live outside this crate.
#[async_trait::async_trait]
pub trait PendingTargets: Send + Sync {
    async fn start_activity(&self, intent: Intent, user_id: UserId) -> Result<()>;
    async fn start_service(&self, intent: Intent, user_id: UserId) -> Result<()>;
    /// Temporarily allow the target uid to execute in the background.
    /// Called before any dispatcher lock is taken.
    fn grant_background_whitelist(&self, uid: u32, duration: Duration);
}

/// One deferred send operation.
#[derive(Debug)]
pub struct PendingIntentRecord {
    pub key: PendingKey,
    /// Uid of the owner whose identity the send carries.
    pub uid: u32,
    /// Grant the target uid background execution for this long per send.
    pub whitelist_duration: Option<Duration>,
    sent: AtomicBool,
    canceled: AtomicBool,
}

impl PendingIntentRecord {
    pub fn new(key: PendingKey, uid: u32) -> Self {
        Self { key, uid, whitelist_duration: None, sent: AtomicBool::new(false), canceled: AtomicBool::new(false) }
    }

    pub fn with_whitelist_duration(mut self, duration: Duration) -> Self {
        self.whitelist_duration = Some(duration);
        self
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Fire the deferred operation.
    ///
    /// The template intent is cloned and, unless the record is immutable,
    /// completed from `fill_in`: empty action/data/type slots are filled
    /// and extras are merged with the template winning conflicts. The
    /// background whitelist (if configured) is granted before the
    /// dispatcher lock is acquired.
    pub async fn send(
        &self,
        dispatcher: &BroadcastDispatcher,
        targets: &dyn PendingTargets,
        fill_in: Option<Intent>,
        result_to: Option<ReceiverEndpoint>,
    ) -> Result<()> {
        if self.is_canceled() {
            return Err(BroadcastError::PendingIntentCanceled);
        }
        if self.key.flags.contains(PendingFlags::ONE_SHOT)
            && self.sent.swap(true, Ordering::AcqRel)
        {
            return Err(BroadcastError::PendingIntentAlreadySent);
        }

        let mut intent = self.key.intent.clone().unwrap_or_default();
        if !self.key.flags.contains(PendingFlags::IMMUTABLE) {
            if let Some(fill_in) = fill_in {
                if intent.action.is_none() {
                    intent.action = fill_in.action;
                }
                if intent.data.is_none() {
                    intent.data = fill_in.data;
                }
                if intent.mime_type.is_none() {
                    intent.mime_type = fill_in.mime_type;
                }
                intent.categories.extend(fill_in.categories);
                intent.extras.merge_keeping_existing(&fill_in.extras);
            }
        }

        if let Some(duration) = self.whitelist_duration {
            targets.grant_background_whitelist(self.uid, duration);
        }

        tracing::debug!(
            kind = ?self.key.kind,
            package = %self.key.package,
            uid = self.uid,
            intent = %intent,
            "sending pending intent"
        );

        match self.key.kind {
            PendingKind::Broadcast => {
                let caller = Caller::unattached(Some(self.key.package.clone()), 0, self.uid);
                dispatcher
                    .broadcast_intent(
                        caller,
                        intent,
                        result_to,
                        BroadcastOptions { user_id: self.key.user_id, ..Default::default() },
                    )
                    .await
            }
            PendingKind::StartActivity | PendingKind::ActivityResult => {
                targets.start_activity(intent, self.key.user_id).await
            }
            PendingKind::StartService => targets.start_service(intent, self.key.user_id).await,
        }
    }
}

/// De-duplicating registry of pending-intent records.
#[derive(Default)]
pub struct PendingIntentRegistry {
    records: DashMap<PendingKey, Arc<PendingIntentRecord>>,
}

impl PendingIntentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key` to a record, honoring the creation-control flags.
    pub fn get_or_create(&self, key: PendingKey, uid: u32) -> Option<Arc<PendingIntentRecord>> {
        if key.flags.contains(PendingFlags::CANCEL_CURRENT) {
            if let Some((_, existing)) = self.records.remove(&key) {
                existing.cancel();
            }
        } else {
            // Clone out of the map guard before any re-insert on the key.
            let existing = self.records.get(&key).map(|entry| Arc::clone(entry.value()));
            if let Some(existing) = existing {
                if key.flags.contains(PendingFlags::UPDATE_CURRENT) {
                    let updated = Arc::new(PendingIntentRecord::new(key.clone(), uid));
                    self.records.insert(key, Arc::clone(&updated));
                    return Some(updated);
                }
                return Some(existing);
            }
        }
        if key.flags.contains(PendingFlags::NO_CREATE) {
            return None;
        }
        let record = Arc::new(PendingIntentRecord::new(key.clone(), uid));
        self.records.insert(key, Arc::clone(&record));
        Some(record)
    }

    /// Cancel and drop the record for `key`.
    pub fn cancel(&self, key: &PendingKey) {
        if let Some((_, record)) = self.records.remove(key) {
            record.cancel();
            tracing::debug!(package = %record.key.package, "pending intent canceled");
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
