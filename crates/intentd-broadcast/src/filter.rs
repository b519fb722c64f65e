//! Registered receivers.
//!
//! A [`BroadcastFilter`] is one [`IntentFilter`] registration: the filter
//! plus the endpoint, package, permission, and user that own it. A
//! [`ReceiverList`] groups every filter registered by one endpoint, and is
//! the unit removed when that endpoint closes or unregisters.

use std::sync::Arc;

use intentd_intent::{IntentFilter, UserId};
use uuid::Uuid;

use crate::endpoint::{EndpointId, ReceiverEndpoint};

/// One registered intent filter and its ownership facts.
#[derive(Debug)]
pub struct BroadcastFilter {
    /// The matching rules.
    pub filter: IntentFilter,
    /// The endpoint this filter delivers to.
    pub receiver_id: EndpointId,
    /// Package that registered the filter.
    pub package: Option<String>,
    /// Permission a *sender* must hold for its broadcast to reach this
    /// receiver.
    pub required_permission: Option<String>,
    /// Uid of the registering process.
    pub owning_uid: u32,
    /// User the registration belongs to (`USER_ALL` for system singletons).
    pub owning_user: UserId,
    /// Whether the registering package is part of the system image.
    pub system: bool,
}

impl BroadcastFilter {
    pub fn priority(&self) -> i32 {
        self.filter.priority
    }
}

/// Every filter registered by a single endpoint.
///
/// Identity facts (pid/uid/user) are pinned by the first registration;
/// later registrations through the same endpoint must agree.
#[derive(Debug)]
pub struct ReceiverList {
    pub endpoint_id: EndpointId,
    /// Sending half used for deliveries to this endpoint.
    pub sender: ReceiverEndpoint,
    pub pid: u32,
    pub uid: u32,
    pub user_id: UserId,
    pub filters: Vec<Arc<BroadcastFilter>>,
    /// Ordered broadcast currently awaiting this endpoint's acknowledgment.
    pub cur_broadcast: Option<Uuid>,
}

impl ReceiverList {
    pub fn new(sender: ReceiverEndpoint, pid: u32, uid: u32, user_id: UserId) -> Self {
        Self {
            endpoint_id: sender.id(),
            sender,
            pid,
            uid,
            user_id,
            filters: Vec::new(),
            cur_broadcast: None,
        }
    }
}
