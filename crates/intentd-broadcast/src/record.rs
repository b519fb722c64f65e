//! Broadcast records.
//!
//! A [`BroadcastRecord`] is the delivery state of one broadcast: the
//! intent, its caller, the merged receiver list, and the cursor and result
//! state that advance as ordered delivery walks the list. Records are
//! created by `broadcast_intent`, live on exactly one queue, and retire
//! when their receiver list is exhausted or canceled.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use intentd_intent::{Extras, Intent, UserId};
use uuid::Uuid;

use crate::endpoint::ReceiverEndpoint;
use crate::filter::BroadcastFilter;
use crate::provider::ResolvedComponent;
use crate::queue::QueueKind;

/// One entry in a record's receiver list.
#[derive(Debug, Clone)]
pub enum Receiver {
    /// A dynamically registered filter.
    Registered(Arc<BroadcastFilter>),
    /// A manifest-declared component.
    Component(ResolvedComponent),
}

impl Receiver {
    pub fn priority(&self) -> i32 {
        match self {
            Receiver::Registered(filter) => filter.priority(),
            Receiver::Component(component) => component.priority,
        }
    }
}

/// Identity of the process that sent a broadcast.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Resolved caller app, when the sender has an attached process record.
    pub app: Option<Arc<CallerApp>>,
    /// Claimed package of the sender.
    pub package: Option<String>,
    pub pid: u32,
    pub uid: u32,
    /// Whether the send originates inside the system server itself.
    pub from_system: bool,
}

/// The attached process record of a caller.
#[derive(Debug, Clone)]
pub struct CallerApp {
    pub package: String,
    pub uid: u32,
    /// Whether the app is part of the system image.
    pub system: bool,
}

impl Caller {
    /// A send from the system server.
    pub fn system() -> Self {
        Self {
            app: None,
            package: None,
            pid: 0,
            uid: intentd_intent::user::SYSTEM_UID,
            from_system: true,
        }
    }

    /// A send from an attached app process.
    pub fn app(package: impl Into<String>, pid: u32, uid: u32, system: bool) -> Self {
        let package = package.into();
        Self {
            app: Some(Arc::new(CallerApp { package: package.clone(), uid, system })),
            package: Some(package),
            pid,
            uid,
            from_system: false,
        }
    }

    /// A send with no attached process record (a pending-intent send).
    pub fn unattached(package: Option<String>, pid: u32, uid: u32) -> Self {
        Self { app: None, package, pid, uid, from_system: false }
    }
}

/// Per-send options of `broadcast_intent`.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    /// Deliver receivers one at a time, in priority order.
    pub ordered: bool,
    /// Retain the intent for future registrants.
    pub sticky: bool,
    /// Permission a receiver must hold to observe this broadcast.
    pub required_permission: Option<String>,
    /// Pre-resolved MIME type of the intent data.
    pub resolved_type: Option<String>,
    /// Target user, or `USER_ALL`.
    pub user_id: UserId,
}

/// Delivery state of one broadcast.
#[derive(Debug)]
pub struct BroadcastRecord {
    pub id: Uuid,
    pub queue: QueueKind,
    pub intent: Intent,
    pub caller_package: Option<String>,
    pub caller_pid: u32,
    pub caller_uid: i64,
    pub resolved_type: Option<String>,
    pub required_permission: Option<String>,
    /// Merged receiver list, highest priority first for ordered delivery.
    pub receivers: Vec<Receiver>,
    /// Index of the next receiver to dispatch.
    pub next_receiver: usize,
    pub ordered: bool,
    pub sticky: bool,
    /// Replay of a retained sticky to a single new registrant.
    pub initial_sticky: bool,
    pub user_id: UserId,
    /// Result callback for ordered broadcasts.
    pub result_to: Option<ReceiverEndpoint>,
    pub result_code: i32,
    pub result_data: Option<String>,
    pub result_extras: Option<Extras>,
    /// Set when a receiver aborted the chain; remaining receivers are
    /// skipped but the result callback still fires.
    pub result_abort: bool,
    pub enqueue_time: DateTime<Utc>,
    pub dispatch_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl BroadcastRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: QueueKind,
        intent: Intent,
        caller: &Caller,
        options: &BroadcastOptions,
        receivers: Vec<Receiver>,
        result_to: Option<ReceiverEndpoint>,
        result_code: i32,
        result_data: Option<String>,
        result_extras: Option<Extras>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            queue,
            intent,
            caller_package: caller.package.clone(),
            caller_pid: caller.pid,
            caller_uid: caller.uid as i64,
            resolved_type: options.resolved_type.clone(),
            required_permission: options.required_permission.clone(),
            receivers,
            next_receiver: 0,
            ordered: options.ordered,
            sticky: options.sticky,
            initial_sticky: false,
            user_id: options.user_id,
            result_to,
            result_code,
            result_data,
            result_extras,
            result_abort: false,
            enqueue_time: Utc::now(),
            dispatch_time: None,
            finish_time: None,
        }
    }

    /// A sticky replay record addressed at exactly one new registrant.
    pub fn sticky_replay(queue: QueueKind, intent: Intent, receiver: Receiver) -> Self {
        Self {
            id: Uuid::now_v7(),
            queue,
            intent,
            caller_package: None,
            caller_pid: 0,
            caller_uid: -1,
            resolved_type: None,
            required_permission: None,
            receivers: vec![receiver],
            next_receiver: 0,
            ordered: false,
            sticky: true,
            initial_sticky: true,
            user_id: intentd_intent::USER_ALL,
            result_to: None,
            result_code: 0,
            result_data: None,
            result_extras: None,
            result_abort: false,
            enqueue_time: Utc::now(),
            dispatch_time: None,
            finish_time: None,
        }
    }

    /// Whether every receiver has been dispatched (or skipped).
    pub fn exhausted(&self) -> bool {
        self.next_receiver >= self.receivers.len()
    }
}
