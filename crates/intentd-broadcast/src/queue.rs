//! Broadcast queues.
//!
//! Five queues carry broadcasts, selected by intent flag bits computed once
//! per send. Each queue owns an ordered lane and a parallel lane and is
//! drained by its own worker task, so ordering is guaranteed only within a
//! queue. The boot queue is special: once its last receiver finishes it
//! retires and leaves the rotation for good.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::endpoint::EndpointId;
use crate::record::BroadcastRecord;

/// The five dispatch queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    /// User-visible broadcasts; drained with precedence.
    Foreground = 0,
    /// Default queue.
    Background = 1,
    /// Slow, system-wide broadcasts (connectivity, package changes, power).
    LongTime = 2,
    /// Broadcasts originated by non-system apps.
    NonSystemApp = 3,
    /// One-shot queue for the boot-completed wave.
    Booting = 4,
}

impl QueueKind {
    pub const ALL: [QueueKind; 5] = [
        QueueKind::Foreground,
        QueueKind::Background,
        QueueKind::LongTime,
        QueueKind::NonSystemApp,
        QueueKind::Booting,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Foreground => "foreground",
            QueueKind::Background => "background",
            QueueKind::LongTime => "longtime",
            QueueKind::NonSystemApp => "nonsysapp",
            QueueKind::Booting => "booting",
        }
    }
}

/// One-shot lifecycle of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLifecycle {
    Active,
    /// The boot queue after its last receiver finished. A retired queue
    /// accepts no new records and its flag no longer routes.
    Retired,
}

/// The ordered receiver currently awaiting acknowledgment.
#[derive(Debug)]
pub struct InFlight {
    pub record_id: Uuid,
    pub endpoint: EndpointId,
    pub since: Instant,
}

/// State of one queue: two lanes plus the in-flight cursor.
#[derive(Debug)]
pub struct QueueState {
    pub kind: QueueKind,
    pub lifecycle: QueueLifecycle,
    pub parallel: VecDeque<BroadcastRecord>,
    pub ordered: VecDeque<BroadcastRecord>,
    pub in_flight: Option<InFlight>,
}

impl QueueState {
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            lifecycle: QueueLifecycle::Active,
            parallel: VecDeque::new(),
            ordered: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.parallel.is_empty() && self.ordered.is_empty() && self.in_flight.is_none()
    }

    pub fn enqueue_parallel(&mut self, record: BroadcastRecord) {
        tracing::debug!(
            queue = self.kind.name(),
            intent = %record.intent,
            receivers = record.receivers.len(),
            "enqueueing parallel broadcast"
        );
        self.parallel.push_back(record);
    }

    pub fn enqueue_ordered(&mut self, record: BroadcastRecord) {
        tracing::debug!(
            queue = self.kind.name(),
            intent = %record.intent,
            receivers = record.receivers.len(),
            pending = self.ordered.len(),
            "enqueueing ordered broadcast"
        );
        self.ordered.push_back(record);
    }

    /// Replace a pending parallel record whose intent is filter-equal for
    /// the same user; the record is handed back when nothing matched.
    pub fn replace_parallel(&mut self, record: BroadcastRecord) -> std::result::Result<(), BroadcastRecord> {
        Self::replace_in(&mut self.parallel, record)
    }

    /// Replace a pending ordered record whose intent is filter-equal for
    /// the same user; the record is handed back when nothing matched.
    /// A head record whose dispatch has begun is never replaced.
    pub fn replace_ordered(&mut self, record: BroadcastRecord) -> std::result::Result<(), BroadcastRecord> {
        let head_busy = self.in_flight.is_some()
            || self.ordered.front().is_some_and(|r| r.dispatch_time.is_some());
        let start = usize::from(head_busy);
        let lane = &mut self.ordered;
        for i in start..lane.len() {
            if lane[i].user_id == record.user_id && lane[i].intent.filter_equals(&record.intent) {
                tracing::debug!(intent = %record.intent, "replacing pending ordered broadcast");
                lane[i] = record;
                return Ok(());
            }
        }
        Err(record)
    }

    fn replace_in(
        lane: &mut VecDeque<BroadcastRecord>,
        record: BroadcastRecord,
    ) -> std::result::Result<(), BroadcastRecord> {
        for existing in lane.iter_mut() {
            if existing.user_id == record.user_id && existing.intent.filter_equals(&record.intent) {
                tracing::debug!(intent = %record.intent, "replacing pending parallel broadcast");
                *existing = record;
                return Ok(());
            }
        }
        Err(record)
    }
}
