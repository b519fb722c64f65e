//! Broadcast history rings.
//!
//! Bounded record of recently finished broadcasts, kept for dump output
//! and post-mortem debugging. Two rings: full summaries of finished
//! records, and a longer intent-only ring.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use intentd_intent::Intent;
use serde::Serialize;

use crate::queue::QueueKind;
use crate::record::BroadcastRecord;

/// Retained facts about one finished broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedBroadcast {
    pub queue: QueueKind,
    pub intent: String,
    pub caller_uid: i64,
    pub receiver_count: usize,
    pub result_code: i32,
    pub aborted: bool,
    pub enqueue_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct BroadcastHistory {
    records: VecDeque<FinishedBroadcast>,
    summaries: VecDeque<Intent>,
    record_capacity: usize,
    summary_capacity: usize,
}

impl BroadcastHistory {
    pub fn new(record_capacity: usize, summary_capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(record_capacity),
            summaries: VecDeque::with_capacity(summary_capacity),
            record_capacity,
            summary_capacity,
        }
    }

    /// Record a finished broadcast. Sticky replays to new registrants are
    /// ignored; they carry no caller.
    pub fn add(&mut self, record: &BroadcastRecord) {
        if record.caller_uid < 0 {
            return;
        }
        if self.records.len() == self.record_capacity {
            self.records.pop_back();
        }
        self.records.push_front(FinishedBroadcast {
            queue: record.queue,
            intent: record.intent.to_short_string(),
            caller_uid: record.caller_uid,
            receiver_count: record.receivers.len(),
            result_code: record.result_code,
            aborted: record.result_abort,
            enqueue_time: record.enqueue_time,
            finish_time: record.finish_time,
        });

        if self.summaries.len() == self.summary_capacity {
            self.summaries.pop_back();
        }
        self.summaries.push_front(record.intent.clone());
    }

    pub fn records(&self) -> impl Iterator<Item = &FinishedBroadcast> {
        self.records.iter()
    }

    pub fn summaries(&self) -> impl Iterator<Item = &Intent> {
        self.summaries.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BroadcastOptions, Caller, BroadcastRecord};

    fn finished(action: &str) -> BroadcastRecord {
        let mut r = BroadcastRecord::new(
            QueueKind::Background,
            Intent::new(action),
            &Caller::system(),
            &BroadcastOptions::default(),
            Vec::new(),
            None,
            0,
            None,
            None,
        );
        r.finish_time = Some(Utc::now());
        r
    }

    #[test]
    fn newest_first_and_bounded() {
        let mut history = BroadcastHistory::new(2, 4);
        for i in 0..3 {
            history.add(&finished(&format!("action.{i}")));
        }
        let intents: Vec<_> = history.records().map(|r| r.intent.clone()).collect();
        assert_eq!(intents.len(), 2);
        assert!(intents[0].contains("action.2"));
        assert!(intents[1].contains("action.1"));
        // Summary ring is longer.
        assert_eq!(history.summaries().count(), 3);
    }

    #[test]
    fn sticky_replays_are_not_recorded() {
        let mut history = BroadcastHistory::new(4, 4);
        let mut r = finished("any");
        r.caller_uid = -1;
        history.add(&r);
        assert!(history.is_empty());
    }
}
