//! Sticky broadcast store.
//!
//! Retained intents keyed by user, then by action. The `USER_ALL` slot is
//! maintained separately from per-user slots, with one invariant enforced
//! at insert time: an all-user sticky and a per-user sticky that are
//! filter-equal for the same action can never coexist.

use std::collections::HashMap;

use intentd_intent::{Intent, IntentFilter, USER_ALL, UserId};

use crate::error::{BroadcastError, Result};

/// Per-user map of retained sticky intents.
#[derive(Debug, Default)]
pub struct StickyStore {
    by_user: HashMap<UserId, HashMap<String, Vec<Intent>>>,
}

impl StickyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a sticky.
    ///
    /// Fails when the insert would put a per-user sticky next to a
    /// filter-equal all-user one (or vice versa). On success an existing
    /// filter-equal entry for the same user is replaced in place, so each
    /// (user, action, filter-identity) holds at most one intent.
    pub fn upsert(&mut self, intent: &Intent, user: UserId) -> Result<()> {
        let action = intent.action.clone().unwrap_or_default();

        // Cross-scope conflict check: the wildcard slot and every per-user
        // slot must stay disjoint under filter equality.
        let conflicts = if user == USER_ALL {
            self.by_user
                .iter()
                .filter(|(u, _)| **u != USER_ALL)
                .any(|(_, actions)| Self::contains_filter_equal(actions, &action, intent))
        } else {
            self.by_user
                .get(&USER_ALL)
                .is_some_and(|actions| Self::contains_filter_equal(actions, &action, intent))
        };
        if conflicts {
            tracing::warn!(action = %action, user, "sticky broadcast conflicts across user scopes");
            return Err(BroadcastError::StickyConflict { action, user });
        }

        let list = self.by_user.entry(user).or_default().entry(action).or_default();
        match list.iter_mut().find(|existing| intent.filter_equals(existing)) {
            Some(existing) => *existing = intent.clone(),
            None => list.push(intent.clone()),
        }
        Ok(())
    }

    /// Remove the sticky filter-equal to `intent` for `user`, pruning empty
    /// maps behind it.
    pub fn remove(&mut self, intent: &Intent, user: UserId) {
        let action = intent.action.as_deref().unwrap_or_default();
        let Some(actions) = self.by_user.get_mut(&user) else {
            return;
        };
        if let Some(list) = actions.get_mut(action) {
            if let Some(pos) = list.iter().position(|existing| intent.filter_equals(existing)) {
                list.remove(pos);
            }
            if list.is_empty() {
                actions.remove(action);
            }
        }
        if actions.is_empty() {
            self.by_user.remove(&user);
        }
    }

    /// Clone all stickies retained under `action` for `user` (exact user
    /// slot only; callers query `USER_ALL` separately).
    pub fn for_action(&self, action: &str, user: UserId) -> Vec<Intent> {
        self.by_user
            .get(&user)
            .and_then(|actions| actions.get(action))
            .cloned()
            .unwrap_or_default()
    }

    /// Clone the stickies visible to a registrant of `filter` in `user`:
    /// the union of the `USER_ALL` slot and the user's own slot, for every
    /// action the filter names. Matching against the filter happens at the
    /// caller, outside any dispatcher lock.
    pub fn candidates_for_filter(&self, filter: &IntentFilter, user: UserId) -> Vec<Intent> {
        let mut out = Vec::new();
        for action in &filter.actions {
            for scope in [USER_ALL, user] {
                out.extend(self.for_action(action, scope));
            }
        }
        out
    }

    /// Snapshot of (user, action, retained count) for dump output.
    pub fn summary(&self) -> Vec<(UserId, String, usize)> {
        let mut out: Vec<_> = self
            .by_user
            .iter()
            .flat_map(|(user, actions)| {
                actions.iter().map(|(action, list)| (*user, action.clone(), list.len()))
            })
            .collect();
        out.sort();
        out
    }

    fn contains_filter_equal(
        actions: &HashMap<String, Vec<Intent>>,
        action: &str,
        intent: &Intent,
    ) -> bool {
        actions
            .get(action)
            .is_some_and(|list| list.iter().any(|existing| intent.filter_equals(existing)))
    }
}
