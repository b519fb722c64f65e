//! Resolver for registered receivers.
//!
//! Indexes every registered [`BroadcastFilter`] by action and answers
//! "which filters match this intent for this user". At most one result per
//! endpoint is returned for a single query, so a process that registered
//! several overlapping filters observes the broadcast once.

use std::collections::HashMap;
use std::sync::Arc;

use intentd_intent::{Intent, USER_ALL, UserId};

use crate::filter::BroadcastFilter;

/// Action-indexed registry of registered filters.
#[derive(Debug, Default)]
pub struct ReceiverResolver {
    by_action: HashMap<String, Vec<Arc<BroadcastFilter>>>,
    filter_count: usize,
}

impl ReceiverResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter(&mut self, filter: Arc<BroadcastFilter>) {
        for action in &filter.filter.actions {
            self.by_action.entry(action.clone()).or_default().push(Arc::clone(&filter));
        }
        self.filter_count += 1;
    }

    pub fn remove_filter(&mut self, filter: &Arc<BroadcastFilter>) {
        let mut removed = false;
        for action in &filter.filter.actions {
            if let Some(list) = self.by_action.get_mut(action) {
                let before = list.len();
                list.retain(|f| !Arc::ptr_eq(f, filter));
                removed |= list.len() != before;
                if list.is_empty() {
                    self.by_action.remove(action);
                }
            }
        }
        if removed {
            self.filter_count -= 1;
        }
    }

    /// Number of filters currently registered.
    pub fn len(&self) -> usize {
        self.filter_count
    }

    pub fn is_empty(&self) -> bool {
        self.filter_count == 0
    }

    /// Filters matching `intent` for `user`, at most one per endpoint.
    ///
    /// A filter owned by `USER_ALL` matches any queried user, and a
    /// `USER_ALL` query matches filters of every user.
    pub fn query_intent(&self, intent: &Intent, user: UserId) -> Vec<Arc<BroadcastFilter>> {
        let mut out: Vec<Arc<BroadcastFilter>> = Vec::new();
        let Some(action) = intent.action.as_deref() else {
            return out;
        };
        let Some(candidates) = self.by_action.get(action) else {
            return out;
        };
        for filter in candidates {
            if user != USER_ALL && filter.owning_user != USER_ALL && user != filter.owning_user {
                continue;
            }
            if !filter.filter.matches(intent) {
                continue;
            }
            if out.iter().any(|f| f.receiver_id == filter.receiver_id) {
                continue;
            }
            out.push(Arc::clone(filter));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentd_intent::{IntentFilter, USER_OWNER};
    use uuid::Uuid;

    fn filter(action: &str, user: UserId, receiver_id: Uuid, priority: i32) -> Arc<BroadcastFilter> {
        Arc::new(BroadcastFilter {
            filter: IntentFilter::new(action).with_priority(priority),
            receiver_id,
            package: None,
            required_permission: None,
            owning_uid: 10_001,
            owning_user: user,
            system: false,
        })
    }

    #[test]
    fn query_scopes_by_user() {
        let mut resolver = ReceiverResolver::new();
        let owner = filter("a", USER_OWNER, Uuid::now_v7(), 0);
        let secondary = filter("a", 10, Uuid::now_v7(), 0);
        let global = filter("a", USER_ALL, Uuid::now_v7(), 0);
        resolver.add_filter(Arc::clone(&owner));
        resolver.add_filter(Arc::clone(&secondary));
        resolver.add_filter(Arc::clone(&global));

        let intent = Intent::new("a");
        assert_eq!(resolver.query_intent(&intent, USER_OWNER).len(), 2);
        assert_eq!(resolver.query_intent(&intent, 10).len(), 2);
        assert_eq!(resolver.query_intent(&intent, USER_ALL).len(), 3);
    }

    #[test]
    fn one_result_per_endpoint() {
        let mut resolver = ReceiverResolver::new();
        let endpoint = Uuid::now_v7();
        resolver.add_filter(filter("a", USER_OWNER, endpoint, 0));
        resolver.add_filter(filter("a", USER_OWNER, endpoint, 5));

        assert_eq!(resolver.query_intent(&Intent::new("a"), USER_OWNER).len(), 1);
    }

    #[test]
    fn remove_by_identity() {
        let mut resolver = ReceiverResolver::new();
        let f1 = filter("a", USER_OWNER, Uuid::now_v7(), 0);
        let f2 = filter("a", USER_OWNER, Uuid::now_v7(), 0);
        resolver.add_filter(Arc::clone(&f1));
        resolver.add_filter(Arc::clone(&f2));
        assert_eq!(resolver.len(), 2);

        resolver.remove_filter(&f1);
        assert_eq!(resolver.len(), 1);
        let left = resolver.query_intent(&Intent::new("a"), USER_OWNER);
        assert_eq!(left.len(), 1);
        assert!(Arc::ptr_eq(&left[0], &f2));
    }
}
