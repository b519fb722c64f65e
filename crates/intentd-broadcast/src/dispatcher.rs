//! The broadcast dispatcher.
//!
//! One object owns all broadcast state: the five queues, the registered
//! receiver registry and resolver, the sticky store, and the history rings.
//! Every mutation happens under a single coarse mutex; broadcast volume is
//! low compared to UI traffic, and single-writer semantics keep the
//! invariants easy to reason about.
//!
//! Enqueueing is synchronous, delivery is not: `broadcast_intent` returns
//! as soon as the record is queued, and a worker task per queue performs
//! the actual deliveries later. Workers communicate back into the
//! dispatcher through [`BroadcastDispatcher::finish_receiver`], which is
//! also the acknowledgment path receivers use for ordered broadcasts.
//!
//! # Queue selection
//!
//! Before a broadcast is enqueued its flag word is rewritten once:
//! foreground wins outright, a handful of slow system actions are routed
//! to the long-time queue, the boot-completed wave goes to the one-shot
//! boot queue, and sends from non-system apps are shunted to their own
//! queue so they cannot delay system broadcasts. Sender-supplied copies of
//! the queue-control bits are never trusted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use intentd_intent::user::{SHELL_UID, is_app_uid, user_of_uid};
use intentd_intent::{
    ComponentName, Extras, Intent, IntentFilter, IntentFlags, USER_ALL, USER_OWNER, UserId, actions,
};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::endpoint::{Delivery, EndpointId, ReceiverEndpoint};
use crate::error::{BroadcastError, Result};
use crate::filter::{BroadcastFilter, ReceiverList};
use crate::history::BroadcastHistory;
use crate::provider::{ComponentFlags, PackageProvider, ResolvedComponent};
use crate::queue::{InFlight, QueueKind, QueueLifecycle, QueueState};
use crate::record::{BroadcastOptions, BroadcastRecord, Caller, Receiver};
use crate::resolver::ReceiverResolver;
use crate::sticky::StickyStore;

/// Permission required to send a sticky broadcast.
pub const PERMISSION_BROADCAST_STICKY: &str = "intentd.permission.BROADCAST_STICKY";

/// Cached classification of a sending uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidKind {
    System,
    NonSystemApp,
}

/// Tunables of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long an ordered receiver may sit unacknowledged before it is
    /// force-finished and the queue moves on.
    pub ordered_timeout: Duration,
    /// Capacity of the finished-broadcast history ring.
    pub history_records: usize,
    /// Capacity of the intent-summary history ring.
    pub history_summaries: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ordered_timeout: Duration::from_secs(10),
            history_records: 50,
            history_summaries: 300,
        }
    }
}

/// Point-in-time view of the dispatcher for dump output.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSnapshot {
    pub queues: Vec<QueueSnapshot>,
    pub registered_endpoints: usize,
    pub registered_filters: usize,
    pub sticky: Vec<(UserId, String, usize)>,
    pub history_len: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub kind: QueueKind,
    pub parallel_pending: usize,
    pub ordered_pending: usize,
    pub in_flight: bool,
    pub retired: bool,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct DispatchState {
    queues: [QueueState; 5],
    registered: HashMap<EndpointId, ReceiverList>,
    component_endpoints: HashMap<ComponentName, (ReceiverEndpoint, u32)>,
    resolver: ReceiverResolver,
    sticky: StickyStore,
    started_users: Vec<UserId>,
    history: BroadcastHistory,
}

struct DispatcherInner {
    state: Mutex<DispatchState>,
    /// One wake-up latch per queue, indexed by [`QueueKind`].
    notifies: [Notify; 5],
    provider: Arc<dyn PackageProvider>,
    /// Permanent uid classification cache; processes do not change their
    /// system/non-system standing at runtime.
    uid_kinds: DashMap<u32, UidKind>,
    config: DispatcherConfig,
    shutdown: AtomicBool,
}

/// What a worker should do after one pass over its queue.
enum WorkerStep {
    /// Nothing pending; park until notified.
    Idle,
    /// An ordered receiver is in flight; wait for its acknowledgment or
    /// the given deadline.
    Waiting(Instant),
    Shutdown,
}

/// Facts needed to deliver one receiver after the record borrow ends.
struct DeliveryCtx {
    delivery: Delivery,
    required_permission: Option<String>,
    caller_pid: u32,
    caller_uid: i64,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owner of all broadcast dispatch state.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`; clones share the
/// same state.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    inner: Arc<DispatcherInner>,
}

impl BroadcastDispatcher {
    pub fn new(provider: Arc<dyn PackageProvider>) -> Self {
        Self::with_config(provider, DispatcherConfig::default())
    }

    pub fn with_config(provider: Arc<dyn PackageProvider>, config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                state: Mutex::new(DispatchState {
                    queues: QueueKind::ALL.map(QueueState::new),
                    registered: HashMap::new(),
                    component_endpoints: HashMap::new(),
                    resolver: ReceiverResolver::new(),
                    sticky: StickyStore::new(),
                    started_users: vec![USER_OWNER],
                    history: BroadcastHistory::new(config.history_records, config.history_summaries),
                }),
                notifies: [Notify::new(), Notify::new(), Notify::new(), Notify::new(), Notify::new()],
                provider,
                uid_kinds: DashMap::new(),
                config,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the five queue workers. Returns their join handles; they exit
    /// after [`BroadcastDispatcher::stop`].
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        QueueKind::ALL
            .iter()
            .map(|&kind| {
                let dispatcher = self.clone();
                tokio::spawn(async move { worker_loop(dispatcher, kind).await })
            })
            .collect()
    }

    /// Stop the queue workers. Pending records stay queued.
    pub fn stop(&self) {
        tracing::info!("broadcast dispatcher stopping");
        self.inner.shutdown.store(true, Ordering::Release);
        for notify in &self.inner.notifies {
            notify.notify_one();
        }
    }

    /// Replace the set of started users targeted by `USER_ALL` sends.
    pub async fn set_started_users(&self, users: Vec<UserId>) {
        self.inner.state.lock().await.started_users = users;
    }

    // -- Sending ------------------------------------------------------------

    /// Route, validate, and enqueue one broadcast.
    ///
    /// Returns as soon as the records are queued; delivery happens on the
    /// queue workers. Sticky violations and permission denials surface
    /// here, synchronously.
    pub async fn broadcast_intent(
        &self,
        caller: Caller,
        mut intent: Intent,
        result_to: Option<ReceiverEndpoint>,
        options: BroadcastOptions,
    ) -> Result<()> {
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        let st = &mut *guard;

        let boot_active = st.queues[QueueKind::Booting as usize].lifecycle == QueueLifecycle::Active;
        select_queue(inner, boot_active, &mut intent, &caller);

        if options.sticky {
            if !inner.provider.check_permission(PERMISSION_BROADCAST_STICKY, caller.pid, caller.uid)
            {
                let err = BroadcastError::PermissionDenied {
                    permission: PERMISSION_BROADCAST_STICKY.to_string(),
                    pid: caller.pid,
                    uid: caller.uid,
                };
                tracing::warn!(intent = %intent, "{err}");
                return Err(err);
            }
            if let Some(permission) = &options.required_permission {
                tracing::warn!(
                    intent = %intent,
                    permission = %permission,
                    "sticky broadcast cannot enforce a permission"
                );
                return Err(BroadcastError::StickyCannotHavePermission {
                    permission: permission.clone(),
                });
            }
            if intent.component.is_some() {
                return Err(BroadcastError::StickyCannotTargetComponent);
            }
            st.sticky.upsert(&intent, options.user_id)?;
        }

        let users: Vec<UserId> = if options.user_id == USER_ALL {
            st.started_users.clone()
        } else {
            vec![options.user_id]
        };

        // Manifest-declared receivers, unless the sender opted out.
        let mut receivers: Vec<Receiver> = Vec::new();
        if !intent.flags.contains(IntentFlags::RECEIVER_REGISTERED_ONLY) {
            receivers = collect_components(
                inner,
                &intent,
                options.resolved_type.as_deref(),
                &caller,
                &users,
            )
            .into_iter()
            .map(Receiver::Component)
            .collect();
        }

        // Dynamically registered receivers; component-targeted broadcasts
        // skip filter resolution entirely.
        let mut registered: Vec<Arc<BroadcastFilter>> = Vec::new();
        if intent.component.is_none() {
            if options.user_id == USER_ALL && caller.uid == SHELL_UID {
                // Query one user at a time so debugging-restricted users
                // are excluded from shell-driven broadcasts.
                for &user in &users {
                    let restricted =
                        inner.provider.has_debugging_restriction(user).unwrap_or_else(|e| {
                            tracing::warn!(user, error = %e, "restriction lookup failed");
                            false
                        });
                    if restricted {
                        continue;
                    }
                    for filter in st.resolver.query_intent(&intent, user) {
                        if !registered.iter().any(|f| f.receiver_id == filter.receiver_id) {
                            registered.push(filter);
                        }
                    }
                }
            } else {
                registered = st.resolver.query_intent(&intent, options.user_id);
            }
        }

        let replace_pending = intent.flags.contains(IntentFlags::RECEIVER_REPLACE_PENDING);
        tracing::debug!(
            intent = %intent,
            registered = registered.len(),
            components = receivers.len(),
            replace_pending,
            "enqueueing broadcast"
        );

        // Unordered registered receivers are split off into an immediate
        // parallel dispatch so they never wait for components to launch.
        if !options.ordered && !registered.is_empty() {
            let kind = queue_for_flags(&st.queues, intent.flags);
            let record = BroadcastRecord::new(
                kind,
                intent.clone(),
                &caller,
                &options,
                registered.drain(..).map(Receiver::Registered).collect(),
                None,
                0,
                None,
                None,
            );
            enqueue_parallel(st, inner, kind, record, replace_pending);
        }

        // The packages a change broadcast is about must not observe it;
        // this keeps freshly installed code from using its own install
        // broadcast as a launch trigger.
        if !receivers.is_empty() {
            let skip: Vec<String> = match intent.action.as_deref() {
                Some(
                    actions::PACKAGE_ADDED | actions::PACKAGE_RESTARTED
                    | actions::PACKAGE_DATA_CLEARED,
                ) => intent
                    .scheme_specific_part()
                    .map(|pkg| vec![pkg.to_string()])
                    .unwrap_or_default(),
                Some(actions::EXTERNAL_APPLICATIONS_AVAILABLE) => intent
                    .extras
                    .get_string_vec(actions::EXTRA_CHANGED_PACKAGE_LIST)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            if !skip.is_empty() {
                receivers.retain(|r| match r {
                    Receiver::Component(c) => !skip.contains(&c.component.package),
                    Receiver::Registered(_) => true,
                });
            }
        }

        // Merge remaining registered receivers into the component list by
        // descending priority. Stable two-pointer insert: on a tie the
        // registered receiver lands before the component it tied with.
        let mut it = 0usize;
        let mut ir = 0usize;
        while it < receivers.len() && ir < registered.len() {
            if registered[ir].priority() >= receivers[it].priority() {
                receivers.insert(it, Receiver::Registered(Arc::clone(&registered[ir])));
                ir += 1;
                it += 1;
            } else {
                it += 1;
            }
        }
        for filter in &registered[ir..] {
            receivers.push(Receiver::Registered(Arc::clone(filter)));
        }

        if !receivers.is_empty() || result_to.is_some() {
            let kind = queue_for_flags(&st.queues, intent.flags);
            let record =
                BroadcastRecord::new(kind, intent, &caller, &options, receivers, result_to, 0, None, None);
            let queue = &mut st.queues[kind as usize];
            let leftover = if replace_pending { queue.replace_ordered(record) } else { Err(record) };
            if let Err(record) = leftover {
                queue.enqueue_ordered(record);
            }
            inner.notifies[kind as usize].notify_one();
        }

        Ok(())
    }

    /// Remove a retained sticky.
    pub async fn remove_sticky(&self, intent: &Intent, user: UserId) {
        self.inner.state.lock().await.sticky.remove(intent, user);
    }

    // -- Receiver lifecycle --------------------------------------------------

    /// Register a receiver filter for an endpoint.
    ///
    /// Returns the first retained sticky matching the filter, and enqueues
    /// parallel replays of *all* matching stickies to the new receiver.
    /// Sticky matching runs outside the dispatcher lock: evaluating a data
    /// filter can require a content resolver that re-enters service state.
    pub async fn register_receiver(
        &self,
        caller: Caller,
        sender: ReceiverEndpoint,
        filter: IntentFilter,
        required_permission: Option<String>,
        user_id: UserId,
    ) -> Result<Option<Intent>> {
        let inner = &self.inner;

        let candidates = {
            let st = inner.state.lock().await;
            if let (Some(app), Some(package)) = (&caller.app, &caller.package) {
                // The system package may register on behalf of anyone.
                if *package != app.package && package != "intentd" {
                    return Err(BroadcastError::CallerPackageMismatch { package: package.clone() });
                }
            }
            st.sticky.candidates_for_filter(&filter, user_id)
        };

        let all_sticky: Vec<Intent> =
            candidates.into_iter().filter(|intent| filter.matches(intent)).collect();
        let first_sticky = all_sticky.first().cloned();

        let mut guard = inner.state.lock().await;
        let st = &mut *guard;

        let rl = match st.registered.entry(sender.id()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let rl = entry.into_mut();
                if rl.uid != caller.uid {
                    return Err(BroadcastError::RegistrationMismatch {
                        what: "uid",
                        previous: rl.uid as i64,
                        requested: caller.uid as i64,
                    });
                }
                if rl.pid != caller.pid {
                    return Err(BroadcastError::RegistrationMismatch {
                        what: "pid",
                        previous: rl.pid as i64,
                        requested: caller.pid as i64,
                    });
                }
                if rl.user_id != user_id {
                    return Err(BroadcastError::RegistrationMismatch {
                        what: "user",
                        previous: rl.user_id as i64,
                        requested: user_id as i64,
                    });
                }
                rl
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                // New endpoint: watch for the peer going away and run the
                // same cleanup as an explicit unregister.
                let watch = sender.clone();
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    watch.closed().await;
                    tracing::debug!(endpoint = %watch.id(), "receiver endpoint closed");
                    dispatcher.unregister_receiver(watch.id()).await;
                });
                entry.insert(ReceiverList::new(sender.clone(), caller.pid, caller.uid, user_id))
            }
        };

        let system = caller.app.as_ref().map_or(caller.from_system, |app| app.system);
        let broadcast_filter = Arc::new(BroadcastFilter {
            filter,
            receiver_id: sender.id(),
            package: caller.package.clone(),
            required_permission,
            owning_uid: caller.uid,
            owning_user: user_id,
            system,
        });
        rl.filters.push(Arc::clone(&broadcast_filter));
        st.resolver.add_filter(Arc::clone(&broadcast_filter));
        tracing::debug!(
            endpoint = %sender.id(),
            uid = caller.uid,
            user = user_id,
            sticky_replays = all_sticky.len(),
            "receiver registered"
        );

        for sticky in &all_sticky {
            let kind = queue_for_flags(&st.queues, sticky.flags);
            let record = BroadcastRecord::sticky_replay(
                kind,
                sticky.clone(),
                Receiver::Registered(Arc::clone(&broadcast_filter)),
            );
            st.queues[kind as usize].enqueue_parallel(record);
            inner.notifies[kind as usize].notify_one();
        }

        Ok(first_sticky)
    }

    /// Drop every filter registered by `endpoint`.
    ///
    /// If the endpoint is the current in-flight ordered recipient, that
    /// receiver is finished on its behalf first so the queue advances
    /// instead of stalling. Returns whether such a finish happened (the
    /// caller may want to trim queues afterwards).
    pub async fn unregister_receiver(&self, endpoint: EndpointId) -> bool {
        let mut guard = self.inner.state.lock().await;
        let st = &mut *guard;
        let Some(rl) = st.registered.remove(&endpoint) else {
            return false;
        };

        let mut finished_current = false;
        if rl.cur_broadcast.is_some() {
            for queue in st.queues.iter_mut() {
                if queue.in_flight.as_ref().is_some_and(|f| f.endpoint == endpoint) {
                    tracing::debug!(
                        queue = queue.kind.name(),
                        endpoint = %endpoint,
                        "finishing in-flight receiver for unregistering endpoint"
                    );
                    queue.in_flight = None;
                    finished_current = true;
                    self.inner.notifies[queue.kind as usize].notify_one();
                }
            }
        }

        for filter in &rl.filters {
            st.resolver.remove_filter(filter);
        }
        tracing::info!(endpoint = %endpoint, filters = rl.filters.len(), "receiver unregistered");
        finished_current
    }

    /// Acknowledge the ordered delivery in flight at `endpoint`, recording
    /// its result and waking the queue for the next receiver.
    pub async fn finish_receiver(
        &self,
        endpoint: EndpointId,
        result_code: i32,
        result_data: Option<String>,
        result_extras: Option<Extras>,
        abort: bool,
    ) -> bool {
        let mut guard = self.inner.state.lock().await;
        let st = &mut *guard;
        for queue in st.queues.iter_mut() {
            let Some(in_flight) = &queue.in_flight else {
                continue;
            };
            if in_flight.endpoint != endpoint {
                continue;
            }
            let record_id = in_flight.record_id;
            if let Some(record) = queue.ordered.front_mut() {
                if record.id == record_id && record.ordered {
                    record.result_code = result_code;
                    record.result_data = result_data;
                    record.result_extras = result_extras;
                    record.result_abort = abort;
                }
            }
            queue.in_flight = None;
            if let Some(rl) = st.registered.get_mut(&endpoint) {
                rl.cur_broadcast = None;
            }
            self.inner.notifies[queue.kind as usize].notify_one();
            return true;
        }
        false
    }

    // -- Component processes -------------------------------------------------

    /// Attach the delivery endpoint of a running process hosting
    /// manifest-declared receiver `component`.
    pub async fn attach_component(
        &self,
        component: ComponentName,
        sender: ReceiverEndpoint,
        pid: u32,
    ) {
        let mut st = self.inner.state.lock().await;
        st.component_endpoints.insert(component, (sender, pid));
    }

    pub async fn detach_component(&self, component: &ComponentName) {
        let mut st = self.inner.state.lock().await;
        st.component_endpoints.remove(component);
    }

    /// Force-finish the current receiver on any queue where the in-flight
    /// endpoint belongs to `pid` (the process died).
    pub async fn skip_receivers_for_pid(&self, pid: u32) {
        let mut guard = self.inner.state.lock().await;
        let st = &mut *guard;
        let endpoints: HashSet<EndpointId> = st
            .registered
            .values()
            .filter(|rl| rl.pid == pid)
            .map(|rl| rl.endpoint_id)
            .chain(
                st.component_endpoints
                    .values()
                    .filter(|(_, p)| *p == pid)
                    .map(|(s, _)| s.id()),
            )
            .collect();
        for queue in st.queues.iter_mut() {
            if queue.in_flight.as_ref().is_some_and(|f| endpoints.contains(&f.endpoint)) {
                tracing::warn!(queue = queue.kind.name(), pid, "skipping receiver of dead process");
                queue.in_flight = None;
                self.inner.notifies[queue.kind as usize].notify_one();
            }
        }
        for rl in st.registered.values_mut() {
            if rl.pid == pid {
                rl.cur_broadcast = None;
            }
        }
    }

    // -- Introspection -------------------------------------------------------

    /// Whether any queue still holds pending or in-flight work.
    pub async fn processing_broadcasts(&self) -> bool {
        let st = self.inner.state.lock().await;
        st.queues.iter().any(|q| !q.is_idle())
    }

    pub async fn snapshot(&self) -> DispatchSnapshot {
        let st = self.inner.state.lock().await;
        DispatchSnapshot {
            queues: st
                .queues
                .iter()
                .map(|q| QueueSnapshot {
                    kind: q.kind,
                    parallel_pending: q.parallel.len(),
                    ordered_pending: q.ordered.len(),
                    in_flight: q.in_flight.is_some(),
                    retired: q.lifecycle == QueueLifecycle::Retired,
                })
                .collect(),
            registered_endpoints: st.registered.len(),
            registered_filters: st.resolver.len(),
            sticky: st.sticky.summary(),
            history_len: st.history.len(),
        }
    }

    /// Classification used when only a uid (no attached process record) is
    /// known for the sender. Memoized for the lifetime of the dispatcher.
    fn classify_uid(inner: &DispatcherInner, caller: &Caller) -> UidKind {
        if let Some(kind) = inner.uid_kinds.get(&caller.uid) {
            return *kind;
        }
        let info = caller.package.as_deref().and_then(|package| {
            inner
                .provider
                .application_info(package, user_of_uid(caller.uid))
                .unwrap_or_else(|e| {
                    tracing::warn!(package, error = %e, "application info lookup failed");
                    None
                })
        });
        let kind = match info {
            Some(info) if info.system => UidKind::System,
            _ => UidKind::NonSystemApp,
        };
        inner.uid_kinds.insert(caller.uid, kind);
        kind
    }
}

// ---------------------------------------------------------------------------
// Routing helpers
// ---------------------------------------------------------------------------

/// Rewrite the intent's queue-control flags; runs once per send.
fn select_queue(inner: &DispatcherInner, boot_active: bool, intent: &mut Intent, caller: &Caller) {
    if intent.flags.contains(IntentFlags::RECEIVER_FOREGROUND) {
        // Foreground has the highest precedence regardless of origin.
        return;
    }
    if intent.flags.intersects(IntentFlags::QUEUE_CONTROL) {
        tracing::warn!(
            intent = %intent,
            cleared = format_args!("{:#x}", IntentFlags::QUEUE_CONTROL.bits()),
            "sender supplied queue-control flags; clearing"
        );
        intent.clear_flags(IntentFlags::QUEUE_CONTROL);
    }

    if caller.from_system {
        match intent.action.as_deref() {
            Some(
                actions::POWER_CONNECTED
                | actions::POWER_DISCONNECTED
                | actions::PACKAGE_ADDED
                | actions::PACKAGE_CHANGED
                | actions::PACKAGE_REMOVED
                | actions::PACKAGE_REPLACED
                | actions::CONNECTIVITY_CHANGE
                | actions::ACCOUNTS_CHANGED,
            ) => intent.add_flags(IntentFlags::RECEIVER_LONG_TIME),
            Some(actions::BOOT_COMPLETED) if boot_active => {
                intent.add_flags(IntentFlags::RECEIVER_BOOTING);
            }
            _ => {}
        }
    } else if let Some(app) = &caller.app {
        if !app.system {
            intent.add_flags(IntentFlags::RECEIVER_NON_SYSTEM_APP);
        }
    } else if is_app_uid(caller.uid) {
        // No attached process record: this send came through a pending
        // intent. Classify the uid once and remember the answer.
        if BroadcastDispatcher::classify_uid(inner, caller) == UidKind::NonSystemApp {
            intent.add_flags(IntentFlags::RECEIVER_NON_SYSTEM_APP);
        }
    }
}

/// The queue a flag word routes to.
fn queue_for_flags(queues: &[QueueState; 5], flags: IntentFlags) -> QueueKind {
    if flags.contains(IntentFlags::RECEIVER_FOREGROUND) {
        return QueueKind::Foreground;
    }
    if flags.contains(IntentFlags::RECEIVER_LONG_TIME) {
        return QueueKind::LongTime;
    }
    if flags.contains(IntentFlags::RECEIVER_NON_SYSTEM_APP) {
        return QueueKind::NonSystemApp;
    }
    if flags.contains(IntentFlags::RECEIVER_BOOTING)
        && queues[QueueKind::Booting as usize].lifecycle == QueueLifecycle::Active
    {
        return QueueKind::Booting;
    }
    QueueKind::Background
}

fn enqueue_parallel(
    st: &mut DispatchState,
    inner: &DispatcherInner,
    kind: QueueKind,
    record: BroadcastRecord,
    replace_pending: bool,
) {
    let queue = &mut st.queues[kind as usize];
    let leftover = if replace_pending { queue.replace_parallel(record) } else { Err(record) };
    if let Err(record) = leftover {
        queue.enqueue_parallel(record);
    }
    inner.notifies[kind as usize].notify_one();
}

/// Collect manifest receivers across the target users, filtering
/// primary-user-only components for secondary users and de-duplicating
/// single-user components across scans.
fn collect_components(
    inner: &DispatcherInner,
    intent: &Intent,
    resolved_type: Option<&str>,
    caller: &Caller,
    users: &[UserId],
) -> Vec<ResolvedComponent> {
    let mut receivers: Vec<ResolvedComponent> = Vec::new();
    let mut single_user_seen: HashSet<ComponentName> = HashSet::new();
    let mut scanned_first = false;

    for &user in users {
        if caller.uid == SHELL_UID {
            let restricted = inner.provider.has_debugging_restriction(user).unwrap_or_else(|e| {
                tracing::warn!(user, error = %e, "restriction lookup failed");
                false
            });
            if restricted {
                continue;
            }
        }
        let mut new_receivers =
            match inner.provider.query_intent_receivers(intent, resolved_type, user) {
                Ok(receivers) => receivers,
                Err(e) => {
                    tracing::warn!(user, error = %e, "receiver query failed; treating as empty");
                    continue;
                }
            };
        if user != USER_OWNER {
            new_receivers.retain(|rc| !rc.flags.contains(ComponentFlags::PRIMARY_USER_ONLY));
        }
        if new_receivers.is_empty() {
            continue;
        }
        if receivers.is_empty() {
            receivers = new_receivers;
        } else {
            if !scanned_first {
                scanned_first = true;
                for rc in &receivers {
                    if rc.flags.contains(ComponentFlags::SINGLE_USER) {
                        single_user_seen.insert(rc.component.clone());
                    }
                }
            }
            for rc in new_receivers {
                if rc.flags.contains(ComponentFlags::SINGLE_USER) {
                    if single_user_seen.insert(rc.component.clone()) {
                        receivers.push(rc);
                    }
                } else {
                    receivers.push(rc);
                }
            }
        }
    }
    receivers
}

// ---------------------------------------------------------------------------
// Queue workers
// ---------------------------------------------------------------------------

async fn worker_loop(dispatcher: BroadcastDispatcher, kind: QueueKind) {
    let inner = Arc::clone(&dispatcher.inner);
    let idx = kind as usize;
    tracing::debug!(queue = kind.name(), "broadcast queue worker started");
    loop {
        let step = {
            let mut guard = inner.state.lock().await;
            step_queue(&inner, &mut guard, kind)
        };
        match step {
            WorkerStep::Shutdown => break,
            WorkerStep::Idle => inner.notifies[idx].notified().await,
            WorkerStep::Waiting(deadline) => {
                tokio::select! {
                    _ = inner.notifies[idx].notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        force_finish_timed_out(&inner, kind).await;
                    }
                }
            }
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
    }
    tracing::debug!(queue = kind.name(), "broadcast queue worker stopped");
}

/// Clear an in-flight receiver whose acknowledgment never arrived.
async fn force_finish_timed_out(inner: &DispatcherInner, kind: QueueKind) {
    let mut guard = inner.state.lock().await;
    let st = &mut *guard;
    let queue = &mut st.queues[kind as usize];
    let Some(in_flight) = &queue.in_flight else {
        return;
    };
    if in_flight.since.elapsed() < inner.config.ordered_timeout {
        return;
    }
    let endpoint = in_flight.endpoint;
    tracing::warn!(
        queue = kind.name(),
        endpoint = %endpoint,
        timeout_ms = inner.config.ordered_timeout.as_millis() as u64,
        "ordered receiver timed out; forcing finish"
    );
    queue.in_flight = None;
    if let Some(rl) = st.registered.get_mut(&endpoint) {
        rl.cur_broadcast = None;
    }
}

/// One pass over a queue: drain the parallel lane, then advance the
/// ordered lane by at most one in-flight receiver.
fn step_queue(inner: &DispatcherInner, guard: &mut DispatchState, kind: QueueKind) -> WorkerStep {
    if inner.shutdown.load(Ordering::Acquire) {
        return WorkerStep::Shutdown;
    }
    let idx = kind as usize;

    // Parallel lane: fan out without waiting on anyone.
    let mut drained = 0usize;
    while let Some(mut record) = guard.queues[idx].parallel.pop_front() {
        record.dispatch_time = Some(Utc::now());
        for receiver in record.receivers.clone() {
            match receiver {
                Receiver::Registered(filter) => {
                    deliver_to_registered(inner, &guard.registered, &record, &filter, false);
                }
                Receiver::Component(component) => {
                    // Parallel records are built from registered receivers
                    // only; a component here means a construction bug.
                    tracing::warn!(
                        component = %component.component,
                        "component receiver on parallel lane; skipping"
                    );
                }
            }
        }
        record.finish_time = Some(Utc::now());
        guard.history.add(&record);
        drained += 1;
    }
    if drained > 0 {
        maybe_retire_boot(&mut guard.queues[idx]);
    }

    // Ordered lane.
    loop {
        if let Some(in_flight) = &guard.queues[idx].in_flight {
            return WorkerStep::Waiting(in_flight.since + inner.config.ordered_timeout);
        }

        let DispatchState { queues, registered, component_endpoints, history, .. } = guard;
        let queue = &mut queues[idx];
        let Some(record) = queue.ordered.front_mut() else {
            return WorkerStep::Idle;
        };
        if record.dispatch_time.is_none() {
            record.dispatch_time = Some(Utc::now());
        }
        if record.result_abort {
            // A receiver aborted the chain: skip everyone left.
            record.next_receiver = record.receivers.len();
        }

        if record.exhausted() {
            if let Some(result_to) = &record.result_to {
                result_to.deliver(Delivery {
                    record_id: record.id,
                    intent: record.intent.clone(),
                    ordered: false,
                    sticky: record.sticky,
                    result_code: record.result_code,
                    result_data: record.result_data.clone(),
                    result_extras: record.result_extras.clone(),
                    is_final_result: true,
                });
            }
            let mut record = queue.ordered.pop_front().expect("head exists");
            record.finish_time = Some(Utc::now());
            history.add(&record);
            maybe_retire_boot(queue);
            continue;
        }

        let receiver = record.receivers[record.next_receiver].clone();
        record.next_receiver += 1;
        let is_ordered = record.ordered;
        let record_id = record.id;
        let ctx = DeliveryCtx {
            delivery: Delivery {
                record_id,
                intent: record.intent.clone(),
                ordered: false,
                sticky: record.sticky,
                result_code: record.result_code,
                result_data: record.result_data.clone(),
                result_extras: record.result_extras.clone(),
                is_final_result: false,
            },
            required_permission: record.required_permission.clone(),
            caller_pid: record.caller_pid,
            caller_uid: record.caller_uid,
        };

        match receiver {
            Receiver::Registered(filter) => {
                let delivered = deliver_ctx(inner, registered, ctx, &filter, is_ordered);
                if is_ordered && delivered {
                    queue.in_flight = Some(InFlight {
                        record_id,
                        endpoint: filter.receiver_id,
                        since: Instant::now(),
                    });
                    if let Some(rl) = registered.get_mut(&filter.receiver_id) {
                        rl.cur_broadcast = Some(record_id);
                    }
                }
                // Unordered registered receivers inside an ordered record
                // (a merged list of a non-ordered broadcast) never wait.
            }
            Receiver::Component(component) => {
                match component_endpoints.get(&component.component) {
                    Some((sender, _pid)) => {
                        let mut delivery = ctx.delivery;
                        // Component receivers always acknowledge, even for
                        // broadcasts that were not sent as ordered.
                        delivery.ordered = true;
                        if sender.deliver(delivery) {
                            queue.in_flight = Some(InFlight {
                                record_id,
                                endpoint: sender.id(),
                                since: Instant::now(),
                            });
                        } else {
                            tracing::warn!(
                                component = %component.component,
                                "component endpoint closed; skipping receiver"
                            );
                        }
                    }
                    None => {
                        tracing::warn!(
                            component = %component.component,
                            "no process attached for component receiver; skipping"
                        );
                    }
                }
            }
        }
    }
}

/// One-shot transition of the boot queue once its last receiver finished.
fn maybe_retire_boot(queue: &mut QueueState) {
    if queue.kind == QueueKind::Booting
        && queue.lifecycle == QueueLifecycle::Active
        && queue.ordered.is_empty()
        && queue.parallel.is_empty()
        && queue.in_flight.is_none()
    {
        queue.lifecycle = QueueLifecycle::Retired;
        tracing::info!("all boot receivers complete; retiring boot queue");
    }
}

fn deliver_ctx(
    inner: &DispatcherInner,
    registered: &HashMap<EndpointId, ReceiverList>,
    ctx: DeliveryCtx,
    filter: &BroadcastFilter,
    ordered: bool,
) -> bool {
    let Some(rl) = registered.get(&filter.receiver_id) else {
        tracing::debug!(endpoint = %filter.receiver_id, "receiver gone; skipping delivery");
        return false;
    };
    // The receiver must hold the sender's required permission, and the
    // sender must hold the receiver's.
    if let Some(permission) = &ctx.required_permission {
        if !inner.provider.check_permission(permission, rl.pid, rl.uid) {
            tracing::warn!(
                endpoint = %filter.receiver_id,
                permission = %permission,
                "receiver lacks broadcast permission; skipping"
            );
            return false;
        }
    }
    if let Some(permission) = &filter.required_permission {
        if ctx.caller_uid >= 0
            && !inner.provider.check_permission(permission, ctx.caller_pid, ctx.caller_uid as u32)
        {
            tracing::warn!(
                endpoint = %filter.receiver_id,
                permission = %permission,
                "sender lacks receiver's permission; skipping"
            );
            return false;
        }
    }
    let mut delivery = ctx.delivery;
    delivery.ordered = ordered;
    rl.sender.deliver(delivery)
}

fn deliver_to_registered(
    inner: &DispatcherInner,
    registered: &HashMap<EndpointId, ReceiverList>,
    record: &BroadcastRecord,
    filter: &BroadcastFilter,
    ordered: bool,
) -> bool {
    deliver_ctx(
        inner,
        registered,
        DeliveryCtx {
            delivery: Delivery {
                record_id: record.id,
                intent: record.intent.clone(),
                ordered: false,
                sticky: record.sticky,
                result_code: record.result_code,
                result_data: record.result_data.clone(),
                result_extras: record.result_extras.clone(),
                is_final_result: false,
            },
            required_permission: record.required_permission.clone(),
            caller_pid: record.caller_pid,
            caller_uid: record.caller_uid,
        },
        filter,
        ordered,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
