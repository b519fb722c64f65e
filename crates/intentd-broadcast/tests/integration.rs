//! Integration tests for the intentd-broadcast crate.
//!
//! These tests run the dispatcher with its queue workers live and observe
//! deliveries through real receiver endpoints: queue routing, sticky
//! semantics, ordered priority merging, replace-pending collapse, and the
//! receiver lifecycle paths.

use std::sync::Arc;
use std::time::Duration;

use intentd_broadcast::{
    BroadcastDispatcher, BroadcastError, BroadcastOptions, Caller, ComponentFlags, Delivery,
    EndpointHandle, InMemoryPackageProvider, PERMISSION_BROADCAST_STICKY, QueueKind,
    endpoint_pair,
};
use intentd_intent::user::uid_for_user;
use intentd_intent::{
    ComponentName, ExtraValue, Intent, IntentFilter, IntentFlags, USER_ALL, actions,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn recv_timeout(handle: &mut EndpointHandle) -> Delivery {
    tokio::time::timeout(Duration::from_secs(2), handle.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("endpoint closed")
}

async fn assert_no_delivery(handle: &mut EndpointHandle) {
    let result = tokio::time::timeout(Duration::from_millis(200), handle.recv()).await;
    assert!(result.is_err(), "unexpected delivery: {:?}", result.unwrap());
}

fn sticky_capable_provider() -> InMemoryPackageProvider {
    InMemoryPackageProvider::new().with_permission(PERMISSION_BROADCAST_STICKY, 1000)
}

// ═══════════════════════════════════════════════════════════════════════
//  Parallel delivery
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unordered_broadcast_fans_out_to_registered_receivers() {
    init_tracing();
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    let _workers = dispatcher.start();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let (sender, handle) = endpoint_pair();
        dispatcher
            .register_receiver(
                Caller::app("com.listener", 100, 10_001, false),
                sender,
                IntentFilter::new("fanout.action"),
                None,
                0,
            )
            .await
            .unwrap();
        handles.push(handle);
    }

    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new("fanout.action"),
            None,
            BroadcastOptions { user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    for handle in &mut handles {
        let delivery = recv_timeout(handle).await;
        assert_eq!(delivery.intent.action.as_deref(), Some("fanout.action"));
        assert!(!delivery.ordered, "parallel deliveries need no acknowledgment");
    }

    dispatcher.stop();
}

#[tokio::test]
async fn non_system_app_broadcast_is_tagged_and_routed() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    let _workers = dispatcher.start();

    let (sender, mut handle) = endpoint_pair();
    dispatcher
        .register_receiver(
            Caller::app("com.listener", 100, 10_001, false),
            sender,
            IntentFilter::new("app.action"),
            None,
            0,
        )
        .await
        .unwrap();

    dispatcher
        .broadcast_intent(
            Caller::app("com.ordinary", 200, 10_050, false),
            Intent::new("app.action"),
            None,
            BroadcastOptions { user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    let delivery = recv_timeout(&mut handle).await;
    assert!(delivery.intent.flags.contains(IntentFlags::RECEIVER_NON_SYSTEM_APP));
    dispatcher.stop();
}

// ═══════════════════════════════════════════════════════════════════════
//  Sticky broadcasts
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn sticky_is_returned_and_replayed_to_new_registrant() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(sticky_capable_provider()));
    let _workers = dispatcher.start();

    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new("battery.changed").with_extra("level", ExtraValue::I32(73)),
            None,
            BroadcastOptions { sticky: true, user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    let (sender, mut handle) = endpoint_pair();
    let first = dispatcher
        .register_receiver(
            Caller::app("com.listener", 100, 10_001, false),
            sender,
            IntentFilter::new("battery.changed"),
            None,
            0,
        )
        .await
        .unwrap()
        .expect("first matching sticky returned synchronously");
    assert_eq!(first.extras.get_i32("level"), Some(73));

    let replay = recv_timeout(&mut handle).await;
    assert!(replay.sticky);
    assert_eq!(replay.intent.extras.get_i32("level"), Some(73));

    dispatcher.stop();
}

#[tokio::test]
async fn sticky_conflict_across_user_scopes_fails_both_orders() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(sticky_capable_provider()));

    let options = |user| BroadcastOptions { sticky: true, user_id: user, ..Default::default() };

    // All-users first, specific user second.
    dispatcher
        .broadcast_intent(Caller::system(), Intent::new("conflict.a"), None, options(USER_ALL))
        .await
        .unwrap();
    let err = dispatcher
        .broadcast_intent(Caller::system(), Intent::new("conflict.a"), None, options(10))
        .await
        .unwrap_err();
    assert!(matches!(err, BroadcastError::StickyConflict { user: 10, .. }));

    // Specific user first, all-users second.
    dispatcher
        .broadcast_intent(Caller::system(), Intent::new("conflict.b"), None, options(10))
        .await
        .unwrap();
    let err = dispatcher
        .broadcast_intent(Caller::system(), Intent::new("conflict.b"), None, options(USER_ALL))
        .await
        .unwrap_err();
    assert!(matches!(err, BroadcastError::StickyConflict { user: USER_ALL, .. }));
}

#[tokio::test]
async fn removed_sticky_is_not_replayed() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(sticky_capable_provider()));
    let _workers = dispatcher.start();

    let intent = Intent::new("volatile.state");
    dispatcher
        .broadcast_intent(
            Caller::system(),
            intent.clone(),
            None,
            BroadcastOptions { sticky: true, user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();
    dispatcher.remove_sticky(&intent, 0).await;

    let (sender, mut handle) = endpoint_pair();
    let first = dispatcher
        .register_receiver(
            Caller::app("com.listener", 100, 10_001, false),
            sender,
            IntentFilter::new("volatile.state"),
            None,
            0,
        )
        .await
        .unwrap();
    assert!(first.is_none());
    assert_no_delivery(&mut handle).await;

    dispatcher.stop();
}

// ═══════════════════════════════════════════════════════════════════════
//  Replace-pending
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn replace_pending_collapses_filter_equal_broadcasts() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    // Workers intentionally not started: records must stay pending.

    let (sender, _handle) = endpoint_pair();
    dispatcher
        .register_receiver(
            Caller::app("com.listener", 100, 10_001, false),
            sender,
            IntentFilter::new("collapse.action"),
            None,
            0,
        )
        .await
        .unwrap();

    let send = |flags: IntentFlags| {
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .broadcast_intent(
                    Caller::system(),
                    Intent::new("collapse.action")
                        .with_extra("seq", ExtraValue::I32(1))
                        .with_flags(flags),
                    None,
                    BroadcastOptions { user_id: 0, ..Default::default() },
                )
                .await
                .unwrap();
        }
    };

    send(IntentFlags::RECEIVER_REPLACE_PENDING).await;
    send(IntentFlags::RECEIVER_REPLACE_PENDING).await;

    let snapshot = dispatcher.snapshot().await;
    let background = &snapshot.queues[QueueKind::Background as usize];
    assert_eq!(background.parallel_pending, 1, "filter-equal sends collapse to one entry");

    // Without the flag both copies queue up.
    send(IntentFlags::empty()).await;
    send(IntentFlags::empty()).await;
    let snapshot = dispatcher.snapshot().await;
    let background = &snapshot.queues[QueueKind::Background as usize];
    assert_eq!(background.parallel_pending, 3);

    // The snapshot is dump-friendly.
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["queues"][QueueKind::Background as usize]["parallel_pending"], 3);
}

// ═══════════════════════════════════════════════════════════════════════
//  Ordered delivery
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ordered_broadcast_respects_priority_across_receiver_kinds() {
    // Static component receiver at priority 10, dynamic filter at 20:
    // the dynamic one must run first.
    let static_component = ComponentName::new("com.static", "UpdateReceiver");
    let provider = InMemoryPackageProvider::new().with_receiver(
        "ordered.action",
        static_component.clone(),
        10,
        ComponentFlags::empty(),
        0,
    );
    let dispatcher = BroadcastDispatcher::new(Arc::new(provider));
    let _workers = dispatcher.start();

    let (component_sender, mut component_handle) = endpoint_pair();
    let component_endpoint = component_sender.id();
    dispatcher.attach_component(static_component, component_sender, 300).await;

    let (dynamic_sender, mut dynamic_handle) = endpoint_pair();
    let dynamic_endpoint = dynamic_sender.id();
    dispatcher
        .register_receiver(
            Caller::app("com.dynamic", 100, 10_001, false),
            dynamic_sender,
            IntentFilter::new("ordered.action").with_priority(20),
            None,
            0,
        )
        .await
        .unwrap();

    let (result_sender, mut result_handle) = endpoint_pair();
    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new("ordered.action"),
            Some(result_sender),
            BroadcastOptions { ordered: true, user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    // Dynamic receiver first; the component must not have been reached yet.
    let first = recv_timeout(&mut dynamic_handle).await;
    assert!(first.ordered);
    assert!(component_handle.try_recv().is_none());

    dispatcher
        .finish_receiver(dynamic_endpoint, 7, Some("seen".into()), None, false)
        .await;

    // Component second, observing the accumulated result.
    let second = recv_timeout(&mut component_handle).await;
    assert!(second.ordered);
    assert_eq!(second.result_code, 7);
    assert_eq!(second.result_data.as_deref(), Some("seen"));
    dispatcher.finish_receiver(component_endpoint, 7, Some("seen".into()), None, false).await;

    // Result callback fires last.
    let result = recv_timeout(&mut result_handle).await;
    assert!(result.is_final_result);
    assert_eq!(result.result_code, 7);

    dispatcher.stop();
}

#[tokio::test]
async fn aborting_receiver_skips_the_rest_but_result_still_fires() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    let _workers = dispatcher.start();

    let (high_sender, mut high_handle) = endpoint_pair();
    let high_endpoint = high_sender.id();
    dispatcher
        .register_receiver(
            Caller::app("com.high", 100, 10_001, false),
            high_sender,
            IntentFilter::new("abortable.action").with_priority(10),
            None,
            0,
        )
        .await
        .unwrap();

    let (low_sender, mut low_handle) = endpoint_pair();
    dispatcher
        .register_receiver(
            Caller::app("com.low", 101, 10_002, false),
            low_sender,
            IntentFilter::new("abortable.action").with_priority(1),
            None,
            0,
        )
        .await
        .unwrap();

    let (result_sender, mut result_handle) = endpoint_pair();
    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new("abortable.action"),
            Some(result_sender),
            BroadcastOptions { ordered: true, user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    recv_timeout(&mut high_handle).await;
    dispatcher.finish_receiver(high_endpoint, -1, None, None, true).await;

    let result = recv_timeout(&mut result_handle).await;
    assert!(result.is_final_result);
    assert_eq!(result.result_code, -1);
    assert_no_delivery(&mut low_handle).await;

    dispatcher.stop();
}

#[tokio::test]
async fn unregistering_inflight_receiver_advances_the_queue() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    let _workers = dispatcher.start();

    let (first_sender, mut first_handle) = endpoint_pair();
    let first_endpoint = first_sender.id();
    dispatcher
        .register_receiver(
            Caller::app("com.first", 100, 10_001, false),
            first_sender,
            IntentFilter::new("chain.action").with_priority(5),
            None,
            0,
        )
        .await
        .unwrap();

    let (second_sender, mut second_handle) = endpoint_pair();
    let second_endpoint = second_sender.id();
    dispatcher
        .register_receiver(
            Caller::app("com.second", 101, 10_002, false),
            second_sender,
            IntentFilter::new("chain.action").with_priority(1),
            None,
            0,
        )
        .await
        .unwrap();

    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new("chain.action"),
            None,
            BroadcastOptions { ordered: true, user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    // First receiver gets the broadcast but never acknowledges it;
    // unregistering must finish it on its behalf.
    recv_timeout(&mut first_handle).await;
    let finished = dispatcher.unregister_receiver(first_endpoint).await;
    assert!(finished, "in-flight receiver finished during unregister");

    let next = recv_timeout(&mut second_handle).await;
    assert!(next.ordered);
    dispatcher.finish_receiver(second_endpoint, 0, None, None, false).await;

    dispatcher.stop();
}

#[tokio::test]
async fn dropping_the_endpoint_cleans_up_like_unregister() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    let _workers = dispatcher.start();

    let (sender, handle) = endpoint_pair();
    dispatcher
        .register_receiver(
            Caller::app("com.mortal", 100, 10_001, false),
            sender,
            IntentFilter::new("mortal.action"),
            None,
            0,
        )
        .await
        .unwrap();
    assert_eq!(dispatcher.snapshot().await.registered_endpoints, 1);

    drop(handle);

    // The liveness watch runs asynchronously; poll until it fires.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if dispatcher.snapshot().await.registered_endpoints == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "endpoint cleanup never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(dispatcher.snapshot().await.registered_filters, 0);

    dispatcher.stop();
}

// ═══════════════════════════════════════════════════════════════════════
//  Package-change self-exclusion
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn package_added_is_hidden_from_the_added_package() {
    let victim = ComponentName::new("com.victim", "InstallReceiver");
    let observer = ComponentName::new("com.observer", "InstallReceiver");
    let provider = InMemoryPackageProvider::new()
        .with_receiver(actions::PACKAGE_ADDED, victim.clone(), 0, ComponentFlags::empty(), 0)
        .with_receiver(actions::PACKAGE_ADDED, observer.clone(), 0, ComponentFlags::empty(), 0);
    let dispatcher = BroadcastDispatcher::new(Arc::new(provider));
    let _workers = dispatcher.start();

    let (victim_sender, mut victim_handle) = endpoint_pair();
    dispatcher.attach_component(victim, victim_sender, 400).await;
    let (observer_sender, mut observer_handle) = endpoint_pair();
    let observer_endpoint = observer_sender.id();
    dispatcher.attach_component(observer, observer_sender, 401).await;

    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new(actions::PACKAGE_ADDED).with_data("package:com.victim"),
            None,
            BroadcastOptions { user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    let delivery = recv_timeout(&mut observer_handle).await;
    assert_eq!(delivery.intent.scheme_specific_part(), Some("com.victim"));
    dispatcher.finish_receiver(observer_endpoint, 0, None, None, false).await;

    assert_no_delivery(&mut victim_handle).await;
    dispatcher.stop();
}

#[tokio::test]
async fn external_applications_available_skips_the_changed_packages() {
    let returned = ComponentName::new("com.returned", "MediaReceiver");
    let bystander = ComponentName::new("com.bystander", "MediaReceiver");
    let provider = InMemoryPackageProvider::new()
        .with_receiver(
            actions::EXTERNAL_APPLICATIONS_AVAILABLE,
            returned.clone(),
            0,
            ComponentFlags::empty(),
            0,
        )
        .with_receiver(
            actions::EXTERNAL_APPLICATIONS_AVAILABLE,
            bystander.clone(),
            0,
            ComponentFlags::empty(),
            0,
        );
    let dispatcher = BroadcastDispatcher::new(Arc::new(provider));
    let _workers = dispatcher.start();

    let (returned_sender, mut returned_handle) = endpoint_pair();
    dispatcher.attach_component(returned, returned_sender, 500).await;
    let (bystander_sender, mut bystander_handle) = endpoint_pair();
    let bystander_endpoint = bystander_sender.id();
    dispatcher.attach_component(bystander, bystander_sender, 501).await;

    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new(actions::EXTERNAL_APPLICATIONS_AVAILABLE).with_extra(
                actions::EXTRA_CHANGED_PACKAGE_LIST,
                ExtraValue::StringVec(vec!["com.returned".into()]),
            ),
            None,
            BroadcastOptions { user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    recv_timeout(&mut bystander_handle).await;
    dispatcher.finish_receiver(bystander_endpoint, 0, None, None, false).await;
    assert_no_delivery(&mut returned_handle).await;

    dispatcher.stop();
}

// ═══════════════════════════════════════════════════════════════════════
//  Boot queue
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn boot_queue_retires_after_its_wave_completes() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    let _workers = dispatcher.start();

    let (sender, mut handle) = endpoint_pair();
    dispatcher
        .register_receiver(
            Caller::app("com.listener", 100, 10_001, false),
            sender,
            IntentFilter::new(actions::BOOT_COMPLETED),
            None,
            0,
        )
        .await
        .unwrap();

    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new(actions::BOOT_COMPLETED),
            None,
            BroadcastOptions { user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();

    let wave = recv_timeout(&mut handle).await;
    assert!(wave.intent.flags.contains(IntentFlags::RECEIVER_BOOTING));

    // Retirement is observable once the worker finishes the wave.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = dispatcher.snapshot().await;
        if snapshot.queues[QueueKind::Booting as usize].retired {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "boot queue never retired");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A second boot-completed wave no longer routes to the retired queue.
    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new(actions::BOOT_COMPLETED),
            None,
            BroadcastOptions { user_id: 0, ..Default::default() },
        )
        .await
        .unwrap();
    let second = recv_timeout(&mut handle).await;
    assert!(!second.intent.flags.contains(IntentFlags::RECEIVER_BOOTING));

    dispatcher.stop();
}

// ═══════════════════════════════════════════════════════════════════════
//  Multi-user targeting
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn user_all_reaches_every_started_user() {
    let dispatcher = BroadcastDispatcher::new(Arc::new(InMemoryPackageProvider::new()));
    let _workers = dispatcher.start();
    dispatcher.set_started_users(vec![0, 10]).await;

    let (owner_sender, mut owner_handle) = endpoint_pair();
    dispatcher
        .register_receiver(
            Caller::app("com.listener", 100, uid_for_user(0, 10_001), false),
            owner_sender,
            IntentFilter::new("everyone.action"),
            None,
            0,
        )
        .await
        .unwrap();

    let (secondary_sender, mut secondary_handle) = endpoint_pair();
    dispatcher
        .register_receiver(
            Caller::app("com.listener", 101, uid_for_user(10, 10_001), false),
            secondary_sender,
            IntentFilter::new("everyone.action"),
            None,
            10,
        )
        .await
        .unwrap();

    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new("everyone.action"),
            None,
            BroadcastOptions { user_id: USER_ALL, ..Default::default() },
        )
        .await
        .unwrap();

    recv_timeout(&mut owner_handle).await;
    recv_timeout(&mut secondary_handle).await;

    // A single-user send reaches only its own user.
    dispatcher
        .broadcast_intent(
            Caller::system(),
            Intent::new("everyone.action"),
            None,
            BroadcastOptions { user_id: 10, ..Default::default() },
        )
        .await
        .unwrap();
    recv_timeout(&mut secondary_handle).await;
    assert_no_delivery(&mut owner_handle).await;

    dispatcher.stop();
}
