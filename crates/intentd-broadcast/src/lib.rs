//! Broadcast dispatch core for intentd.
//!
//! This crate is the host-runtime side of broadcast delivery:
//!
//! - **[`dispatcher`]** -- [`BroadcastDispatcher`]: queue selection, sticky
//!   validation, receiver resolution and merging, and the five queue
//!   workers that perform ordered and parallel delivery.
//! - **[`queue`]** -- the per-queue state: two lanes, the in-flight
//!   cursor, and the one-shot retirement of the boot queue.
//! - **[`resolver`]** / **[`filter`]** -- the registered-receiver registry.
//! - **[`sticky`]** -- retained broadcasts replayed to new registrants.
//! - **[`endpoint`]** -- the IPC seam to receiver processes; channel
//!   closure doubles as the death notification.
//! - **[`pending`]** -- de-duplicated deferred-send records.
//! - **[`provider`]** -- the package-service seam.
//! - **[`history`]** -- bounded rings of finished broadcasts for dumps.
//!
//! All mutation happens under one dispatcher-wide mutex; enqueueing returns
//! immediately and delivery runs on per-queue worker tasks.

pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod history;
pub mod pending;
pub mod provider;
pub mod queue;
pub mod record;
pub mod resolver;
pub mod sticky;

pub use dispatcher::{
    BroadcastDispatcher, DispatchSnapshot, DispatcherConfig, PERMISSION_BROADCAST_STICKY,
    QueueSnapshot, UidKind,
};
pub use endpoint::{Delivery, EndpointHandle, EndpointId, ReceiverEndpoint, endpoint_pair};
pub use error::{BroadcastError, Result};
pub use filter::{BroadcastFilter, ReceiverList};
pub use pending::{
    PendingFlags, PendingIntentRecord, PendingIntentRegistry, PendingKey, PendingKind,
    PendingTargets,
};
pub use provider::{
    ApplicationInfo, ComponentFlags, InMemoryPackageProvider, PackageProvider, ProviderError,
    ResolvedComponent,
};
pub use queue::QueueKind;
pub use record::{BroadcastOptions, BroadcastRecord, Caller, CallerApp, Receiver};
