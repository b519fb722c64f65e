//! Intent data model for intentd.
//!
//! This crate defines the addressed-message vocabulary shared by the
//! dispatch and process subsystems:
//!
//! - **[`intent`]** -- [`Intent`]: an addressed message with action, data
//!   URI, component, flag word, and typed extras, plus the well-known
//!   action constants in [`actions`].
//! - **[`filter`]** -- [`IntentFilter`]: the matching rules a receiver
//!   registers, with a priority used for ordered delivery.
//! - **[`extras`]** -- [`Extras`]: a typed key/value payload map.
//! - **[`user`]** -- user-id and uid helpers for the multi-user model.
//!
//! Everything here is plain data: `Clone + Send + Sync`, serde-serializable,
//! and free of runtime dependencies.

pub mod extras;
pub mod filter;
pub mod intent;
pub mod user;

pub use extras::{ExtraValue, Extras};
pub use filter::IntentFilter;
pub use intent::{ComponentName, Intent, IntentFlags, actions};
pub use user::{USER_ALL, USER_OWNER, UserId};
