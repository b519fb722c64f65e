//! Broadcast dispatch error types.
//!
//! All public APIs of this crate surface failures through
//! [`BroadcastError`]. Violations of the sticky-broadcast rules and of the
//! receiver-registration consistency checks are returned synchronously to
//! the caller; they are never deferred into a queue.

use intentd_intent::UserId;

/// Unified error type for the broadcast dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    // -- Sticky sends -------------------------------------------------------
    /// The caller lacks a permission the operation requires.
    #[error("permission denial: {permission} required (pid={pid}, uid={uid})")]
    PermissionDenied { permission: String, pid: u32, uid: u32 },

    /// Sticky broadcasts cannot also enforce a receiver permission.
    #[error("sticky broadcast cannot enforce permission `{permission}`")]
    StickyCannotHavePermission { permission: String },

    /// Sticky broadcasts cannot target a specific component.
    #[error("sticky broadcast cannot target a specific component")]
    StickyCannotTargetComponent,

    /// A per-user sticky conflicts with an all-user sticky of the same
    /// action (or vice versa).
    #[error("sticky broadcast for action `{action}` conflicts across user {user} and all users")]
    StickyConflict { action: String, user: UserId },

    // -- Receiver registration ----------------------------------------------
    /// The registering caller claims a package it is not running as.
    #[error("caller package `{package}` is not running in the calling process")]
    CallerPackageMismatch { package: String },

    /// An endpoint attempted to re-register with a different identity.
    #[error("endpoint re-registered with a different {what} ({previous} -> {requested})")]
    RegistrationMismatch { what: &'static str, previous: i64, requested: i64 },

    // -- Pending intents ----------------------------------------------------
    /// The pending-intent record was canceled before this send.
    #[error("pending intent has been canceled")]
    PendingIntentCanceled,

    /// A one-shot pending intent was sent a second time.
    #[error("one-shot pending intent was already sent")]
    PendingIntentAlreadySent,
}

/// Convenience alias used throughout the broadcast crate.
pub type Result<T> = std::result::Result<T, BroadcastError>;
