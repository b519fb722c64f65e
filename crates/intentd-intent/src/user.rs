//! User and uid helpers.
//!
//! intentd runs a multi-user model: every broadcast and every registered
//! receiver is owned by a user. `USER_ALL` is the wildcard target used by
//! system senders that address every started user at once.

/// Identifier of a user on the device.
pub type UserId = i32;

/// Wildcard user: the operation targets (or is owned by) all users.
pub const USER_ALL: UserId = -1;

/// The primary (first) user.
pub const USER_OWNER: UserId = 0;

/// Uid of the system server itself.
pub const SYSTEM_UID: u32 = 1000;

/// Uid of the debugging shell.
pub const SHELL_UID: u32 = 2000;

/// First uid assigned to an installed application.
pub const FIRST_APPLICATION_UID: u32 = 10_000;

/// Last uid assigned to an installed application.
pub const LAST_APPLICATION_UID: u32 = 19_999;

/// Size of the uid range reserved per user.
pub const PER_USER_RANGE: u32 = 100_000;

/// Whether `uid` belongs to an installed application (as opposed to the
/// system, shell, or another reserved range).
pub fn is_app_uid(uid: u32) -> bool {
    let app_id = uid % PER_USER_RANGE;
    (FIRST_APPLICATION_UID..=LAST_APPLICATION_UID).contains(&app_id)
}

/// The user a uid belongs to.
pub fn user_of_uid(uid: u32) -> UserId {
    (uid / PER_USER_RANGE) as UserId
}

/// Compose a uid from a user and a per-user app id.
pub fn uid_for_user(user_id: UserId, app_id: u32) -> u32 {
    user_id as u32 * PER_USER_RANGE + app_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_uid_ranges() {
        assert!(!is_app_uid(SYSTEM_UID));
        assert!(!is_app_uid(SHELL_UID));
        assert!(is_app_uid(FIRST_APPLICATION_UID));
        assert!(is_app_uid(10_123));
        assert!(!is_app_uid(20_000));
        // Same app id in a secondary user is still an app uid.
        assert!(is_app_uid(uid_for_user(10, 10_123)));
    }

    #[test]
    fn uid_user_round_trip() {
        let uid = uid_for_user(10, 10_001);
        assert_eq!(uid, 1_010_001);
        assert_eq!(user_of_uid(uid), 10);
        assert_eq!(user_of_uid(10_001), USER_OWNER);
    }
}
