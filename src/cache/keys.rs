//! Cache key helpers
//!
//! L1 is keyed by the bare normalized pointer. L2 is shared with other
//! replicas and services, so its keys carry a namespace prefix.

use crate::types::normalize_pointer;

/// Namespace prefix for profile entries in the distributed cache
pub const PROFILE_KEY_PREFIX: &str = "profile.";

/// L1 key for a pointer
pub fn hot_key(pointer: &str) -> String {
    normalize_pointer(pointer)
}

/// L2 key for a pointer
pub fn profile_key(pointer: &str) -> String {
    format!("{}{}", PROFILE_KEY_PREFIX, normalize_pointer(pointer))
}

/// Recover the pointer from an L2 key
pub fn pointer_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(PROFILE_KEY_PREFIX)
}
