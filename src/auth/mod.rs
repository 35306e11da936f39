//! Role resolution
//!
//! Implements the three-tier trust model: the owner is identified by a
//! committed one-way hash, admins by membership in a mutable list, and
//! everyone else is a plain user. Checks return plain values and never
//! fail; permission errors are produced by the pipeline, not here.

use std::collections::HashSet;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Trust tier of a sender. Ordered: `User < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    User,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    /// Whether this role meets or exceeds `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        *self >= required
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One-way hash of a subject id, hex-encoded SHA-256.
///
/// The committed owner hash in configuration is produced by this function
/// (see `banter hash-id`).
pub fn hash_subject(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

/// Timing-safe string equality.
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut out = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        out |= x ^ y;
    }
    out == 0
}

/// Resolves sender ids to roles.
///
/// The owner hash is loaded once at startup and never mutated at runtime;
/// the admin set is amended only through owner-gated commands that persist
/// before the in-memory set changes.
#[derive(Debug)]
pub struct RoleGuard {
    owner_hash: Option<String>,
    admins: RwLock<HashSet<String>>,
}

impl RoleGuard {
    pub fn new(
        owner_hash: Option<String>,
        admins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            owner_hash: owner_hash.filter(|h| !h.trim().is_empty()),
            admins: RwLock::new(admins.into_iter().collect()),
        }
    }

    /// Whether `sender_id` matches the committed owner hash.
    ///
    /// Empty input or a missing committed hash resolve to false; this
    /// never errors.
    pub fn is_owner(&self, sender_id: &str) -> bool {
        if sender_id.is_empty() {
            return false;
        }
        match &self.owner_hash {
            Some(committed) => timing_safe_eq(&hash_subject(sender_id), committed),
            None => false,
        }
    }

    /// Whether `sender_id` is in the admin list.
    pub fn is_admin(&self, sender_id: &str) -> bool {
        self.admins.read().contains(sender_id)
    }

    /// Resolve the sender's role. Exactly one role per evaluation; owner
    /// wins over admin membership.
    pub fn role_of(&self, sender_id: &str) -> Role {
        if self.is_owner(sender_id) {
            Role::Owner
        } else if self.is_admin(sender_id) {
            Role::Admin
        } else {
            Role::User
        }
    }

    /// Add to the in-memory admin set. Callers persist to the config store
    /// first; this only commits the already-persisted change.
    pub fn add_admin(&self, sender_id: impl Into<String>) -> bool {
        self.admins.write().insert(sender_id.into())
    }

    /// Remove from the in-memory admin set.
    pub fn remove_admin(&self, sender_id: &str) -> bool {
        self.admins.write().remove(sender_id)
    }

    /// Current admin ids, sorted.
    pub fn admins(&self) -> Vec<String> {
        let mut admins: Vec<String> = self.admins.read().iter().cloned().collect();
        admins.sort();
        admins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_with_owner(owner_id: &str) -> RoleGuard {
        RoleGuard::new(Some(hash_subject(owner_id)), ["admin1".to_string()])
    }

    #[test]
    fn test_timing_safe_eq() {
        assert!(timing_safe_eq("abc", "abc"));
        assert!(!timing_safe_eq("abc", "abd"));
        assert!(!timing_safe_eq("abc", "ab"));
        assert!(timing_safe_eq("", ""));
    }

    #[test]
    fn test_owner_matches_committed_hash() {
        let guard = guard_with_owner("owner1");
        assert!(guard.is_owner("owner1"));
        assert_eq!(guard.role_of("owner1"), Role::Owner);
    }

    #[test]
    fn test_non_owner_ids_never_match() {
        let guard = guard_with_owner("owner1");
        for id in ["owner2", "OWNER1", "", " ", "owner1 ", "\u{0}owner1"] {
            assert!(!guard.is_owner(id), "id {:?} must not be owner", id);
        }
    }

    #[test]
    fn test_missing_committed_hash_resolves_to_not_owner() {
        let guard = RoleGuard::new(None, []);
        assert!(!guard.is_owner("anyone"));

        let guard = RoleGuard::new(Some("  ".to_string()), []);
        assert!(!guard.is_owner("anyone"));
    }

    #[test]
    fn test_admin_membership() {
        let guard = guard_with_owner("owner1");
        assert_eq!(guard.role_of("admin1"), Role::Admin);
        assert_eq!(guard.role_of("stranger"), Role::User);
    }

    #[test]
    fn test_owner_wins_over_admin_membership() {
        let guard = RoleGuard::new(
            Some(hash_subject("owner1")),
            ["owner1".to_string()],
        );
        assert_eq!(guard.role_of("owner1"), Role::Owner);
    }

    #[test]
    fn test_admin_list_mutation() {
        let guard = guard_with_owner("owner1");
        assert!(guard.add_admin("admin2"));
        assert!(!guard.add_admin("admin2"));
        assert_eq!(guard.admins(), vec!["admin1", "admin2"]);

        assert!(guard.remove_admin("admin1"));
        assert!(!guard.remove_admin("admin1"));
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner.satisfies(Role::Admin));
        assert!(Role::Owner.satisfies(Role::Owner));
        assert!(Role::Admin.satisfies(Role::User));
        assert!(!Role::Admin.satisfies(Role::Owner));
        assert!(!Role::User.satisfies(Role::Admin));
    }
}
