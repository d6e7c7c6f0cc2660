//! Group Registry
//!
//! Maps group ids to their admin and member set.
//!
//! ## Design
//!
//! - Explicit creation: a group exists only after `create`, and ids are never
//!   reused
//! - Immutable membership: there is no add or leave; a new member set means
//!   a new group
//! - Self-membership: the admin is always a member, whether or not the caller
//!   listed them

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Mutex, PoisonError},
};

/// A registered group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Group identity.
    pub group_id: String,
    /// Creator.
    pub admin: String,
    /// Members, admin included.
    pub members: BTreeSet<String>,
}

impl Group {
    /// True if `client_id` belongs to this group.
    pub fn contains(&self, client_id: &str) -> bool {
        self.members.contains(client_id)
    }

    /// Members other than `sender`, in sorted order.
    pub fn recipients_except<'a>(&'a self, sender: &'a str) -> impl Iterator<Item = &'a str> {
        self.members.iter().map(String::as_str).filter(move |member| *member != sender)
    }
}

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    /// `create` for an id that is already registered.
    #[error("group already exists: {0}")]
    AlreadyExists(String),

    /// No group with this id.
    #[error("group not found: {0}")]
    NotFound(String),

    /// Sender is not in the group.
    #[error("{client_id} is not a member of {group_id}")]
    NotMember {
        /// Target group.
        group_id: String,
        /// Rejected sender.
        client_id: String,
    },
}

/// Registry of every group created on this relay. Volatile.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: Mutex<HashMap<String, Group>>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group.
    ///
    /// Duplicate members collapse and `admin` is added if missing.
    ///
    /// # Errors
    ///
    /// Returns `GroupError::AlreadyExists` if `group_id` is taken.
    pub fn create<I>(&self, group_id: &str, members: I, admin: &str) -> Result<Group, GroupError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);

        if groups.contains_key(group_id) {
            return Err(GroupError::AlreadyExists(group_id.to_string()));
        }

        let mut members: BTreeSet<String> = members.into_iter().collect();
        members.insert(admin.to_string());

        let group =
            Group { group_id: group_id.to_string(), admin: admin.to_string(), members };
        groups.insert(group_id.to_string(), group.clone());

        Ok(group)
    }

    /// Look up a group.
    pub fn get(&self, group_id: &str) -> Result<Group, GroupError> {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group_id)
            .cloned()
            .ok_or_else(|| GroupError::NotFound(group_id.to_string()))
    }

    /// Member set of a group.
    pub fn members_of(&self, group_id: &str) -> Result<BTreeSet<String>, GroupError> {
        self.get(group_id).map(|group| group.members)
    }

    /// True if the group exists and `client_id` is in it.
    pub fn is_member(&self, group_id: &str, client_id: &str) -> bool {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group_id)
            .is_some_and(|group| group.contains(client_id))
    }

    /// Resolve the group a member may send to.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown group, `NotMember` if `client_id` is not in it.
    pub fn authorize_sender(&self, group_id: &str, client_id: &str) -> Result<Group, GroupError> {
        let group = self.get(group_id)?;
        if !group.contains(client_id) {
            return Err(GroupError::NotMember {
                group_id: group_id.to_string(),
                client_id: client_id.to_string(),
            });
        }
        Ok(group)
    }

    /// Every group id, sorted.
    pub fn group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> =
            self.groups.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if no group has been created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn create_adds_missing_admin() {
        let registry = GroupRegistry::new();
        let group = registry.create("g1", names(&["bob"]), "alice").unwrap();

        assert!(group.contains("alice"));
        assert!(registry.is_member("g1", "alice"));
        assert!(registry.is_member("g1", "bob"));
    }

    #[test]
    fn duplicate_members_collapse() {
        let registry = GroupRegistry::new();
        registry.create("g1", names(&["alice", "bob", "bob"]), "alice").unwrap();

        assert_eq!(registry.members_of("g1").unwrap().len(), 2);
    }

    #[test]
    fn create_rejects_taken_id() {
        let registry = GroupRegistry::new();
        registry.create("g1", names(&["bob"]), "alice").unwrap();

        let result = registry.create("g1", names(&["carol"]), "dave");

        assert_eq!(result, Err(GroupError::AlreadyExists("g1".to_string())));
        assert!(!registry.is_member("g1", "carol"));
    }

    #[test]
    fn members_of_unknown_group_is_not_found() {
        let registry = GroupRegistry::new();
        assert_eq!(registry.members_of("nope"), Err(GroupError::NotFound("nope".to_string())));
        assert!(!registry.is_member("nope", "alice"));
    }

    #[test]
    fn authorize_sender_distinguishes_failures() {
        let registry = GroupRegistry::new();
        registry.create("g1", names(&["bob"]), "alice").unwrap();

        assert!(registry.authorize_sender("g1", "bob").is_ok());
        assert!(matches!(
            registry.authorize_sender("g1", "mallory"),
            Err(GroupError::NotMember { .. })
        ));
        assert!(matches!(registry.authorize_sender("g2", "bob"), Err(GroupError::NotFound(_))));
    }

    #[test]
    fn recipients_exclude_sender() {
        let registry = GroupRegistry::new();
        let group = registry.create("g1", names(&["bob", "carol"]), "alice").unwrap();

        let recipients: Vec<_> = group.recipients_except("bob").collect();
        assert_eq!(recipients, vec!["alice", "carol"]);
    }

    #[test]
    fn group_ids_are_sorted() {
        let registry = GroupRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.create(id, names(&["x"]), "y").unwrap();
        }

        assert_eq!(registry.group_ids(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.len(), 3);
    }
}
