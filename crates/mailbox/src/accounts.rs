//! Registered users and chat groups.

use dashmap::{DashMap, DashSet};
use parley_core::error::MailboxError;
use std::collections::HashMap;
use tracing::info;

/// Who may talk to the agent, and which groups they belong to.
///
/// Seeded from configuration; users and groups can be added at runtime.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    users: DashSet<String>,
    groups: DashMap<String, Vec<String>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(users: &[String], groups: &HashMap<String, Vec<String>>) -> Self {
        let registry = Self::new();
        for user in users {
            registry.register_user(user);
        }
        for (group, members) in groups {
            registry.register_group(group, members.clone());
        }
        registry
    }

    pub fn register_user(&self, user_id: &str) {
        if self.users.insert(user_id.to_string()) {
            info!(user_id, "Registered user");
        }
    }

    pub fn register_group(&self, group_id: &str, members: Vec<String>) {
        info!(group_id, members = members.len(), "Registered chat group");
        self.groups.insert(group_id.to_string(), members);
    }

    pub fn is_user(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }

    pub fn is_group(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    pub fn is_group_member(&self, group_id: &str, user_id: &str) -> bool {
        self.groups
            .get(group_id)
            .is_some_and(|members| members.iter().any(|m| m == user_id))
    }

    /// Check that `user_id` may send, optionally on behalf of a group.
    pub fn check_sender(
        &self,
        user_id: &str,
        group_id: Option<&str>,
    ) -> Result<(), MailboxError> {
        if !self.is_user(user_id) {
            return Err(MailboxError::UnregisteredUser(user_id.to_string()));
        }
        if let Some(group_id) = group_id
            && !self.is_group_member(group_id, user_id)
        {
            return Err(MailboxError::NotGroupMember {
                user_id: user_id.to_string(),
                group_id: group_id.to_string(),
            });
        }
        Ok(())
    }
}
