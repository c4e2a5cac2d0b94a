//! Mapping between cloud users and unix identities.

use std::collections::HashMap;

use fsbridge_protocol::IdentityLookup;

use crate::config::UserEntry;
use crate::error::{BridgeError, Result};

/// Unix identity a helper process runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixIdentity {
    pub cloud_user: String,
    pub unix_user: String,
    pub uid: u32,
    pub gid: u32,
}

/// Two-way user table built from configuration.
#[derive(Debug, Clone, Default)]
pub struct UserTable {
    by_cloud: HashMap<String, UnixIdentity>,
    by_uid: HashMap<u32, String>,
}

impl UserTable {
    pub fn new(entries: &[UserEntry]) -> Self {
        let mut table = Self::default();
        for entry in entries {
            table.insert(entry);
        }
        table
    }

    /// Add or replace a mapping. A later entry for the same uid wins the
    /// reverse lookup.
    pub fn insert(&mut self, entry: &UserEntry) {
        let identity = UnixIdentity {
            cloud_user: entry.cloud_user.clone(),
            unix_user: entry
                .unix_user
                .clone()
                .unwrap_or_else(|| entry.cloud_user.clone()),
            uid: entry.uid,
            gid: entry.gid,
        };
        self.by_uid.insert(identity.uid, identity.cloud_user.clone());
        self.by_cloud.insert(identity.cloud_user.clone(), identity);
    }

    pub fn identity(&self, cloud_user: &str) -> Result<&UnixIdentity> {
        self.by_cloud
            .get(cloud_user)
            .ok_or_else(|| BridgeError::UnknownUser(cloud_user.to_string()))
    }

    pub fn cloud_user(&self, uid: u32) -> Option<&str> {
        self.by_uid.get(&uid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_cloud.is_empty()
    }
}

impl IdentityLookup for UserTable {
    fn user_name(&self, uid: u32) -> Option<String> {
        self.cloud_user(uid).map(str::to_string)
    }
}
