//! Hotspot user accounts.
//!
//! Kept in memory for the lifetime of the process; seeded from the command
//! line and edited through the panel.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct HotspotUser {
    #[serde(default)]
    pub id: u32,
    #[serde(alias = "username")]
    pub username: String,
    #[serde(alias = "password", skip_serializing)]
    pub password: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UserError {
    #[error("user {0:?} already exists")]
    Duplicate(String),
    #[error("username and password must not be empty")]
    Empty,
}

#[derive(Default)]
struct Users {
    next_id: u32,
    list: Vec<HotspotUser>,
}

#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<Users>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, returning its id. Usernames are unique, ignoring case.
    pub fn add(&self, username: &str, password: &str) -> Result<u32, UserError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(UserError::Empty);
        }

        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        if users.list.iter().any(|u| u.username.eq_ignore_ascii_case(username)) {
            return Err(UserError::Duplicate(username.to_string()));
        }
        users.next_id += 1;
        let id = users.next_id;
        users.list.push(HotspotUser {
            id,
            username: username.to_string(),
            password: password.to_string(),
        });
        Ok(id)
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users
            .list
            .iter()
            .any(|u| u.username.eq_ignore_ascii_case(username.trim()) && u.password == password)
    }

    /// Remove the user with `id`, returning it.
    pub fn remove(&self, id: u32) -> Option<HotspotUser> {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        let index = users.list.iter().position(|u| u.id == id)?;
        Some(users.list.remove(index))
    }

    pub fn list(&self) -> Vec<HotspotUser> {
        self.users.read().unwrap_or_else(|e| e.into_inner()).list.clone()
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
