//! Management panel: admin login and hotspot user administration.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha512};
use tracing::{info, warn};

use super::portal::LoginRequest;
use super::{HotspotUser, UserDirectory, WebApp, WebRequest, WebResponse};
use crate::cache::DecisionCaches;

const MANAGEMENT_PAGE: &str = include_str!("pages/management.html");

/// Header carrying the admin token on `/users` requests.
pub const AUTH_HEADER: &str = "Auth";

/// Lowercase hex SHA-512 of `password`. The management page hashes the
/// admin password client-side and sends this digest.
pub fn admin_token(password: &str) -> String {
    format!("{:x}", Sha512::digest(password.as_bytes()))
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UserStatus {
    id: u32,
    username: String,
    status: &'static str,
}

pub struct PanelApp {
    admin_username: String,
    admin_token: String,
    users: Arc<UserDirectory>,
    caches: Arc<DecisionCaches>,
}

impl PanelApp {
    pub fn new(
        admin_username: &str,
        admin_password: &str,
        users: Arc<UserDirectory>,
        caches: Arc<DecisionCaches>,
    ) -> Self {
        Self {
            admin_username: admin_username.to_string(),
            admin_token: admin_token(admin_password),
            users,
            caches,
        }
    }

    fn login(&self, request: &WebRequest) -> WebResponse {
        let Ok(credentials) = serde_json::from_str::<LoginRequest>(&request.body) else {
            return WebResponse::new(400);
        };
        if credentials.username == self.admin_username && credentials.password == self.admin_token {
            info!(client = %request.client_ip, "panel login");
            WebResponse::new(200)
        } else {
            warn!(client = %request.client_ip, "panel login failed");
            WebResponse::new(401)
        }
    }

    fn users(&self, request: &WebRequest) -> WebResponse {
        if request.header(AUTH_HEADER) != Some(self.admin_token.as_str()) {
            return WebResponse::new(403);
        }

        match request.method.as_str() {
            "GET" => self.list_users(),
            "POST" => self.add_user(request),
            "DELETE" => self.delete_user(request),
            _ => WebResponse::new(400),
        }
    }

    fn list_users(&self) -> WebResponse {
        let statuses: Vec<UserStatus> = self
            .users
            .list()
            .into_iter()
            .map(|user| UserStatus {
                status: if self.caches.sessions.contains_user(&user.username) {
                    "online"
                } else {
                    "offline"
                },
                id: user.id,
                username: user.username,
            })
            .collect();

        match serde_json::to_string(&statuses) {
            Ok(body) => WebResponse::json(200, body),
            Err(_) => WebResponse::new(500),
        }
    }

    fn add_user(&self, request: &WebRequest) -> WebResponse {
        let Ok(user) = serde_json::from_str::<HotspotUser>(&request.body) else {
            return WebResponse::new(400);
        };
        match self.users.add(&user.username, &user.password) {
            Ok(id) => {
                info!(user = %user.username, id, "hotspot user added");
                WebResponse::json(200, format!("{{\"Id\":{id}}}"))
            }
            Err(e) => WebResponse::new(400).with_body(e.to_string()),
        }
    }

    fn delete_user(&self, request: &WebRequest) -> WebResponse {
        let Ok(id) = request.body.trim().parse::<u32>() else {
            return WebResponse::new(400);
        };
        match self.users.remove(id) {
            Some(user) => {
                self.caches.sessions.remove_login(&user.username);
                info!(user = %user.username, id, "hotspot user removed");
                WebResponse::new(200)
            }
            None => WebResponse::new(404),
        }
    }
}

impl WebApp for PanelApp {
    fn handle(&self, request: &WebRequest) -> WebResponse {
        match request.path.as_str() {
            "/login" if request.method == "POST" => self.login(request),
            "/users" => self.users(request),
            _ => WebResponse::html(200, MANAGEMENT_PAGE),
        }
    }
}
