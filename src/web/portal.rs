//! Captive-portal login.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use super::{UserDirectory, WebApp, WebRequest, WebResponse};
use crate::cache::DecisionCaches;

const LOGIN_PAGE: &str = include_str!("pages/login.html");

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct LoginRequest {
    #[serde(alias = "username")]
    pub username: String,
    #[serde(alias = "password")]
    pub password: String,
}

/// Serves the login page and opens a session on `POST /login`.
pub struct PortalApp {
    users: Arc<UserDirectory>,
    caches: Arc<DecisionCaches>,
}

impl PortalApp {
    pub fn new(users: Arc<UserDirectory>, caches: Arc<DecisionCaches>) -> Self {
        Self { users, caches }
    }
}

impl WebApp for PortalApp {
    fn handle(&self, request: &WebRequest) -> WebResponse {
        if request.method == "POST" && request.path == "/login" {
            let Ok(credentials) = serde_json::from_str::<LoginRequest>(&request.body) else {
                return WebResponse::new(400).with_header("Content-Type", "text/html");
            };

            if !self.users.verify(&credentials.username, &credentials.password) {
                warn!(user = %credentials.username, client = %request.client_ip, "portal login failed");
                return WebResponse::new(401).with_header("Content-Type", "text/html");
            }

            info!(user = %credentials.username, client = %request.client_ip, "portal login");
            self.caches.sessions.set_login(&credentials.username, request.client_ip);
            return WebResponse::new(200).with_header("Content-Type", "text/html");
        }

        WebResponse::html(200, LOGIN_PAGE)
    }
}
