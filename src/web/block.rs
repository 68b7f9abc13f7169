//! Block pages for NSFW, ads and scam domains.

use std::sync::Arc;

use tracing::info;

use super::{WebApp, WebRequest, WebResponse};
use crate::cache::DecisionCaches;
use crate::filter::DomainClassification;

const ADS_PAGE: &str = include_str!("pages/ads.html");
const NSFW_PAGE: &str = include_str!("pages/nsfw.html");
const SCAM_PAGE: &str = include_str!("pages/scam.html");

/// Warning page for one blocked category.
///
/// `POST /ignore` records consent for the requested host and the client
/// address, after which both the DNS engine and the router let that client
/// through to that host.
pub struct BlockPage {
    category: DomainClassification,
    caches: Arc<DecisionCaches>,
}

impl BlockPage {
    pub fn new(category: DomainClassification, caches: Arc<DecisionCaches>) -> Self {
        Self { category, caches }
    }

    pub fn category(&self) -> DomainClassification {
        self.category
    }

    fn page(&self) -> Option<&'static str> {
        match self.category {
            DomainClassification::Ads => Some(ADS_PAGE),
            DomainClassification::Nsfw => Some(NSFW_PAGE),
            DomainClassification::Scam => Some(SCAM_PAGE),
            DomainClassification::ProxyAllowed | DomainClassification::Unlisted => None,
        }
    }
}

impl WebApp for BlockPage {
    fn handle(&self, request: &WebRequest) -> WebResponse {
        if request.method == "POST" && request.path == "/ignore" {
            let Some(host) = request.host() else {
                return WebResponse::new(400);
            };
            info!(domain = %host, client = %request.client_ip, "block warning dismissed");
            self.caches.consent.add(&host, request.client_ip);
            return WebResponse::new(200);
        }

        match self.page() {
            Some(page) => WebResponse::html(403, page),
            None => WebResponse::new(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn request(method: &str, path: &str, host: &str) -> WebRequest {
        WebRequest {
            method: method.to_string(),
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: vec![("Host".to_string(), host.to_string())],
            body: String::new(),
            client_ip: "10.0.0.2".parse().unwrap(),
        }
    }

    #[test]
    fn serves_category_page_with_403() {
        let app = BlockPage::new(DomainClassification::Scam, Arc::new(DecisionCaches::new()));
        let response = app.handle(&request("GET", "/", "bad.test"));

        assert_eq!(response.status, 403);
        assert_eq!(response.body, SCAM_PAGE);
    }

    #[test]
    fn ignore_records_consent_for_that_host_only() {
        let caches = Arc::new(DecisionCaches::new());
        let app = BlockPage::new(DomainClassification::Ads, caches.clone());
        let client: IpAddr = "10.0.0.2".parse().unwrap();

        let response = app.handle(&request("POST", "/ignore", "Ads.Example.com:80"));

        assert_eq!(response.status, 200);
        assert!(caches.consent.contains("ads.example.com", client));
        assert!(!caches.consent.contains("other.example.com", client));
    }

    #[test]
    fn get_ignore_does_not_record_consent() {
        let caches = Arc::new(DecisionCaches::new());
        let app = BlockPage::new(DomainClassification::Ads, caches.clone());

        assert_eq!(app.handle(&request("GET", "/ignore", "ads.example.com")).status, 403);
        assert!(!caches.consent.contains("ads.example.com", "10.0.0.2".parse().unwrap()));
    }
}
