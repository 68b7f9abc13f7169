//! Domain policy list.
//!
//! Wildcard patterns grouped by category, loaded from plain text lists
//! (one pattern per line, `#` starts a comment). Lookups scan every pattern
//! in load order and the first match wins; the classification cache in front
//! of this keeps hot domains off the scan.

use std::fs;
use std::path::Path;

use tracing::info;

use super::{DomainClassification, wildcard};
use crate::error::{GatewayError, Result};

/// Source of truth for domain classification.
///
/// The engines only ever ask this through the classification cache.
pub trait PolicySource: Send + Sync {
    /// Returns the category of the first pattern matching `domain`, if any.
    fn classify(&self, domain: &str) -> Option<DomainClassification>;
}

/// List files read by [`PolicyList::load_dir`], in lookup order.
pub const POLICY_FILES: [(&str, DomainClassification); 4] = [
    ("ads.txt", DomainClassification::Ads),
    ("nsfw.txt", DomainClassification::Nsfw),
    ("scam.txt", DomainClassification::Scam),
    ("proxy-list.txt", DomainClassification::ProxyAllowed),
];

struct PolicyEntry {
    pattern: String,
    classification: DomainClassification,
}

/// An ordered list of `(pattern, classification)` pairs.
#[derive(Default)]
pub struct PolicyList {
    entries: Vec<PolicyEntry>,
}

impl PolicyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every list in [`POLICY_FILES`] from `dir`. Missing files are
    /// treated as empty lists; unreadable ones are an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut list = Self::new();

        for (name, classification) in POLICY_FILES {
            let path = dir.join(name);
            if !path.exists() {
                continue;
            }
            let contents = fs::read_to_string(&path).map_err(|source| GatewayError::PolicyLoad {
                path: path.clone(),
                source,
            })?;
            let added = list.extend_from_str(&contents, classification);
            info!(path = %path.display(), patterns = added, "loaded policy list");
        }

        Ok(list)
    }

    /// Parse `contents` line by line, appending each pattern under
    /// `classification`. Returns the number of patterns added.
    pub fn extend_from_str(&mut self, contents: &str, classification: DomainClassification) -> usize {
        let before = self.entries.len();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.push(line, classification);
        }
        self.entries.len() - before
    }

    pub fn push(&mut self, pattern: &str, classification: DomainClassification) {
        self.entries.push(PolicyEntry {
            pattern: pattern.to_lowercase(),
            classification,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PolicySource for PolicyList {
    fn classify(&self, domain: &str) -> Option<DomainClassification> {
        self.entries
            .iter()
            .find(|entry| wildcard::is_match(&entry.pattern, domain))
            .map(|entry| entry.classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PolicyList {
        let mut list = PolicyList::new();
        list.extend_from_str(
            "# ad networks\n*.doubleclick.net\n\nads.example.com\n",
            DomainClassification::Ads,
        );
        list.extend_from_str("*casino*\n", DomainClassification::Scam);
        list.extend_from_str("*.example.com\n", DomainClassification::ProxyAllowed);
        list
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        assert_eq!(sample().len(), 4);
    }

    #[test]
    fn classify_wildcard_match() {
        let list = sample();

        assert_eq!(list.classify("stats.g.doubleclick.net"), Some(DomainClassification::Ads));
        assert_eq!(list.classify("bestcasino.io"), Some(DomainClassification::Scam));
    }

    #[test]
    fn classify_first_match_wins() {
        let list = sample();

        assert_eq!(list.classify("ads.example.com"), Some(DomainClassification::Ads));
        assert_eq!(
            list.classify("video.example.com"),
            Some(DomainClassification::ProxyAllowed)
        );
    }

    #[test]
    fn classify_is_case_insensitive() {
        let list = sample();

        assert_eq!(list.classify("ADS.Example.COM"), Some(DomainClassification::Ads));
    }

    #[test]
    fn classify_returns_none_for_unlisted_domains() {
        assert_eq!(sample().classify("github.com"), None);
        assert_eq!(PolicyList::new().classify("github.com"), None);
    }

    #[test]
    fn load_dir_reads_lists_in_order() {
        let dir = std::env::temp_dir().join(format!("edgeguard-policy-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("nsfw.txt"), "*.adult.example\n").unwrap();
        fs::write(dir.join("proxy-list.txt"), "*.example\n").unwrap();

        let list = PolicyList::load_dir(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list.classify("www.adult.example"), Some(DomainClassification::Nsfw));
        assert_eq!(list.classify("www.example"), Some(DomainClassification::ProxyAllowed));
    }
}
