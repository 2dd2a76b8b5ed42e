//! Single-use download tokens with a bounded lifetime.
//!
//! `save-results` issues a token bound to a generated file path; the
//! download endpoint claims it exactly once. Expired entries are purged
//! opportunistically on every issue/claim.

use dashmap::DashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

struct DownloadEntry {
    path: PathBuf,
    expires_at: Instant,
}

pub struct DownloadTokens {
    entries: DashMap<String, DownloadEntry>,
    ttl: Duration,
}

impl DownloadTokens {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Issue a fresh token for a file path.
    pub fn issue(&self, path: PathBuf) -> String {
        self.purge_expired();
        let token = uuid::Uuid::new_v4().to_string();
        self.entries.insert(
            token.clone(),
            DownloadEntry {
                path,
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    /// Claim a token, consuming it. Returns `None` for unknown, already
    /// claimed, or expired tokens.
    pub fn claim(&self, token: &str) -> Option<PathBuf> {
        self.purge_expired();
        self.entries.remove(token).map(|(_, entry)| entry.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_single_use() {
        let tokens = DownloadTokens::new(Duration::from_secs(60));
        let token = tokens.issue(PathBuf::from("/tmp/a.jpg"));

        assert_eq!(tokens.claim(&token), Some(PathBuf::from("/tmp/a.jpg")));
        assert_eq!(tokens.claim(&token), None);
    }

    #[test]
    fn unknown_tokens_yield_nothing() {
        let tokens = DownloadTokens::new(Duration::from_secs(60));
        assert_eq!(tokens.claim("nope"), None);
    }

    #[test]
    fn expired_tokens_are_purged() {
        let tokens = DownloadTokens::new(Duration::from_millis(0));
        let token = tokens.issue(PathBuf::from("/tmp/a.jpg"));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tokens.claim(&token), None);
    }

    #[test]
    fn tokens_are_independent() {
        let tokens = DownloadTokens::new(Duration::from_secs(60));
        let a = tokens.issue(PathBuf::from("/tmp/a.jpg"));
        let b = tokens.issue(PathBuf::from("/tmp/b.jpg"));
        assert_eq!(tokens.claim(&b), Some(PathBuf::from("/tmp/b.jpg")));
        assert_eq!(tokens.claim(&a), Some(PathBuf::from("/tmp/a.jpg")));
    }
}
