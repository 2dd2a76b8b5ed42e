//! Persistence traits and their in-memory implementations.
//!
//! Handlers talk to `UserStore` and `RecordStore` trait objects so the
//! backing storage can be swapped without touching route code. The shipped
//! implementations keep everything in `DashMap`s behind atomic id counters.

pub mod downloads;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{ApiError, ApiResult};
use crate::identity::Identity;

/// A registered account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// One redesign run. Exactly one of `user_id` / `anonymous_id` is set.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub anonymous_id: Option<String>,
    pub room_type: String,
    pub style: String,
    pub original_image_path: Option<String>,
    pub result_image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new usage record; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub owner: Identity,
    pub room_type: String,
    pub style: String,
    pub original_image_path: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create an account. Fails with `EmailTaken` on a duplicate email.
    async fn create(&self, email: &str, password_hash: &str) -> ApiResult<User>;
    async fn find_by_email(&self, email: &str) -> ApiResult<Option<User>>;
    async fn find_by_id(&self, id: i64) -> ApiResult<Option<User>>;
    async fn touch_last_login(&self, id: i64) -> ApiResult<()>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: NewUsageRecord) -> ApiResult<UsageRecord>;
    async fn count_for_user(&self, user_id: i64) -> ApiResult<u64>;
    async fn count_for_anonymous(&self, anonymous_id: &str) -> ApiResult<u64>;
    /// The most recently created record for an identity, if any.
    async fn latest_for(&self, owner: &Identity) -> ApiResult<Option<UsageRecord>>;
    async fn attach_result_image(&self, record_id: i64, path: &str) -> ApiResult<()>;
    /// Reassign an anonymous visitor's records to a user account, returning
    /// how many were moved.
    async fn merge_anonymous(&self, anonymous_id: &str, user_id: i64) -> ApiResult<u64>;
}

/// In-memory user store.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<i64, User>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, email: &str, password_hash: &str) -> ApiResult<User> {
        let email = email.to_ascii_lowercase();
        if self.users.iter().any(|u| u.email == email) {
            return Err(ApiError::EmailTaken);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User {
            id,
            email,
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
            last_login: None,
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let email = email.to_ascii_lowercase();
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone()))
    }

    async fn find_by_id(&self, id: i64) -> ApiResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn touch_last_login(&self, id: i64) -> ApiResult<()> {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.last_login = Some(Utc::now());
                Ok(())
            }
            None => Err(ApiError::NotFound),
        }
    }
}

/// In-memory usage record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<i64, UsageRecord>,
    next_id: AtomicI64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: NewUsageRecord) -> ApiResult<UsageRecord> {
        let (user_id, anonymous_id) = match &record.owner {
            Identity::Authenticated(id) => (Some(*id), None),
            Identity::Anonymous(id) => (None, Some(id.clone())),
            Identity::Unidentified => {
                return Err(ApiError::Internal(
                    "usage record requires an owner".to_string(),
                ))
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = UsageRecord {
            id,
            user_id,
            anonymous_id,
            room_type: record.room_type,
            style: record.style,
            original_image_path: record.original_image_path,
            result_image_path: None,
            created_at: Utc::now(),
        };
        self.records.insert(id, row.clone());
        Ok(row)
    }

    async fn count_for_user(&self, user_id: i64) -> ApiResult<u64> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.user_id == Some(user_id))
            .count() as u64)
    }

    async fn count_for_anonymous(&self, anonymous_id: &str) -> ApiResult<u64> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.anonymous_id.as_deref() == Some(anonymous_id))
            .count() as u64)
    }

    async fn latest_for(&self, owner: &Identity) -> ApiResult<Option<UsageRecord>> {
        let matches_owner = |r: &UsageRecord| match owner {
            Identity::Authenticated(id) => r.user_id == Some(*id),
            Identity::Anonymous(id) => r.anonymous_id.as_deref() == Some(id.as_str()),
            Identity::Unidentified => false,
        };
        Ok(self
            .records
            .iter()
            .filter(|r| matches_owner(r))
            .max_by_key(|r| (r.created_at, r.id))
            .map(|r| r.clone()))
    }

    async fn attach_result_image(&self, record_id: i64, path: &str) -> ApiResult<()> {
        match self.records.get_mut(&record_id) {
            Some(mut record) => {
                record.result_image_path = Some(path.to_string());
                Ok(())
            }
            None => Err(ApiError::NotFound),
        }
    }

    async fn merge_anonymous(&self, anonymous_id: &str, user_id: i64) -> ApiResult<u64> {
        let mut moved = 0;
        for mut record in self.records.iter_mut() {
            if record.anonymous_id.as_deref() == Some(anonymous_id) {
                record.anonymous_id = None;
                record.user_id = Some(user_id);
                moved += 1;
            }
        }
        if moved > 0 {
            tracing::info!(anonymous_id, user_id, moved, "merged anonymous usage records");
        }
        Ok(moved)
    }
}
