//! Anonymous usage quota enforcement.
//!
//! Authenticated users are unlimited. Anonymous visitors get a fixed number
//! of redesign runs, counted per cookie id. The check and the later record
//! insert are separate store calls, so two concurrent requests at the
//! boundary can both pass; the quota is a soft product limit, not a billing
//! ledger, and the window is accepted.

use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::identity::Identity;
use crate::store::{NewUsageRecord, RecordStore, UsageRecord};

/// How much quota an identity has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unlimited,
    Count(u32),
}

pub struct UsageGate {
    records: Arc<dyn RecordStore>,
    quota: u32,
}

impl UsageGate {
    pub fn new(records: Arc<dyn RecordStore>, quota: u32) -> Self {
        Self { records, quota }
    }

    pub fn quota(&self) -> u32 {
        self.quota
    }

    /// Reject callers that have exhausted their anonymous quota.
    pub async fn check(&self, identity: &Identity) -> ApiResult<()> {
        match identity {
            Identity::Authenticated(_) => Ok(()),
            Identity::Anonymous(id) => {
                let used = self.records.count_for_anonymous(id).await?;
                if used >= u64::from(self.quota) {
                    tracing::info!(anonymous_id = %id, used, quota = self.quota, "anonymous quota exhausted");
                    return Err(ApiError::AuthRequired(self.quota));
                }
                Ok(())
            }
            Identity::Unidentified => Err(ApiError::AuthRequired(self.quota)),
        }
    }

    /// Record one completed redesign run against the caller.
    pub async fn record(
        &self,
        identity: &Identity,
        room_type: &str,
        style: &str,
        original_image_path: Option<String>,
    ) -> ApiResult<UsageRecord> {
        self.records
            .insert(NewUsageRecord {
                owner: identity.clone(),
                room_type: room_type.to_string(),
                style: style.to_string(),
                original_image_path,
            })
            .await
    }

    /// Remaining quota for an identity.
    pub async fn remaining(&self, identity: &Identity) -> ApiResult<Remaining> {
        match identity {
            Identity::Authenticated(_) => Ok(Remaining::Unlimited),
            Identity::Anonymous(id) => {
                let used = self.records.count_for_anonymous(id).await?;
                let left = u64::from(self.quota).saturating_sub(used);
                Ok(Remaining::Count(left.min(u64::from(self.quota)) as u32))
            }
            Identity::Unidentified => Ok(Remaining::Count(self.quota)),
        }
    }

    /// Fold an anonymous visitor's history into a user account.
    pub async fn merge(&self, anonymous_id: &str, user_id: i64) -> ApiResult<u64> {
        self.records.merge_anonymous(anonymous_id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    fn gate(quota: u32) -> UsageGate {
        UsageGate::new(Arc::new(MemoryRecordStore::new()), quota)
    }

    #[tokio::test]
    async fn authenticated_callers_are_never_gated() {
        let gate = gate(0);
        let identity = Identity::Authenticated(1);
        assert!(gate.check(&identity).await.is_ok());
        assert_eq!(gate.remaining(&identity).await.unwrap(), Remaining::Unlimited);
    }

    #[tokio::test]
    async fn quota_boundary_rejects_with_auth_required() {
        let gate = gate(3);
        let identity = Identity::Anonymous("anon-1".into());

        for used in 0..3 {
            assert!(gate.check(&identity).await.is_ok(), "run {used} should pass");
            gate.record(&identity, "bedroom", "modern", None).await.unwrap();
        }

        let err = gate.check(&identity).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthRequired(3)));
        assert_eq!(
            gate.remaining(&identity).await.unwrap(),
            Remaining::Count(0)
        );
    }

    #[tokio::test]
    async fn quota_is_per_anonymous_id() {
        let gate = gate(1);
        let first = Identity::Anonymous("anon-1".into());
        let second = Identity::Anonymous("anon-2".into());

        gate.record(&first, "kitchen", "rustic", None).await.unwrap();
        assert!(gate.check(&first).await.is_err());
        assert!(gate.check(&second).await.is_ok());
    }

    #[tokio::test]
    async fn merge_frees_no_quota_for_the_user() {
        let gate = gate(2);
        let anon = Identity::Anonymous("anon-1".into());
        gate.record(&anon, "bedroom", "modern", None).await.unwrap();
        gate.record(&anon, "bedroom", "modern", None).await.unwrap();

        let moved = gate.merge("anon-1", 7).await.unwrap();
        assert_eq!(moved, 2);
        // the cookie id starts fresh, the account is unlimited anyway
        assert_eq!(gate.remaining(&anon).await.unwrap(), Remaining::Count(2));
        assert!(gate.check(&Identity::Authenticated(7)).await.is_ok());
    }
}
