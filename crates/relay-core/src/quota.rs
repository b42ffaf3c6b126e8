// Quota Gate
//
// Tenants with a positive monthly token quota are checked before every LLM
// invocation against a rolling counter keyed by tenant and calendar month.
// A tenant with no quota configured (or quota <= 0, meaning unlimited) is
// never throttled; nor is usage recorded with no tenant at all.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// `(tenant_id, "YYYY-MM")` → tokens used so far this month.
pub type YearMonth = String;

pub fn current_year_month() -> YearMonth {
    let now = Utc::now();
    format!("{:04}-{:02}", now.year(), now.month())
}

/// Backing store for monthly token counters. An adjacent subsystem (a real
/// deployment would back this with Redis); this crate ships an in-process
/// implementation suitable for a single node and for tests.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn get_monthly_usage(&self, tenant_id: &str, year_month: &str) -> Result<i64>;
    async fn increment_monthly_usage(
        &self,
        tenant_id: &str,
        year_month: &str,
        tokens: i64,
    ) -> Result<()>;
}

#[derive(Default)]
pub struct InProcessQuotaStore {
    counters: Mutex<HashMap<(String, String), i64>>,
}

impl InProcessQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for InProcessQuotaStore {
    async fn get_monthly_usage(&self, tenant_id: &str, year_month: &str) -> Result<i64> {
        let counters = self.counters.lock().await;
        Ok(counters
            .get(&(tenant_id.to_string(), year_month.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn increment_monthly_usage(
        &self,
        tenant_id: &str,
        year_month: &str,
        tokens: i64,
    ) -> Result<()> {
        let mut counters = self.counters.lock().await;
        *counters
            .entry((tenant_id.to_string(), year_month.to_string()))
            .or_insert(0) += tokens;
        Ok(())
    }
}

/// Checks a tenant's quota before an LLM call. A `None` tenant or a
/// non-positive `quota` (0 means unlimited) always passes.
pub async fn check_quota(
    store: &dyn QuotaStore,
    tenant_id: Option<&str>,
    quota: Option<i64>,
) -> Result<()> {
    let (Some(tenant_id), Some(quota)) = (tenant_id, quota) else {
        return Ok(());
    };
    if quota <= 0 {
        return Ok(());
    }

    let year_month = current_year_month();
    let used = store.get_monthly_usage(tenant_id, &year_month).await?;
    if used >= quota {
        return Err(Error::QuotaExceeded { used, quota });
    }
    Ok(())
}

/// Records a turn's usage against the tenant's monthly counter. Only called
/// when a tenant id is present — tenant-less usage is tracked in the usage
/// record table but never throttled.
pub async fn record_usage(store: &dyn QuotaStore, tenant_id: Option<&str>, total_tokens: i64) -> Result<()> {
    let Some(tenant_id) = tenant_id else {
        return Ok(());
    };
    let year_month = current_year_month();
    store
        .increment_monthly_usage(tenant_id, &year_month, total_tokens)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_passes_when_no_tenant() {
        let store = InProcessQuotaStore::new();
        assert!(check_quota(&store, None, Some(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_quota_passes_when_unlimited() {
        let store = InProcessQuotaStore::new();
        assert!(check_quota(&store, Some("t1"), Some(0)).await.is_ok());
        assert!(check_quota(&store, Some("t1"), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_quota_exceeded_blocks_request() {
        let store = InProcessQuotaStore::new();
        record_usage(&store, Some("t1"), 1000).await.unwrap();

        let result = check_quota(&store, Some("t1"), Some(500)).await;
        assert!(matches!(result, Err(Error::QuotaExceeded { used: 1000, quota: 500 })));
    }

    #[tokio::test]
    async fn test_quota_increment_accumulates_across_calls() {
        let store = InProcessQuotaStore::new();
        record_usage(&store, Some("t1"), 300).await.unwrap();
        record_usage(&store, Some("t1"), 300).await.unwrap();

        let ym = current_year_month();
        let used = store.get_monthly_usage("t1", &ym).await.unwrap();
        assert_eq!(used, 600);
    }

    #[tokio::test]
    async fn test_record_usage_noop_without_tenant() {
        let store = InProcessQuotaStore::new();
        record_usage(&store, None, 1000).await.unwrap();
        let ym = current_year_month();
        assert_eq!(store.get_monthly_usage("anything", &ym).await.unwrap(), 0);
    }
}
