//! Read-only operator queries behind `biocrawl status` and `biocrawl reset`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::Status;

/// Claims currently held by one worker process.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimHolder {
    pub owner: Option<String>,
    pub instance_id: Option<Uuid>,
    pub count: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// How many profiles one host resolved to one status.
#[derive(Debug, Clone)]
pub struct InstanceTally {
    pub processed_by: String,
    pub status: Status,
    pub count: u64,
}

impl super::Db {
    /// Claims in `processing`, grouped per worker process.
    pub async fn processing_stats(&self) -> Result<Vec<ClaimHolder>> {
        let holders = sqlx::query_as(
            "SELECT owner, instance_id, COUNT(*) AS count, MIN(claimed_at) AS oldest, MAX(claimed_at) AS newest
             FROM profiles WHERE status = 'processing'
             GROUP BY owner, instance_id
             ORDER BY oldest ASC NULLS FIRST",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(holders)
    }

    /// Resolution counts per host and status.
    pub async fn instance_stats(&self) -> Result<Vec<InstanceTally>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT processed_by, status, COUNT(*) FROM profiles
             WHERE processed_by IS NOT NULL
             GROUP BY processed_by, status
             ORDER BY processed_by",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(processed_by, status, count)| {
                Ok(InstanceTally {
                    processed_by,
                    status: status.parse()?,
                    count: count as u64,
                })
            })
            .collect()
    }

    /// Profiles resolved to a done status since `since`.
    pub async fn recent_activity(&self, since: DateTime<Utc>) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM profiles
             WHERE updated_at >= $1 AND status NOT IN ('not_collected', 'processing')",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}
