//! Postgres lease store: claims, sweeps, and bulk resolution on `profiles`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::config::{ClaimStrategy, SweepPolicy};
use crate::error::{Error, Result};
use crate::lease::LeaseStore;
use crate::model::{Owner, PendingUpdate, ProfileRecord, Status, WorkItem};

const CLAIM_SAMPLE: &str = "UPDATE profiles
     SET status = 'processing', owner = $1, instance_id = $2, claimed_at = now(), updated_at = now()
     WHERE username IN (
         SELECT username FROM profiles
         WHERE status = 'not_collected'
         ORDER BY random()
         LIMIT $3
         FOR UPDATE SKIP LOCKED
     )
     AND status = 'not_collected'
     RETURNING username";

const CLAIM_PARTITION: &str = "UPDATE profiles
     SET status = 'processing', owner = $1, instance_id = $2, claimed_at = now(), updated_at = now()
     WHERE username IN (
         SELECT username FROM profiles
         WHERE status = 'not_collected'
         AND abs(hashtext(username)::bigint) % $4 = $5
         ORDER BY username
         LIMIT $3
         FOR UPDATE SKIP LOCKED
     )
     AND status = 'not_collected'
     RETURNING username";

#[async_trait]
impl LeaseStore for super::Db {
    async fn claim_batch(
        &self,
        owner: &Owner,
        strategy: ClaimStrategy,
        limit: usize,
    ) -> Result<Vec<String>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(String,)> = match strategy {
            ClaimStrategy::Sample => {
                sqlx::query_as(CLAIM_SAMPLE)
                    .bind(&owner.hostname)
                    .bind(owner.instance_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            ClaimStrategy::Partition { index, count } => {
                sqlx::query_as(CLAIM_PARTITION)
                    .bind(&owner.hostname)
                    .bind(owner.instance_id)
                    .bind(limit)
                    .bind(i64::from(count))
                    .bind(i64::from(index))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.into_iter().map(|(username,)| username).collect())
    }

    async fn reset_stale_claims(&self, policy: SweepPolicy) -> Result<u64> {
        let cutoff: Option<DateTime<Utc>> = policy.cutoff(Utc::now())?;

        let released = sqlx::query(
            "UPDATE profiles
             SET status = 'not_collected', owner = NULL, instance_id = NULL, claimed_at = NULL, updated_at = now()
             WHERE status = 'processing'
             AND ($1::timestamptz IS NULL OR claimed_at IS NULL OR claimed_at < $1)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(released)
    }

    async fn apply_updates(&self, updates: &[PendingUpdate]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut applied = 0;

        for update in updates {
            applied += sqlx::query(
                "UPDATE profiles
                 SET status = $1, processed_by = COALESCE($2, processed_by), profile = COALESCE($3, profile),
                     owner = NULL, instance_id = NULL, claimed_at = NULL, updated_at = $4
                 WHERE username = $5
                 AND ($6::text IS NULL OR status = $6)
                 AND ($7::uuid IS NULL OR instance_id = $7)",
            )
            .bind(update.status.as_str())
            .bind(update.processed_by.as_deref())
            .bind(update.profile.as_ref().map(Json))
            .bind(update.stamped_at)
            .bind(&update.key)
            .bind(update.expected.map(Status::as_str))
            .bind(update.expected_instance)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(applied)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<Status, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM profiles GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(status, count)| Ok((status.parse()?, count as u64)))
            .collect()
    }

    async fn seed(&self, keys: &[String]) -> Result<u64> {
        let inserted = sqlx::query(
            "INSERT INTO profiles (username)
             SELECT * FROM UNNEST($1::text[])
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(keys)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted)
    }

    async fn get(&self, key: &str) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "SELECT username, status, owner, instance_id, claimed_at, processed_by, profile, created_at, updated_at
             FROM profiles WHERE username = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(key.to_string()))?
            .try_into_work_item()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    username: String,
    status: String,
    owner: Option<String>,
    instance_id: Option<Uuid>,
    claimed_at: Option<DateTime<Utc>>,
    processed_by: Option<String>,
    profile: Option<Json<ProfileRecord>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            key: self.username,
            status: self.status.parse()?,
            owner: self.owner,
            instance_id: self.instance_id,
            claimed_at: self.claimed_at,
            processed_by: self.processed_by,
            profile: self.profile.map(|Json(profile)| profile),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
