//! PostgreSQL 存储
//!
//! 使用 sqlx 运行时查询实现全部存储 trait。
//! 步骤完成、奖励发放和积分重算批次各自在一个事务内完成。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};
use unlock_rules::{Condition, ConditionTree, LogicalOperator};

use super::traits::{
    AppendOutcome, CatalogStore, GrantWrite, LedgerStore, OrgConfigStore, ProgressStore,
    StepCompletionWrite, StepWriteOutcome, UserProfileStore, UserRewardStore,
};
use crate::error::{ProgressionError, Result};
use crate::models::{
    Enrollment, Journey, LedgerEntry, LedgerUpdate, Level, NewLedgerEntry, OrgSettings, Resource,
    Reward, Step, StepProgress, UserReward,
};

/// 编译期嵌入的迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const LEDGER_COLUMNS: &str = "id, user_id, org_id, source_type, source_ref, enrollment_id, \
     base_points, multiplier, points, idempotency_key, created_at, updated_at";

const STEP_PROGRESS_COLUMNS: &str = "sp.enrollment_id, sp.step_id, sp.status, sp.points_earned, \
     sp.completed_at, sp.external_reference, sp.metadata";

#[derive(sqlx::FromRow)]
struct RewardRow {
    id: String,
    org_id: String,
    name: String,
    reward_type: String,
    points: i64,
    unlock_condition: Json<ConditionTree>,
    journey_id: Option<String>,
}

impl From<RewardRow> for Reward {
    fn from(row: RewardRow) -> Self {
        Self {
            id: row.id,
            org_id: row.org_id,
            name: row.name,
            reward_type: row.reward_type,
            points: row.points,
            unlock_condition: row.unlock_condition.0,
            journey_id: row.journey_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: String,
    org_id: String,
    name: String,
    unlock_logic: String,
    conditions: Json<Vec<Condition>>,
    points_on_completion: i64,
    journey_id: Option<String>,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = ProgressionError;

    fn try_from(row: ResourceRow) -> Result<Self> {
        let unlock_logic: LogicalOperator = serde_json::from_value(Value::String(row.unlock_logic))?;
        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            name: row.name,
            unlock_logic,
            conditions: row.conditions.0,
            points_on_completion: row.points_on_completion,
            journey_id: row.journey_id,
        })
    }
}

/// PostgreSQL 存储
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 在事务中追加账本条目，幂等键冲突时返回 None
    async fn insert_ledger_in_tx(
        conn: &mut PgConnection,
        entry: &NewLedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            r#"
            INSERT INTO ledger_entries
                (user_id, org_id, source_type, source_ref, enrollment_id,
                 base_points, multiplier, points, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {}
            "#,
            LEDGER_COLUMNS
        );

        let inserted = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(&entry.user_id)
            .bind(&entry.org_id)
            .bind(entry.source_type)
            .bind(&entry.source_ref)
            .bind(&entry.enrollment_id)
            .bind(entry.base_points)
            .bind(entry.multiplier)
            .bind(entry.points)
            .bind(&entry.idempotency_key)
            .bind(now)
            .fetch_optional(conn)
            .await
            .map_err(ProgressionError::from_db)?;

        Ok(inserted)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn list_levels(&self, org_id: &str) -> Result<Vec<Level>> {
        let levels = sqlx::query_as::<_, Level>(
            r#"
            SELECT id, org_id, name, min_points, icon, benefits
            FROM levels
            WHERE org_id = $1
            ORDER BY min_points, id
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(levels)
    }

    async fn get_reward(&self, reward_id: &str) -> Result<Option<Reward>> {
        let row = sqlx::query_as::<_, RewardRow>(
            r#"
            SELECT id, org_id, name, reward_type, points, unlock_condition, journey_id
            FROM rewards
            WHERE id = $1
            "#,
        )
        .bind(reward_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Reward::from))
    }

    async fn list_rewards(&self, org_id: &str) -> Result<Vec<Reward>> {
        let rows = sqlx::query_as::<_, RewardRow>(
            r#"
            SELECT id, org_id, name, reward_type, points, unlock_condition, journey_id
            FROM rewards
            WHERE org_id = $1
            ORDER BY id
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reward::from).collect())
    }

    async fn list_resources(&self, org_id: &str) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT id, org_id, name, unlock_logic, conditions, points_on_completion, journey_id
            FROM resources
            WHERE org_id = $1
            ORDER BY id
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Resource::try_from).collect()
    }

    async fn get_journey(&self, journey_id: &str) -> Result<Option<Journey>> {
        let journey = sqlx::query_as::<_, Journey>(
            "SELECT id, org_id, name, created_at FROM journeys WHERE id = $1",
        )
        .bind(journey_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(journey)
    }

    async fn list_journeys(&self, org_id: &str) -> Result<Vec<Journey>> {
        let journeys = sqlx::query_as::<_, Journey>(
            "SELECT id, org_id, name, created_at FROM journeys WHERE org_id = $1 ORDER BY id",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(journeys)
    }

    async fn list_steps(&self, journey_id: &str) -> Result<Vec<Step>> {
        let steps = sqlx::query_as::<_, Step>(
            r#"
            SELECT id, journey_id, name, step_type, base_points, order_index
            FROM steps
            WHERE journey_id = $1
            ORDER BY order_index, id
            "#,
        )
        .bind(journey_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(steps)
    }

    async fn list_org_steps(&self, org_id: &str) -> Result<Vec<Step>> {
        let steps = sqlx::query_as::<_, Step>(
            r#"
            SELECT s.id, s.journey_id, s.name, s.step_type, s.base_points, s.order_index
            FROM steps s
            JOIN journeys j ON j.id = s.journey_id
            WHERE j.org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(steps)
    }
}

#[async_trait]
impl ProgressStore for PgStore {
    async fn get_enrollment(&self, enrollment_id: &str) -> Result<Option<Enrollment>> {
        let enrollment = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT id, user_id, journey_id, org_id, status, started_at, completed_at
            FROM enrollments
            WHERE id = $1
            "#,
        )
        .bind(enrollment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(enrollment)
    }

    async fn create_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        sqlx::query(
            r#"
            INSERT INTO enrollments (id, user_id, journey_id, org_id, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, journey_id) DO NOTHING
            "#,
        )
        .bind(&enrollment.id)
        .bind(&enrollment.user_id)
        .bind(&enrollment.journey_id)
        .bind(&enrollment.org_id)
        .bind(enrollment.status)
        .bind(enrollment.started_at)
        .execute(&self.pool)
        .await?;

        let stored = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT id, user_id, journey_id, org_id, status, started_at, completed_at
            FROM enrollments
            WHERE user_id = $1 AND journey_id = $2
            "#,
        )
        .bind(&enrollment.user_id)
        .bind(&enrollment.journey_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn list_enrollments(&self, user_id: &str, org_id: &str) -> Result<Vec<Enrollment>> {
        let enrollments = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT id, user_id, journey_id, org_id, status, started_at, completed_at
            FROM enrollments
            WHERE user_id = $1 AND org_id = $2
            ORDER BY started_at, id
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(enrollments)
    }

    async fn list_step_progress(&self, enrollment_id: &str) -> Result<Vec<StepProgress>> {
        let sql = format!(
            "SELECT {} FROM step_progress sp WHERE sp.enrollment_id = $1",
            STEP_PROGRESS_COLUMNS
        );
        let progress = sqlx::query_as::<_, StepProgress>(&sql)
            .bind(enrollment_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(progress)
    }

    async fn list_user_step_progress(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> Result<Vec<StepProgress>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM step_progress sp
            JOIN enrollments e ON e.id = sp.enrollment_id
            WHERE e.user_id = $1 AND e.org_id = $2
            "#,
            STEP_PROGRESS_COLUMNS
        );
        let progress = sqlx::query_as::<_, StepProgress>(&sql)
            .bind(user_id)
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(progress)
    }

    #[instrument(skip(self, write), fields(enrollment_id = %write.progress.enrollment_id, step_id = %write.progress.step_id))]
    async fn record_step_completion(
        &self,
        write: &StepCompletionWrite,
    ) -> Result<StepWriteOutcome> {
        let mut tx = self.pool.begin().await?;
        let progress = &write.progress;

        let inserted = sqlx::query(
            r#"
            INSERT INTO step_progress
                (enrollment_id, step_id, status, points_earned, completed_at, external_reference, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (enrollment_id, step_id) DO NOTHING
            "#,
        )
        .bind(&progress.enrollment_id)
        .bind(&progress.step_id)
        .bind(progress.status)
        .bind(progress.points_earned)
        .bind(progress.completed_at)
        .bind(&progress.external_reference)
        .bind(&progress.metadata)
        .execute(&mut *tx)
        .await
        .map_err(ProgressionError::from_db)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("步骤已有完成记录");

            let sql = format!(
                "SELECT {} FROM step_progress sp WHERE sp.enrollment_id = $1 AND sp.step_id = $2",
                STEP_PROGRESS_COLUMNS
            );
            let existing = sqlx::query_as::<_, StepProgress>(&sql)
                .bind(&progress.enrollment_id)
                .bind(&progress.step_id)
                .fetch_one(&self.pool)
                .await?;
            return Ok(StepWriteOutcome::AlreadyCompleted(existing));
        }

        Self::insert_ledger_in_tx(&mut *tx, &write.ledger, write.completed_at).await?;

        if write.completes_enrollment {
            sqlx::query(
                r#"
                UPDATE enrollments
                SET status = 'completed', completed_at = $2
                WHERE id = $1 AND status = 'active'
                "#,
            )
            .bind(&progress.enrollment_id)
            .bind(write.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(ProgressionError::from_db)?;
        }

        tx.commit().await.map_err(ProgressionError::from_db)?;

        Ok(StepWriteOutcome::Recorded(progress.clone()))
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome> {
        let mut conn = self.pool.acquire().await?;
        let inserted = Self::insert_ledger_in_tx(&mut *conn, entry, Utc::now()).await?;

        Ok(match inserted {
            Some(stored) => AppendOutcome::Appended(stored),
            None => AppendOutcome::Duplicate,
        })
    }

    async fn total_points(&self, user_id: &str, org_id: &str) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT
            FROM ledger_entries
            WHERE user_id = $1 AND org_id = $2
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn list_step_entries_after(
        &self,
        org_id: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM ledger_entries
            WHERE org_id = $1 AND source_type = 'step_completion' AND id > $2
            ORDER BY id
            LIMIT $3
            "#,
            LEDGER_COLUMNS
        );
        let entries = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(org_id)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    async fn apply_recalculation(&self, updates: &[LedgerUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE ledger_entries
                SET base_points = $2, multiplier = $3, points = $4, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(update.id)
            .bind(update.base_points)
            .bind(update.multiplier)
            .bind(update.points)
            .execute(&mut *tx)
            .await
            .map_err(ProgressionError::from_db)?;

            updated += result.rows_affected();

            sqlx::query(
                r#"
                UPDATE step_progress sp
                SET points_earned = le.points
                FROM ledger_entries le
                WHERE le.id = $1
                  AND sp.enrollment_id = le.enrollment_id
                  AND sp.step_id = le.source_ref
                "#,
            )
            .bind(update.id)
            .execute(&mut *tx)
            .await
            .map_err(ProgressionError::from_db)?;
        }

        tx.commit().await.map_err(ProgressionError::from_db)?;
        Ok(updated)
    }
}

#[async_trait]
impl UserRewardStore for PgStore {
    async fn list_user_rewards(&self, user_id: &str, org_id: &str) -> Result<Vec<UserReward>> {
        let rewards = sqlx::query_as::<_, UserReward>(
            r#"
            SELECT user_id, reward_id, org_id, source, granted_at, acknowledged_at
            FROM user_rewards
            WHERE user_id = $1 AND org_id = $2
            ORDER BY granted_at, reward_id
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rewards)
    }

    async fn grant(
        &self,
        reward: &UserReward,
        ledger: Option<NewLedgerEntry>,
    ) -> Result<GrantWrite> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO user_rewards (user_id, reward_id, org_id, source, granted_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, reward_id) DO NOTHING
            "#,
        )
        .bind(&reward.user_id)
        .bind(&reward.reward_id)
        .bind(&reward.org_id)
        .bind(reward.source)
        .bind(reward.granted_at)
        .execute(&mut *tx)
        .await
        .map_err(ProgressionError::from_db)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(GrantWrite::AlreadyOwned);
        }

        if let Some(entry) = ledger {
            Self::insert_ledger_in_tx(&mut *tx, &entry, reward.granted_at).await?;
        }

        tx.commit().await.map_err(ProgressionError::from_db)?;
        Ok(GrantWrite::Inserted(reward.clone()))
    }

    async fn acknowledge(
        &self,
        user_id: &str,
        reward_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        if reward_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE user_rewards
            SET acknowledged_at = $3
            WHERE user_id = $1 AND reward_id = ANY($2) AND acknowledged_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(reward_ids)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserProfileStore for PgStore {
    async fn is_profile_complete(&self, user_id: &str, org_id: &str) -> Result<bool> {
        let complete: Option<bool> = sqlx::query_scalar(
            "SELECT is_complete FROM user_profiles WHERE user_id = $1 AND org_id = $2",
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(complete.unwrap_or(false))
    }

    async fn get_field_values(
        &self,
        user_id: &str,
        org_id: &str,
        fields: &[String],
    ) -> Result<HashMap<String, String>> {
        let stored: Option<Json<HashMap<String, Value>>> = sqlx::query_scalar(
            "SELECT fields FROM user_profiles WHERE user_id = $1 AND org_id = $2",
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(Json(values)) = stored else {
            return Ok(HashMap::new());
        };

        Ok(fields
            .iter()
            .filter_map(|f| {
                let text = match values.get(f)? {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((f.clone(), text))
            })
            .collect())
    }
}

#[async_trait]
impl OrgConfigStore for PgStore {
    async fn get_settings(&self, org_id: &str) -> Result<Option<OrgSettings>> {
        let settings = sqlx::query_as::<_, OrgSettings>(
            r#"
            SELECT org_id, points_multiplier, default_step_points, profile_field_points
            FROM org_settings
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settings)
    }
}
