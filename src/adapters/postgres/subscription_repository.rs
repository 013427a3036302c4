//! PostgreSQL implementation of SubscriptionRepository.
//!
//! Every write that touches a subscription row also updates the profile
//! mirror inside the same transaction, so the two tables never disagree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{
    DomainError, ErrorCode, SubscriptionId, Timestamp, UserId,
};
use crate::domain::subscription::{PlanType, SubscriptionRecord, SubscriptionStatus};
use crate::ports::SubscriptionRepository;

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan: String,
    status: String,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    external_customer_ref: Option<String>,
    external_subscription_ref: Option<String>,
    trial_started_at: Option<DateTime<Utc>>,
    trial_ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let plan = parse_plan(&row.plan)?;
        let status = parse_status(&row.status)?;
        let user_id = UserId::new(row.user_id).map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid user_id: {}", e))
        })?;

        let mut record = SubscriptionRecord {
            id: SubscriptionId::from_uuid(row.id),
            user_id,
            plan,
            status,
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            can_downgrade: false,
            downgrade_available_at: None,
            external_customer_ref: row.external_customer_ref,
            external_subscription_ref: row.external_subscription_ref,
            trial_started_at: row.trial_started_at.map(Timestamp::from_datetime),
            trial_ended_at: row.trial_ended_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            version: row.version,
        };
        // Derived flags are never stored; recompute from the loaded state
        record.rederive();
        Ok(record)
    }
}

fn parse_plan(s: &str) -> Result<PlanType, DomainError> {
    PlanType::parse(s).ok_or_else(|| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid plan value: {}", s),
        )
    })
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    SubscriptionStatus::parse(s).ok_or_else(|| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid status value: {}", s),
        )
    })
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, e))
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, plan, status, current_period_end, cancel_at_period_end,
           external_customer_ref, external_subscription_ref,
           trial_started_at, trial_ended_at, created_at, updated_at, version
    FROM subscriptions
"#;

/// Upserts the subscription row within an open transaction.
///
/// The version predicate on the conflict arm makes concurrent writers
/// lose cleanly: a stale in-memory record updates zero rows.
async fn upsert_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &SubscriptionRecord,
) -> Result<(), DomainError> {
    let result = sqlx::query(
        r#"
        INSERT INTO subscriptions (
            id, user_id, plan, status, current_period_end, cancel_at_period_end,
            external_customer_ref, external_subscription_ref,
            trial_started_at, trial_ended_at, created_at, updated_at, version
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0)
        ON CONFLICT (user_id) DO UPDATE SET
            plan = EXCLUDED.plan,
            status = EXCLUDED.status,
            current_period_end = EXCLUDED.current_period_end,
            cancel_at_period_end = EXCLUDED.cancel_at_period_end,
            external_customer_ref = EXCLUDED.external_customer_ref,
            external_subscription_ref = EXCLUDED.external_subscription_ref,
            trial_started_at = EXCLUDED.trial_started_at,
            trial_ended_at = EXCLUDED.trial_ended_at,
            updated_at = EXCLUDED.updated_at,
            version = subscriptions.version + 1
        WHERE subscriptions.version = $13
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.user_id.as_str())
    .bind(record.plan.as_str())
    .bind(record.status.as_str())
    .bind(record.current_period_end.map(|t| *t.as_datetime()))
    .bind(record.cancel_at_period_end)
    .bind(&record.external_customer_ref)
    .bind(&record.external_subscription_ref)
    .bind(record.trial_started_at.map(|t| *t.as_datetime()))
    .bind(record.trial_ended_at.map(|t| *t.as_datetime()))
    .bind(record.created_at.as_datetime())
    .bind(record.updated_at.as_datetime())
    .bind(record.version)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to upsert subscription", e))?;

    if result.rows_affected() == 0 {
        return Err(DomainError::new(
            ErrorCode::ConcurrentModification,
            "Subscription was modified concurrently",
        ));
    }
    Ok(())
}

/// Upserts the profile mirror within the same transaction.
async fn mirror_profile(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &SubscriptionRecord,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO user_profiles (
            user_id, subscription_plan, subscription_status, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (user_id) DO UPDATE SET
            subscription_plan = EXCLUDED.subscription_plan,
            subscription_status = EXCLUDED.subscription_status,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(record.user_id.as_str())
    .bind(record.plan.as_str())
    .bind(record.status.as_str())
    .bind(record.updated_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to mirror profile", e))?;
    Ok(())
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE user_id = $1", SELECT_COLUMNS))
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to find subscription", e))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE external_subscription_ref = $1",
            SELECT_COLUMNS
        ))
        .bind(subscription_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find subscription", e))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn upsert_with_profile(&self, record: &SubscriptionRecord) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        upsert_subscription(&mut tx, record).await?;
        mirror_profile(&mut tx, record).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;
        Ok(())
    }

    async fn grant_trial(
        &self,
        record: &SubscriptionRecord,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        upsert_subscription(&mut tx, record).await?;

        // Mirror plus the trial latch. COALESCE keeps the original
        // timestamp if the latch was somehow already set.
        sqlx::query(
            r#"
            INSERT INTO user_profiles (
                user_id, subscription_plan, subscription_status,
                trial_used, trial_used_at, created_at, updated_at
            ) VALUES ($1, $2, $3, TRUE, $4, $4, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                subscription_plan = EXCLUDED.subscription_plan,
                subscription_status = EXCLUDED.subscription_status,
                trial_used = TRUE,
                trial_used_at = COALESCE(user_profiles.trial_used_at, EXCLUDED.trial_used_at),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.user_id.as_str())
        .bind(record.plan.as_str())
        .bind(record.status.as_str())
        .bind(now.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to set trial latch", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;
        Ok(())
    }

    async fn delete_with_profile_reset(&self, user_id: &UserId) -> Result<bool, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let deleted = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete subscription", e))?
            .rows_affected();

        sqlx::query(
            r#"
            UPDATE user_profiles
            SET subscription_plan = 'free',
                subscription_status = 'inactive',
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to reset profile mirror", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_accepts_stored_values() {
        for plan in [
            PlanType::Free,
            PlanType::Trial,
            PlanType::StudentMonthly,
            PlanType::StudentYearly,
            PlanType::Classroom,
        ] {
            assert_eq!(parse_plan(plan.as_str()).unwrap(), plan);
        }
    }

    #[test]
    fn parse_plan_rejects_unknown_values() {
        assert!(parse_plan("platinum").is_err());
        assert!(parse_plan("").is_err());
    }

    #[test]
    fn parse_status_accepts_stored_values() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Inactive,
        ] {
            assert_eq!(parse_status(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn parse_status_rejects_unknown_values() {
        assert!(parse_status("paused").is_err());
    }

    #[test]
    fn row_conversion_rederives_downgrade_flags() {
        let future = Utc::now() + chrono::Duration::days(120);
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: "user_r1".to_string(),
            plan: "student_yearly".to_string(),
            status: "active".to_string(),
            current_period_end: Some(future),
            cancel_at_period_end: false,
            external_customer_ref: Some("cus_1".to_string()),
            external_subscription_ref: Some("sub_1".to_string()),
            trial_started_at: None,
            trial_ended_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 3,
        };

        let record = SubscriptionRecord::try_from(row).unwrap();
        assert!(!record.can_downgrade);
        assert_eq!(
            record.downgrade_available_at,
            Some(Timestamp::from_datetime(future))
        );
        assert_eq!(record.version, 3);
    }
}
