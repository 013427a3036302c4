//! PostgreSQL implementation of ProfileRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};
use crate::domain::profile::UserProfile;
use crate::domain::subscription::{PlanType, SubscriptionStatus};
use crate::ports::ProfileRepository;

pub struct PostgresProfileRepository {
    pool: PgPool,
}

impl PostgresProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    user_id: String,
    email: Option<String>,
    subscription_plan: String,
    subscription_status: String,
    trial_used: bool,
    trial_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = DomainError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let plan = PlanType::parse(&row.subscription_plan).ok_or_else(|| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid plan value: {}", row.subscription_plan),
            )
        })?;
        let status = SubscriptionStatus::parse(&row.subscription_status).ok_or_else(|| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid status value: {}", row.subscription_status),
            )
        })?;
        let user_id = UserId::new(row.user_id).map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid user_id: {}", e))
        })?;

        Ok(UserProfile {
            user_id,
            email: row.email,
            subscription_plan: plan,
            subscription_status: status,
            trial_used: row.trial_used,
            trial_used_at: row.trial_used_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT user_id, email, subscription_plan, subscription_status,
           trial_used, trial_used_at, created_at, updated_at
    FROM user_profiles
"#;

#[async_trait]
impl ProfileRepository for PostgresProfileRepository {
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<UserProfile>, DomainError> {
        let row: Option<ProfileRow> =
            sqlx::query_as(&format!("{} WHERE user_id = $1", SELECT_COLUMNS))
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    DomainError::new(
                        ErrorCode::DatabaseError,
                        format!("Failed to find profile: {}", e),
                    )
                })?;

        row.map(UserProfile::try_from).transpose()
    }

    async fn ensure_exists(
        &self,
        user_id: &UserId,
        email: Option<&str>,
    ) -> Result<UserProfile, DomainError> {
        // Insert-or-fetch in one round trip. An existing row keeps its
        // email unless it never had one.
        let row: ProfileRow = sqlx::query_as(
            r#"
            INSERT INTO user_profiles (
                user_id, email, subscription_plan, subscription_status,
                trial_used, created_at, updated_at
            ) VALUES ($1, $2, 'free', 'inactive', FALSE, NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                email = COALESCE(user_profiles.email, EXCLUDED.email)
            RETURNING user_id, email, subscription_plan, subscription_status,
                      trial_used, trial_used_at, created_at, updated_at
            "#,
        )
        .bind(user_id.as_str())
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to ensure profile: {}", e),
            )
        })?;

        UserProfile::try_from(row)
    }
}
