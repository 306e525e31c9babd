use sqlx::{Pool, Sqlite};
use crate::db::models::User;
use crate::error::AppError;

pub struct UserRepository;

impl UserRepository {
    /// Registration lives in another service; this exists for provisioning and fixtures.
    pub async fn create(
        pool: &Pool<Sqlite>,
        email: &str,
        username: &str,
        full_name: &str,
    ) -> Result<User, AppError> {
        let created_at = chrono::Utc::now();
        let mut tx = pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
INSERT INTO users (email, username, full_name, is_active, created_at)
VALUES (?, ?, ?, 1, ?)
RETURNING id, email, username, full_name, is_active, created_at
            "#,
        )
        .bind(email)
        .bind(username)
        .bind(full_name)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(user)
    }

    pub async fn get_by_id(
        pool: &Pool<Sqlite>,
        id: i64,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, username, full_name, is_active, created_at FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub async fn set_active(
        pool: &Pool<Sqlite>,
        id: i64,
        is_active: bool,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Records a seeker/listener connection, as the matchmaking service would.
    pub async fn record_connection(
        pool: &Pool<Sqlite>,
        seeker_id: i64,
        listener_id: i64,
        accepted: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
INSERT INTO connections (seeker_id, listener_id, accepted, created_at)
VALUES (?, ?, ?, ?)
ON CONFLICT (seeker_id, listener_id) DO UPDATE SET accepted = excluded.accepted
            "#,
        )
        .bind(seeker_id)
        .bind(listener_id)
        .bind(accepted)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// True when the two users share an accepted connection in either role.
    pub async fn has_accepted_connection(
        pool: &Pool<Sqlite>,
        user_a: i64,
        user_b: i64,
    ) -> Result<bool, AppError> {
        let found: Option<(i64,)> = sqlx::query_as(
            r#"
SELECT 1 FROM connections
WHERE accepted = 1
  AND ((seeker_id = ? AND listener_id = ?) OR (seeker_id = ? AND listener_id = ?))
LIMIT 1
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .fetch_optional(pool)
        .await?;

        Ok(found.is_some())
    }
}
