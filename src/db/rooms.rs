use sqlx::{Pool, Sqlite};
use crate::db::models::{Room, RoomKind, User};
use crate::error::AppError;

pub struct RoomRepository;

/// Key identifying the unordered pair of a one_to_one room.
fn direct_key(user_a: i64, user_b: i64) -> String {
    let (low, high) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };
    format!("{}:{}", low, high)
}

impl RoomRepository {
    pub async fn is_participant(
        pool: &Pool<Sqlite>,
        user_id: i64,
        room_id: i64,
    ) -> Result<bool, AppError> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM room_participants WHERE room_id = ? AND user_id = ?"
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(found.is_some())
    }

    /// Returns the single one_to_one room for the pair, creating it on first use.
    ///
    /// The `direct_key` unique constraint makes concurrent callers converge on
    /// the same row: losers of the insert race fall through to the lookup.
    pub async fn find_or_create_direct_room(
        pool: &Pool<Sqlite>,
        user_a: i64,
        user_b: i64,
    ) -> Result<Room, AppError> {
        if user_a == user_b {
            return Err(AppError::BadRequest(
                "A direct room needs two distinct participants".to_string(),
            ));
        }

        let key = direct_key(user_a, user_b);
        let now = chrono::Utc::now();
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO rooms (name, kind, direct_key, created_at)
VALUES (NULL, 'one_to_one', ?, ?)
ON CONFLICT (direct_key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let room = sqlx::query_as::<_, Room>(
            "SELECT id, name, kind, created_at FROM rooms WHERE direct_key = ?"
        )
        .bind(&key)
        .fetch_one(&mut *tx)
        .await?;

        for user_id in [user_a, user_b] {
            sqlx::query(
                r#"
INSERT INTO room_participants (room_id, user_id, joined_at)
VALUES (?, ?, ?)
ON CONFLICT (room_id, user_id) DO NOTHING
                "#,
            )
            .bind(room.id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(room)
    }

    pub async fn create_community_room(
        pool: &Pool<Sqlite>,
        name: &str,
        creator_id: i64,
    ) -> Result<Room, AppError> {
        let now = chrono::Utc::now();
        let mut tx = pool.begin().await?;

        let room = sqlx::query_as::<_, Room>(
            r#"
INSERT INTO rooms (name, kind, direct_key, created_at)
VALUES (?, 'community', NULL, ?)
RETURNING id, name, kind, created_at
            "#,
        )
        .bind(name)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO room_participants (room_id, user_id, joined_at) VALUES (?, ?, ?)")
            .bind(room.id)
            .bind(creator_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(room)
    }

    pub async fn participants(
        pool: &Pool<Sqlite>,
        room_id: i64,
    ) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            r#"
SELECT u.id, u.email, u.username, u.full_name, u.is_active, u.created_at
FROM room_participants p
JOIN users u ON p.user_id = u.id
WHERE p.room_id = ?
ORDER BY p.joined_at ASC, u.id ASC
            "#
        )
        .bind(room_id)
        .fetch_all(pool)
        .await?;

        Ok(users)
    }

    pub async fn list_for_user(
        pool: &Pool<Sqlite>,
        user_id: i64,
    ) -> Result<Vec<Room>, AppError> {
        let rooms = sqlx::query_as::<_, Room>(
            r#"
SELECT r.id, r.name, r.kind, r.created_at
FROM rooms r
JOIN room_participants p ON p.room_id = r.id
WHERE p.user_id = ?
ORDER BY r.created_at DESC, r.id DESC
            "#
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(rooms)
    }

    pub async fn list_by_kind(
        pool: &Pool<Sqlite>,
        kind: RoomKind,
    ) -> Result<Vec<Room>, AppError> {
        let rooms = sqlx::query_as::<_, Room>(
            r#"
SELECT id, name, kind, created_at FROM rooms
WHERE kind = ?
ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(kind)
        .fetch_all(pool)
        .await?;

        Ok(rooms)
    }

    pub async fn remove_participant(
        pool: &Pool<Sqlite>,
        room_id: i64,
        user_id: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM room_participants WHERE room_id = ? AND user_id = ?")
            .bind(room_id)
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::direct_key;

    #[test]
    fn direct_key_is_order_independent() {
        assert_eq!(direct_key(7, 3), "3:7");
        assert_eq!(direct_key(3, 7), "3:7");
    }
}
