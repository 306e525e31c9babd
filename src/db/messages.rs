use std::collections::BTreeSet;

use sqlx::{Pool, QueryBuilder, Sqlite};
use crate::db::models::{Message, ReadReceipt};
use crate::error::AppError;

const SELECT_MESSAGE: &str = r#"
SELECT m.id, m.room_id, m.author_id, u.username AS author_username,
       u.full_name AS author_full_name, m.content, m.created_at
FROM messages m
JOIN users u ON m.author_id = u.id
"#;

pub struct MessageRepository;

impl MessageRepository {
    /// Persists a message. Returns `None`, writing nothing, when the room is gone.
    ///
    /// The insert and the read-back share one transaction: a RETURNING
    /// statement is not committed until it is reset, so a read on another
    /// pooled connection could miss the new row.
    pub async fn save(
        pool: &Pool<Sqlite>,
        author_id: i64,
        room_id: i64,
        content: &str,
    ) -> Result<Option<Message>, AppError> {
        let created_at = chrono::Utc::now();
        let mut tx = pool.begin().await?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
INSERT INTO messages (room_id, author_id, content, created_at)
SELECT ?, ?, ?, ?
WHERE EXISTS (SELECT 1 FROM rooms WHERE id = ?)
RETURNING id
            "#,
        )
        .bind(room_id)
        .bind(author_id)
        .bind(content)
        .bind(created_at)
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id,)) = inserted else {
            return Ok(None);
        };

        let message = sqlx::query_as::<_, Message>(&format!("{SELECT_MESSAGE} WHERE m.id = ?"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(message))
    }

    pub async fn get_by_id(
        pool: &Pool<Sqlite>,
        id: i64,
    ) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>(&format!("{SELECT_MESSAGE} WHERE m.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }

    /// One page of room history in ascending order, ending just before `before`
    /// (a message id) when given. Reading history never creates read markers.
    pub async fn get_page(
        pool: &Pool<Sqlite>,
        room_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        let mut messages = sqlx::query_as::<_, Message>(&format!(
            "{SELECT_MESSAGE} WHERE m.room_id = ? AND (? IS NULL OR m.id < ?) \
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?"
        ))
        .bind(room_id)
        .bind(before)
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    /// Filters `message_ids` down to messages of `room_id` not written by `user_id`.
    pub async fn readable_ids(
        pool: &Pool<Sqlite>,
        room_id: i64,
        user_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<i64>, AppError> {
        let ids: BTreeSet<i64> = message_ids.iter().copied().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new("SELECT id FROM messages WHERE room_id = ");
        query
            .push_bind(room_id)
            .push(" AND author_id != ")
            .push_bind(user_id)
            .push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id ASC");

        let rows: Vec<(i64,)> = query.build_query_as().fetch_all(pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Creates read markers for `user_id`. Only markers that did not exist
    /// before are returned; duplicates are absorbed by the primary key.
    pub async fn mark_read(
        pool: &Pool<Sqlite>,
        user_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<ReadReceipt>, AppError> {
        let ids: BTreeSet<i64> = message_ids.iter().copied().collect();
        let read_at = chrono::Utc::now();
        let mut created = Vec::new();
        let mut tx = pool.begin().await?;

        for id in ids {
            let receipt = sqlx::query_as::<_, ReadReceipt>(
                r#"
INSERT INTO message_reads (message_id, user_id, read_at)
SELECT id, ?, ? FROM messages WHERE id = ?
ON CONFLICT (message_id, user_id) DO NOTHING
RETURNING message_id, user_id, read_at
                "#,
            )
            .bind(user_id)
            .bind(read_at)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            created.extend(receipt);
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Marks every message in the room that `user_id` did not author and has
    /// not read yet, in one statement, returning exactly the new markers.
    pub async fn mark_all_unread_in_room(
        pool: &Pool<Sqlite>,
        user_id: i64,
        room_id: i64,
    ) -> Result<Vec<ReadReceipt>, AppError> {
        let read_at = chrono::Utc::now();

        let mut created = sqlx::query_as::<_, ReadReceipt>(
            r#"
INSERT INTO message_reads (message_id, user_id, read_at)
SELECT m.id, ?, ? FROM messages m
WHERE m.room_id = ? AND m.author_id != ?
ON CONFLICT (message_id, user_id) DO NOTHING
RETURNING message_id, user_id, read_at
            "#,
        )
        .bind(user_id)
        .bind(read_at)
        .bind(room_id)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        created.sort_by_key(|receipt| receipt.message_id);
        Ok(created)
    }

    pub async fn unread_count(
        pool: &Pool<Sqlite>,
        room_id: i64,
        user_id: i64,
    ) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
SELECT COUNT(*) FROM messages m
WHERE m.room_id = ? AND m.author_id != ?
  AND NOT EXISTS (
      SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?
  )
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Unread counts for every room the user participates in.
    pub async fn unread_counts_for_user(
        pool: &Pool<Sqlite>,
        user_id: i64,
    ) -> Result<Vec<(i64, i64)>, AppError> {
        let counts: Vec<(i64, i64)> = sqlx::query_as(
            r#"
SELECT p.room_id, (
    SELECT COUNT(*) FROM messages m
    WHERE m.room_id = p.room_id AND m.author_id != p.user_id
      AND NOT EXISTS (
          SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = p.user_id
      )
)
FROM room_participants p
WHERE p.user_id = ?
ORDER BY p.room_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(counts)
    }

    pub async fn is_read_by(
        pool: &Pool<Sqlite>,
        message_id: i64,
        user_id: i64,
    ) -> Result<bool, AppError> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM message_reads WHERE message_id = ? AND user_id = ?"
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(found.is_some())
    }
}
