use serde::Deserialize;
use sqlx::{Pool, QueryBuilder, Sqlite};
use crate::db::models::{Notification, NotificationSettings, NotificationStats, NotificationType};
use crate::error::AppError;

const SELECT_NOTIFICATION: &str = r#"
SELECT n.id, n.recipient_id, n.sender_id, s.full_name AS sender_full_name,
       n.notification_type, n.title, n.body, n.is_read, n.chat_room_id, n.message_id,
       n.created_at, n.updated_at
FROM notifications n
LEFT JOIN users s ON n.sender_id = s.id
"#;

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub sender_id: Option<i64>,
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub chat_room_id: Option<i64>,
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum NotificationOutcome {
    Created(Notification),
    /// The recipient switched this category off; nothing was written.
    Suppressed,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub message_notifications: Option<bool>,
    pub connection_notifications: Option<bool>,
    pub system_notifications: Option<bool>,
    pub email_notifications: Option<bool>,
    pub push_notifications: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub kind: Option<NotificationType>,
    pub is_read: Option<bool>,
}

pub struct NotificationRepository;

impl NotificationRepository {
    /// Settings for `user_id`, creating the all-enabled defaults on first access.
    pub async fn settings(
        pool: &Pool<Sqlite>,
        user_id: i64,
    ) -> Result<NotificationSettings, AppError> {
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
INSERT INTO notification_settings (user_id, created_at, updated_at)
VALUES (?, ?, ?)
ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        let settings = sqlx::query_as::<_, NotificationSettings>(
            "SELECT * FROM notification_settings WHERE user_id = ?"
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(settings)
    }

    pub async fn update_settings(
        pool: &Pool<Sqlite>,
        user_id: i64,
        update: &SettingsUpdate,
    ) -> Result<NotificationSettings, AppError> {
        // Make sure the row exists before patching it.
        Self::settings(pool, user_id).await?;
        let mut tx = pool.begin().await?;

        let settings = sqlx::query_as::<_, NotificationSettings>(
            r#"
UPDATE notification_settings SET
    message_notifications = COALESCE(?, message_notifications),
    connection_notifications = COALESCE(?, connection_notifications),
    system_notifications = COALESCE(?, system_notifications),
    email_notifications = COALESCE(?, email_notifications),
    push_notifications = COALESCE(?, push_notifications),
    updated_at = ?
WHERE user_id = ?
RETURNING *
            "#,
        )
        .bind(update.message_notifications)
        .bind(update.connection_notifications)
        .bind(update.system_notifications)
        .bind(update.email_notifications)
        .bind(update.push_notifications)
        .bind(chrono::Utc::now())
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(settings)
    }

    pub async fn create_if_enabled(
        pool: &Pool<Sqlite>,
        new: NewNotification,
    ) -> Result<NotificationOutcome, AppError> {
        let settings = Self::settings(pool, new.recipient_id).await?;
        if !settings.allows(new.kind) {
            return Ok(NotificationOutcome::Suppressed);
        }

        let now = chrono::Utc::now();
        // Insert and read-back on one connection, committed together.
        let mut tx = pool.begin().await?;
        let (id,): (i64,) = sqlx::query_as(
            r#"
INSERT INTO notifications
    (recipient_id, sender_id, notification_type, title, body, is_read,
     chat_room_id, message_id, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
RETURNING id
            "#,
        )
        .bind(new.recipient_id)
        .bind(new.sender_id)
        .bind(new.kind)
        .bind(&new.title)
        .bind(&new.body)
        .bind(new.chat_room_id)
        .bind(new.message_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let notification = sqlx::query_as::<_, Notification>(&format!(
            "{SELECT_NOTIFICATION} WHERE n.id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(NotificationOutcome::Created(notification))
    }

    pub async fn get(
        pool: &Pool<Sqlite>,
        id: i64,
        recipient_id: i64,
    ) -> Result<Option<Notification>, AppError> {
        let notification = sqlx::query_as::<_, Notification>(&format!(
            "{SELECT_NOTIFICATION} WHERE n.id = ? AND n.recipient_id = ?"
        ))
        .bind(id)
        .bind(recipient_id)
        .fetch_optional(pool)
        .await?;

        Ok(notification)
    }

    pub async fn set_read(
        pool: &Pool<Sqlite>,
        id: i64,
        recipient_id: i64,
        is_read: bool,
    ) -> Result<Option<Notification>, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = ?, updated_at = ? WHERE id = ? AND recipient_id = ?"
        )
        .bind(is_read)
        .bind(chrono::Utc::now())
        .bind(id)
        .bind(recipient_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::get(pool, id, recipient_id).await
    }

    pub async fn mark_read(
        pool: &Pool<Sqlite>,
        id: i64,
        recipient_id: i64,
    ) -> Result<Option<Notification>, AppError> {
        Self::set_read(pool, id, recipient_id, true).await
    }

    pub async fn mark_all_read(
        pool: &Pool<Sqlite>,
        recipient_id: i64,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
UPDATE notifications SET is_read = 1, updated_at = ?
WHERE recipient_id = ? AND is_read = 0
            "#,
        )
        .bind(chrono::Utc::now())
        .bind(recipient_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete(
        pool: &Pool<Sqlite>,
        id: i64,
        recipient_id: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND recipient_id = ?")
            .bind(id)
            .bind(recipient_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Newest first. Returns the page plus the number of rows matching `filter`.
    pub async fn list(
        pool: &Pool<Sqlite>,
        recipient_id: i64,
        filter: &NotificationFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Notification>, i64), AppError> {
        let offset = (page.max(1) - 1) * page_size;

        let mut query = QueryBuilder::<Sqlite>::new(SELECT_NOTIFICATION);
        push_filter(&mut query, recipient_id, filter);
        query
            .push(" ORDER BY n.created_at DESC, n.id DESC LIMIT ")
            .push_bind(page_size)
            .push(" OFFSET ")
            .push_bind(offset);
        let notifications = query
            .build_query_as::<Notification>()
            .fetch_all(pool)
            .await?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM notifications n");
        push_filter(&mut count, recipient_id, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(pool).await?;

        Ok((notifications, total))
    }

    pub async fn unread_count(
        pool: &Pool<Sqlite>,
        recipient_id: i64,
    ) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND is_read = 0"
        )
        .bind(recipient_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    pub async fn stats(
        pool: &Pool<Sqlite>,
        recipient_id: i64,
    ) -> Result<NotificationStats, AppError> {
        let (total, unread, message, connection, system): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
SELECT
    COUNT(*),
    COALESCE(SUM(is_read = 0), 0),
    COALESCE(SUM(notification_type = 'message'), 0),
    COALESCE(SUM(notification_type IN
        ('connection_request', 'connection_accepted', 'connection_rejected')), 0),
    COALESCE(SUM(notification_type = 'system'), 0)
FROM notifications
WHERE recipient_id = ?
                "#,
            )
            .bind(recipient_id)
            .fetch_one(pool)
            .await?;

        Ok(NotificationStats {
            total,
            unread,
            message,
            connection,
            system,
        })
    }
}

fn push_filter(
    query: &mut QueryBuilder<'_, Sqlite>,
    recipient_id: i64,
    filter: &NotificationFilter,
) {
    query.push(" WHERE n.recipient_id = ").push_bind(recipient_id);
    if let Some(kind) = filter.kind {
        query.push(" AND n.notification_type = ").push_bind(kind);
    }
    if let Some(is_read) = filter.is_read {
        query.push(" AND n.is_read = ").push_bind(is_read);
    }
}
