pub mod models;
pub mod users;
pub mod rooms;
pub mod messages;
pub mod notifications;

pub use models::{
    Message, Notification, NotificationSettings, NotificationStats, NotificationType,
    ReadReceipt, Room, RoomKind, User,
};
pub use users::UserRepository;
pub use rooms::RoomRepository;
pub use messages::MessageRepository;
pub use notifications::{
    NewNotification, NotificationFilter, NotificationOutcome, NotificationRepository,
    SettingsUpdate,
};

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::error::AppError;

/// Opens the pool described by `config` and brings the schema up to date.
pub async fn connect(config: &Config) -> Result<Pool<Sqlite>, AppError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(connect_options(&config.database_url)?)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// WAL lets readers proceed during a write; writers queue on the busy timeout.
pub fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, AppError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    Ok(options)
}

pub async fn migrate(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
