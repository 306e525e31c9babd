#![allow(dead_code)]

use std::sync::Arc;

use jsonwebtoken::{encode, EncodingKey, Header};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use support_chat::auth::{Claims, IdentityResolver};
use support_chat::broker::{Broker, LocalBroker};
use support_chat::chat::Dispatcher;
use support_chat::db::{self, User, UserRepository};

pub const SECRET: &str = "integration-test-secret";

/// A single-connection in-memory database with the schema applied.
pub async fn pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    db::migrate(&pool).await.expect("migrations");
    pool
}

/// A database file in a temp dir, shared by `connections` pooled connections.
pub struct FilePool {
    pub pool: Pool<Sqlite>,
    _dir: tempfile::TempDir,
}

pub async fn file_pool(connections: u32) -> FilePool {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("chat.db").display());
    let pool = SqlitePoolOptions::new()
        .max_connections(connections)
        .min_connections(connections)
        .connect_with(db::connect_options(&url).expect("connect options"))
        .await
        .expect("file database");
    db::migrate(&pool).await.expect("migrations");
    FilePool { pool, _dir: dir }
}

pub async fn user(pool: &Pool<Sqlite>, username: &str) -> User {
    UserRepository::create(
        pool,
        &format!("{username}@example.com"),
        username,
        &format!("{} Example", capitalize(username)),
    )
    .await
    .expect("create user")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn token_for(user_id: i64) -> String {
    token_with_exp(user_id, chrono::Utc::now().timestamp() as usize + 3600)
}

pub fn token_with_exp(user_id: i64, exp: usize) -> String {
    encode(
        &Header::default(),
        &Claims { user_id, exp },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode token")
}

pub struct Harness {
    pub pool: Pool<Sqlite>,
    pub broker: Arc<dyn Broker>,
    pub dispatcher: Dispatcher,
    pub identity: Arc<IdentityResolver>,
}

pub async fn harness() -> Harness {
    harness_on(pool().await)
}

pub fn harness_on(pool: Pool<Sqlite>) -> Harness {
    let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(64));
    let dispatcher = Dispatcher::new(pool.clone(), broker.clone(), 100);
    Harness {
        pool,
        broker,
        dispatcher,
        identity: Arc::new(IdentityResolver::new(SECRET)),
    }
}
