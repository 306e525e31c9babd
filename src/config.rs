use crate::error::AppError;

const DEV_JWT_SECRET: &str = "development-only-jwt-secret";

#[derive(Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub request_timeout_secs: u64,
    /// HS256 secret shared with the service that issues access tokens.
    pub jwt_secret: String,
    /// Per-group buffer of the in-process broker; slower subscribers lag.
    pub broker_capacity: usize,
    /// Set to run several server processes behind one Redis; unset keeps
    /// every group in this process.
    pub redis_url: Option<String>,
    pub notification_preview_chars: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_host: std::env::var("SERVER_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: std::env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid SERVER_PORT: {}", e)))?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://support_chat.db?mode=rwc".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid DB_MAX_CONNECTIONS: {}", e)))?,
            db_min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid DB_MIN_CONNECTIONS: {}", e)))?,
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid REQUEST_TIMEOUT_SECS: {}", e)))?,
            jwt_secret: jwt_secret_from_env()?,
            broker_capacity: std::env::var("BROKER_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid BROKER_CAPACITY: {}", e)))?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            notification_preview_chars: std::env::var("NOTIFICATION_PREVIEW_CHARS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|e| {
                    AppError::Config(format!("Invalid NOTIFICATION_PREVIEW_CHARS: {}", e))
                })?,
        })
    }

    /// Defaults suitable for tests and local runs, with the given token secret.
    pub fn for_secret(jwt_secret: impl Into<String>) -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            db_min_connections: 1,
            request_timeout_secs: 30,
            jwt_secret: jwt_secret.into(),
            broker_capacity: 1024,
            redis_url: None,
            notification_preview_chars: 100,
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn jwt_secret_from_env() -> Result<String, AppError> {
    match std::env::var("JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => Ok(secret),
        _ if cfg!(debug_assertions) => {
            tracing::warn!("JWT_SECRET not set, using the development secret");
            Ok(DEV_JWT_SECRET.to_string())
        }
        _ => Err(AppError::Config("JWT_SECRET must be set".to_string())),
    }
}
