use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::db::{User, UserRepository};

/// Claims carried by access tokens issued by the account service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub enum Identity {
    User(User),
    Anonymous,
}

impl Identity {
    pub fn into_user(self) -> Option<User> {
        match self {
            Identity::User(user) => Some(user),
            Identity::Anonymous => None,
        }
    }
}

/// Verifies bearer tokens and loads the user they name.
///
/// Never fails: every problem (missing token, bad signature, expiry,
/// unknown or inactive user, store error) resolves to `Identity::Anonymous`.
pub struct IdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityResolver {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signature and expiry check only; returns the claimed user id.
    pub fn verify(&self, token: &str) -> Option<i64> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims.user_id),
            Err(e) => {
                tracing::debug!(error = %e, "rejected bearer token");
                None
            }
        }
    }

    pub async fn resolve(&self, pool: &Pool<Sqlite>, token: Option<&str>) -> Identity {
        let Some(user_id) = token.and_then(|t| self.verify(t)) else {
            return Identity::Anonymous;
        };

        match UserRepository::get_by_id(pool, user_id).await {
            Ok(Some(user)) if user.is_active => Identity::User(user),
            Ok(_) => {
                tracing::debug!(user_id, "token names an unknown or inactive user");
                Identity::Anonymous
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to load user for token");
                Identity::Anonymous
            }
        }
    }
}
