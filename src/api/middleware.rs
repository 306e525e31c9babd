use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::api::state::AppState;
use crate::auth::Identity;
use crate::error::AppError;

/// Authentication middleware - resolves the bearer JWT into a `User` extension
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing Authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid Authorization format".to_string()))?;

    let user = match state.identity.resolve(&state.db, Some(token)).await {
        Identity::User(user) => user,
        Identity::Anonymous => {
            return Err(AppError::Auth("Invalid or expired token".to_string()));
        }
    };

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
