//! HTTP route handlers

pub mod health;
pub mod nodes;
pub mod sync;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::context::SyncContext;
use crate::error::AppError;

/// Header naming the user a request acts for
pub const USER_HEADER: &str = "x-user-id";

/// Acting user, taken from the `x-user-id` header
#[derive(Debug, Clone)]
pub struct ActingUser(pub SyncContext);

#[async_trait]
impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| AppError::BadRequest(format!("Missing {} header", USER_HEADER)))?;

        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| AppError::BadRequest(format!("Invalid {} header", USER_HEADER)))?;

        Ok(ActingUser(SyncContext::new(user_id)))
    }
}
