//! Session extraction.
//!
//! Authentication happens upstream. The gateway forwards the caller's
//! identity in headers:
//!
//! - `X-User-Id`: user UUID (required)
//! - `X-User-Name`: display name (defaults to the user ID)
//! - `X-User-Role`: `member`, `staff` or `admin` (defaults to `member`)

use crate::session::{Role, Session};
use crate::types::UserId;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use passgate_web::AppError;
use uuid::Uuid;

/// Header carrying the user ID
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Header carrying the display name
pub const USER_NAME_HEADER: &str = "X-User-Name";
/// Header carrying the role
pub const USER_ROLE_HEADER: &str = "X-User-Role";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, AppError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| AppError::unauthenticated(format!("{name} is not valid text")))
        })
        .transpose()
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_id = header(parts, USER_ID_HEADER)?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::unauthenticated("Missing session"))?;
        let user_id = Uuid::parse_str(raw_id)
            .map(UserId::from_uuid)
            .map_err(|_| AppError::unauthenticated(format!("Invalid {USER_ID_HEADER}")))?;

        let role = match header(parts, USER_ROLE_HEADER)? {
            Some(role) if !role.is_empty() => role
                .parse::<Role>()
                .map_err(AppError::unauthenticated)?,
            _ => Role::Member,
        };

        let display_name = header(parts, USER_NAME_HEADER)?
            .filter(|name| !name.is_empty())
            .map_or_else(|| user_id.to_string(), str::to_string);

        Ok(Session::new(user_id, display_name, role))
    }
}
