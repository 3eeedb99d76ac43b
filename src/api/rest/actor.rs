use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Identity is established upstream; the caller's id and role arrive as
/// headers.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?
            .to_str()
            .ok()
            .and_then(|raw| raw.parse::<Uuid>().ok())
            .ok_or_else(|| AppError::Unauthorized(format!("invalid {USER_ID_HEADER} header")))?;

        let role = match parts.headers.get(USER_ROLE_HEADER).map(|v| v.to_str()) {
            None => Role::User,
            Some(Ok("user")) => Role::User,
            Some(Ok("admin")) => Role::Admin,
            Some(_) => {
                return Err(AppError::Unauthorized(format!(
                    "invalid {USER_ROLE_HEADER} header"
                )));
            }
        };

        Ok(Actor { id, role })
    }
}
