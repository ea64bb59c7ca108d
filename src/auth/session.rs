use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, warn};

use crate::auth::claims::TokenKind;
use crate::auth::cookies::ACCESS_COOKIE;
use crate::auth::repo_types::SanitizedUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated identity attached to the request by [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub SanitizedUser);

/// Cookie first, then `Authorization: Bearer <token>`.
fn candidate_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(c) = jar.get(ACCESS_COOKIE) {
        if !c.value().is_empty() {
            return Some(c.value().to_string());
        }
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Rejects the request with 401 unless it carries a valid access token for
/// an existing user; otherwise stores [`CurrentUser`] in the extensions.
pub async fn require_session(
    State(st): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = candidate_token(&jar, req.headers()) else {
        return Err(ApiError::unauthorized("Unauthorized request"));
    };

    let claims = st.tokens.verify(&token, TokenKind::Access).map_err(|_| {
        warn!("invalid or expired access token");
        ApiError::unauthorized("Invalid access token")
    })?;

    let user = match st.users.find_public_by_id(claims.sub).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(user_id = %claims.sub, "access token for missing user");
            return Err(ApiError::unauthorized("Invalid access token"));
        }
        Err(e) => {
            error!(error = %e, user_id = %claims.sub, "session lookup failed");
            return Err(ApiError::unauthorized("Invalid access token"));
        }
    };

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))
    }
}
