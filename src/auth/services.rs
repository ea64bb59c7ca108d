use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::dto::{ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateAccountRequest};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo_types::{MediaSlot, NewUser, ProfileUpdate, RefreshGuard, SanitizedUser, StoreError};
use crate::auth::tokens::{RotateError, TokenPair};
use crate::error::ApiError;
use crate::media::{self, StoredMedia, AVATAR_FOLDER, COVER_FOLDER};
use crate::state::AppState;
use crate::uploads::UploadedFile;

const TOKENS_FAILED: &str = "Something went wrong while generating access and refresh tokens";
const STALE_REFRESH: &str = "Refresh token is expired or used";
const INVALID_REFRESH: &str = "Invalid refresh token";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed value, or `None` when absent or whitespace only.
fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn normalized_email(v: Option<String>) -> Option<String> {
    non_blank(v).map(|s| s.to_lowercase())
}

pub async fn register(
    st: &AppState,
    req: RegisterRequest,
    avatar: Option<UploadedFile>,
    cover_image: Option<UploadedFile>,
) -> Result<SanitizedUser, ApiError> {
    let password = req.password.filter(|p| !p.trim().is_empty());
    let (Some(username), Some(email), Some(full_name), Some(password)) = (
        non_blank(req.username).map(|s| s.to_lowercase()),
        normalized_email(req.email),
        non_blank(req.full_name),
        password,
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }

    let existing = st
        .users
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?;
    if existing.is_some() {
        warn!(username = %username, email = %email, "identity already registered");
        return Err(ApiError::conflict("User with email or username already exists"));
    }

    let Some(avatar) = avatar else {
        return Err(ApiError::bad_request("Avatar file is required"));
    };

    let password_hash =
        hash_password(&password).map_err(|e| ApiError::internal("Internal server error", e))?;

    let avatar = media::upload_image(st.storage.as_ref(), AVATAR_FOLDER, avatar)
        .await
        .map_err(|e| {
            warn!(error = %e, "avatar upload failed");
            ApiError::bad_request("Avatar file is required")
        })?;

    let cover_image = match cover_image {
        Some(file) => match media::upload_image(st.storage.as_ref(), COVER_FOLDER, file).await {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "cover image upload failed; continuing without it");
                None
            }
        },
        None => None,
    };

    let new_user = NewUser {
        username,
        email,
        full_name,
        password_hash,
        avatar_url: avatar.url.clone(),
        cover_image_url: cover_image.as_ref().map(|m| m.url.clone()),
    };

    let uploaded: Vec<StoredMedia> = std::iter::once(avatar).chain(cover_image).collect();
    match st.users.create(new_user).await {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "user registered");
            Ok(user.into())
        }
        Err(StoreError::Duplicate) => {
            media::discard(st.storage.as_ref(), &uploaded).await;
            Err(ApiError::conflict("User with email or username already exists"))
        }
        Err(StoreError::Other(e)) => {
            media::discard(st.storage.as_ref(), &uploaded).await;
            Err(ApiError::internal(
                "Something went wrong while registering the user",
                format!("{:#}", e),
            ))
        }
    }
}

pub async fn login(st: &AppState, req: LoginRequest) -> Result<(SanitizedUser, TokenPair), ApiError> {
    let username = non_blank(req.username).map(|s| s.to_lowercase());
    let email = normalized_email(req.email);
    if username.is_none() && email.is_none() {
        return Err(ApiError::bad_request("username or email is required"));
    }

    let user = st
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    let ok = verify_password(&req.password, &user.password_hash)
        .map_err(|e| ApiError::internal("Internal server error", e))?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid Password"));
    }

    let pair = match st.tokens.rotate(st.users.as_ref(), user.id, RefreshGuard::Any).await {
        Ok(pair) => pair,
        Err(RotateError::Stale) => return Err(ApiError::not_found("User does not exist")),
        Err(RotateError::Internal(e)) => {
            return Err(ApiError::internal(TOKENS_FAILED, format!("{:#}", e)))
        }
    };

    let user = st
        .users
        .find_public_by_id(user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    info!(user_id = %user.id, "user logged in");
    Ok((user, pair))
}

pub async fn logout(st: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    let cleared = st
        .users
        .replace_refresh_token(user_id, RefreshGuard::Any, None)
        .await?;
    if !cleared {
        warn!(user_id = %user_id, "logout for missing user");
    }
    info!(user_id = %user_id, "user logged out");
    Ok(())
}

/// Exchanges the presented refresh token for a new pair. The token must
/// verify and equal the stored value; the swap itself is conditional on
/// that value, so a replayed token loses even under concurrency.
pub async fn refresh(st: &AppState, presented: Option<String>) -> Result<TokenPair, ApiError> {
    let Some(presented) = non_blank(presented) else {
        return Err(ApiError::unauthorized("Unauthorized request"));
    };

    let claims = st
        .tokens
        .verify(&presented, TokenKind::Refresh)
        .map_err(|_| ApiError::unauthorized(INVALID_REFRESH))?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized(INVALID_REFRESH))?;

    if user.refresh_token.as_deref() != Some(presented.as_str()) {
        warn!(user_id = %user.id, "refresh token reuse or revoked token");
        return Err(ApiError::unauthorized(STALE_REFRESH));
    }

    let pair = st
        .tokens
        .rotate(st.users.as_ref(), user.id, RefreshGuard::Matches(&presented))
        .await
        .map_err(|e| match e {
            RotateError::Stale => ApiError::unauthorized(STALE_REFRESH),
            RotateError::Internal(e) => ApiError::internal(TOKENS_FAILED, format!("{:#}", e)),
        })?;

    info!(user_id = %user.id, "access token refreshed");
    Ok(pair)
}

pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<(), ApiError> {
    if req.new_password != req.confirm_password {
        return Err(ApiError::unauthorized(
            "newPassword and confirmPassword must be same",
        ));
    }

    let present = |v: Option<String>| v.filter(|p| !p.trim().is_empty());
    let (Some(current), Some(new_password), Some(_)) = (
        present(req.current_password),
        present(req.new_password),
        present(req.confirm_password),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };

    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    let ok = verify_password(&current, &user.password_hash)
        .map_err(|e| ApiError::internal("Internal server error", e))?;
    if !ok {
        warn!(user_id = %user_id, "change password with wrong current password");
        return Err(ApiError::bad_request("Incorrect current password"));
    }

    let hash =
        hash_password(&new_password).map_err(|e| ApiError::internal("Internal server error", e))?;
    if !st.users.update_password_hash(user_id, &hash).await? {
        return Err(ApiError::not_found("User does not exist"));
    }

    info!(user_id = %user_id, "password changed");
    Ok(())
}

pub async fn update_account(
    st: &AppState,
    user_id: Uuid,
    req: UpdateAccountRequest,
) -> Result<SanitizedUser, ApiError> {
    let update = ProfileUpdate {
        full_name: non_blank(req.full_name),
        email: normalized_email(req.email),
    };
    if update.full_name.is_none() && update.email.is_none() {
        return Err(ApiError::bad_request("All fields are required"));
    }
    if let Some(email) = &update.email {
        if !is_valid_email(email) {
            return Err(ApiError::bad_request("Invalid email"));
        }
    }

    let user = match st.users.update_profile(user_id, &update).await {
        Ok(Some(u)) => u,
        Ok(None) => return Err(ApiError::not_found("User does not exist")),
        Err(StoreError::Duplicate) => {
            return Err(ApiError::conflict("User with email already exists"))
        }
        Err(StoreError::Other(e)) => return Err(e.into()),
    };

    info!(user_id = %user_id, "account details updated");
    Ok(user)
}

pub async fn update_media(
    st: &AppState,
    user_id: Uuid,
    slot: MediaSlot,
    file: Option<UploadedFile>,
) -> Result<SanitizedUser, ApiError> {
    let (folder, missing) = match slot {
        MediaSlot::Avatar => (AVATAR_FOLDER, "Avatar file missing"),
        MediaSlot::CoverImage => (COVER_FOLDER, "coverImage file missing"),
    };
    let Some(file) = file else {
        return Err(ApiError::bad_request(missing));
    };

    let stored = media::upload_image(st.storage.as_ref(), folder, file)
        .await
        .map_err(|e| {
            warn!(error = %e, user_id = %user_id, slot = ?slot, "image upload failed");
            ApiError::bad_request("Error while uploading")
        })?;

    match st.users.update_media(user_id, slot, &stored.url).await {
        Ok(Some(user)) => {
            info!(user_id = %user_id, slot = ?slot, "image updated");
            Ok(user)
        }
        Ok(None) => {
            media::discard(st.storage.as_ref(), std::slice::from_ref(&stored)).await;
            Err(ApiError::not_found("User does not exist"))
        }
        Err(e) => {
            media::discard(st.storage.as_ref(), std::slice::from_ref(&stored)).await;
            Err(e.into())
        }
    }
}

/// Hard delete. Returns the record as it was just before removal.
pub async fn delete_account(st: &AppState, user_id: Uuid) -> Result<SanitizedUser, ApiError> {
    let snapshot = st
        .users
        .find_public_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    if !st.users.delete(user_id).await? {
        error!(user_id = %user_id, "user vanished between snapshot and delete");
        return Err(ApiError::not_found("User does not exist"));
    }

    info!(user_id = %user_id, "user deleted");
    Ok(snapshot)
}
