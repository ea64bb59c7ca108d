use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::instrument;

use crate::{
    auth::{
        cookies::{with_tokens, without_tokens, REFRESH_COOKIE},
        dto::{
            ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, RegisterRequest,
            UpdateAccountRequest,
        },
        repo_types::{MediaSlot, SanitizedUser},
        services,
        session::{require_session, CurrentUser},
        tokens::TokenPair,
    },
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    uploads::MultipartForm,
};

type Empty = serde_json::Map<String, serde_json::Value>;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
}

pub fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(current_user))
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/update-user", post(update_user))
        .route("/update-avatar", post(update_avatar))
        .route("/update-cover-image", post(update_cover_image))
        .route("/delete-user", delete(delete_user))
        .route_layer(from_fn_with_state(state, require_session))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

async fn multipart_form(
    mp: Result<Multipart, MultipartRejection>,
    file_fields: &[&str],
) -> Result<MultipartForm, ApiError> {
    let mp = mp.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    MultipartForm::read(mp, file_fields).await
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<SanitizedUser>, ApiError> {
    let mut form = multipart_form(mp, &["avatar", "coverImage"]).await?;
    let req = RegisterRequest {
        username: form.text("username").map(str::to_owned),
        email: form.text("email").map(str::to_owned),
        full_name: form.text("fullName").map(str::to_owned),
        password: form.text("password").map(str::to_owned),
    };
    let avatar = form.take_file("avatar");
    let cover_image = form.take_file("coverImage");

    let user = services::register(&state, req, avatar, cover_image).await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered successfully",
    ))
}

#[instrument(skip(state, jar, body))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, ApiResponse<LoginResponse>), ApiError> {
    let (user, pair) = services::login(&state, json_body(body)?).await?;
    let jar = with_tokens(jar, &pair, state.config.cookie_secure);
    Ok((
        jar,
        ApiResponse::ok(
            LoginResponse {
                user,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

#[instrument(skip(state, jar, user), fields(user_id = %user.0.id))]
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<Empty>), ApiError> {
    services::logout(&state, user.0.id).await?;
    Ok((without_tokens(jar), ApiResponse::ok(Empty::new(), "User logged out")))
}

#[instrument(skip(state, jar, body))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<TokenPair>), ApiError> {
    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));

    let pair = services::refresh(&state, presented).await?;
    let jar = with_tokens(jar, &pair, state.config.cookie_secure);
    Ok((jar, ApiResponse::ok(pair, "Access token refreshed successfully")))
}

#[instrument(skip(state, user, body), fields(user_id = %user.0.id))]
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<Empty>, ApiError> {
    services::change_password(&state, user.0.id, json_body(body)?).await?;
    Ok(ApiResponse::ok(Empty::new(), "Password changed successfully"))
}

pub async fn current_user(CurrentUser(user): CurrentUser) -> ApiResponse<SanitizedUser> {
    ApiResponse::ok(user, "current user fetched")
}

#[instrument(skip(state, user, body), fields(user_id = %user.0.id))]
pub async fn update_user(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<ApiResponse<SanitizedUser>, ApiError> {
    let updated = services::update_account(&state, user.0.id, json_body(body)?).await?;
    Ok(ApiResponse::ok(updated, "User details updated successfully"))
}

#[instrument(skip(state, user, mp), fields(user_id = %user.0.id))]
pub async fn update_avatar(
    State(state): State<AppState>,
    user: CurrentUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<SanitizedUser>, ApiError> {
    let mut form = multipart_form(mp, &["avatar"]).await?;
    let updated =
        services::update_media(&state, user.0.id, MediaSlot::Avatar, form.take_file("avatar"))
            .await?;
    Ok(ApiResponse::ok(updated, "avatar updated successfully"))
}

#[instrument(skip(state, user, mp), fields(user_id = %user.0.id))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    user: CurrentUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<SanitizedUser>, ApiError> {
    let mut form = multipart_form(mp, &["coverImage"]).await?;
    let file = form.take_file("coverImage");
    let updated = services::update_media(&state, user.0.id, MediaSlot::CoverImage, file).await?;
    Ok(ApiResponse::ok(updated, "coverImage updated successfully"))
}

#[instrument(skip(state, user, jar), fields(user_id = %user.0.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<SanitizedUser>), ApiError> {
    let snapshot = services::delete_account(&state, user.0.id).await?;
    Ok((
        without_tokens(jar),
        ApiResponse::ok(snapshot, "User deleted successfully"),
    ))
}
