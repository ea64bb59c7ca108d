use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{
    MediaSlot, NewUser, ProfileUpdate, RefreshGuard, SanitizedUser, StoreError, User,
};

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, refresh_token, \
                            avatar_url, cover_image_url, created_at, updated_at";
const PUBLIC_COLUMNS: &str =
    "id, username, email, full_name, avatar_url, cover_image_url, created_at, updated_at";

/// Persistence of user records. Every mutation is a single atomic statement.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Loads the user without password hash or refresh token.
    async fn find_public_by_id(&self, id: Uuid) -> anyhow::Result<Option<SanitizedUser>>;

    /// Matches on username OR email; either may be absent. Inputs must already be lowercased.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>>;

    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Sets the stored refresh token to `next` if `guard` admits the current value.
    /// Returns false when no row was changed (stale guard or unknown user).
    async fn replace_refresh_token(
        &self,
        id: Uuid,
        guard: RefreshGuard<'_>,
        next: Option<&str>,
    ) -> anyhow::Result<bool>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool>;

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<SanitizedUser>, StoreError>;

    async fn update_media(
        &self,
        id: Uuid,
        slot: MediaSlot,
        url: &str,
    ) -> anyhow::Result<Option<SanitizedUser>>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Matches through the `lower(...)` unique indexes.
fn identity_lookup_sql() -> String {
    format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users
        WHERE ($1::text IS NOT NULL AND lower(username) = lower($1))
           OR ($2::text IS NOT NULL AND lower(email) = lower($2))
        LIMIT 1
        "#
    )
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_public_by_id(&self, id: Uuid) -> anyhow::Result<Option<SanitizedUser>> {
        let user = sqlx::query_as::<_, SanitizedUser>(&format!(
            "SELECT {PUBLIC_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&identity_lookup_sql())
        .bind(username)
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, full_name, password_hash, avatar_url, cover_image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(&user.avatar_url)
        .bind(&user.cover_image_url)
        .fetch_one(&self.db)
        .await?;
        Ok(created)
    }

    async fn replace_refresh_token(
        &self,
        id: Uuid,
        guard: RefreshGuard<'_>,
        next: Option<&str>,
    ) -> anyhow::Result<bool> {
        let result = match guard {
            RefreshGuard::Any => {
                sqlx::query(
                    "UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1",
                )
                .bind(id)
                .bind(next)
                .execute(&self.db)
                .await?
            }
            RefreshGuard::Matches(expected) => {
                sqlx::query(
                    r#"
                    UPDATE users SET refresh_token = $2, updated_at = now()
                    WHERE id = $1 AND refresh_token = $3
                    "#,
                )
                .bind(id)
                .bind(next)
                .bind(expected)
                .execute(&self.db)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<SanitizedUser>, StoreError> {
        let user = sqlx::query_as::<_, SanitizedUser>(&format!(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                updated_at = now()
            WHERE id = $1
            RETURNING {PUBLIC_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.full_name)
        .bind(&update.email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_media(
        &self,
        id: Uuid,
        slot: MediaSlot,
        url: &str,
    ) -> anyhow::Result<Option<SanitizedUser>> {
        let column = match slot {
            MediaSlot::Avatar => "avatar_url",
            MediaSlot::CoverImage => "cover_image_url",
        };
        let user = sqlx::query_as::<_, SanitizedUser>(&format!(
            "UPDATE users SET {column} = $2, updated_at = now() WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
