use std::sync::Arc;

use anyhow::Context;

use crate::auth::repo::{PgUserStore, UserStore};
use crate::auth::tokens::TokenService;
use crate::config::AppConfig;
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub storage: Arc<dyn StorageClient>,
    pub tokens: Arc<TokenService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Builds the production state and returns the pool so `main` can run migrations.
    pub async fn init() -> anyhow::Result<(Self, sqlx::PgPool)> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let storage = Arc::new(Storage::new(&config.media).await?) as Arc<dyn StorageClient>;
        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;

        Ok((Self::from_parts(users, storage, config), db))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        storage: Arc<dyn StorageClient>,
        config: Arc<AppConfig>,
    ) -> Self {
        let tokens = Arc::new(TokenService::from_config(&config.jwt));
        Self {
            users,
            storage,
            tokens,
            config,
        }
    }
}

#[cfg(test)]
pub use fakes::{test_config, FakeStorage};
