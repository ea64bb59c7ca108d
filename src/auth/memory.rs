//! In-process `UserStore` used by unit tests. A single mutex makes every
//! operation atomic, matching the single-statement guarantees of the SQL store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::repo::UserStore;
use crate::auth::repo_types::{
    MediaSlot, NewUser, ProfileUpdate, RefreshGuard, SanitizedUser, StoreError, User,
};

fn guard_admits(guard: RefreshGuard<'_>, stored: Option<&str>) -> bool {
    match guard {
        RefreshGuard::Any => true,
        RefreshGuard::Matches(expected) => stored == Some(expected),
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_public_by_id(&self, id: Uuid) -> anyhow::Result<Option<SanitizedUser>> {
        Ok(self.find_by_id(id).await?.map(SanitizedUser::from))
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .iter()
            .find(|u| {
                username.map_or(false, |n| u.username.eq_ignore_ascii_case(n))
                    || email.map_or(false, |e| u.email.eq_ignore_ascii_case(e))
            })
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if users.iter().any(|u| {
            u.username.eq_ignore_ascii_case(&user.username) || u.email.eq_ignore_ascii_case(&user.email)
        }) {
            return Err(StoreError::Duplicate);
        }
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            password_hash: user.password_hash,
            refresh_token: None,
            avatar_url: user.avatar_url,
            cover_image_url: user.cover_image_url,
            created_at: now,
            updated_at: now,
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn replace_refresh_token(
        &self,
        id: Uuid,
        guard: RefreshGuard<'_>,
        next: Option<&str>,
    ) -> anyhow::Result<bool> {
        let mut users = self.users.lock().await;
        match users.iter_mut().find(|u| u.id == id) {
            Some(u) if guard_admits(guard, u.refresh_token.as_deref()) => {
                u.refresh_token = next.map(str::to_owned);
                u.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let mut users = self.users.lock().await;
        let Some(u) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(false);
        };
        u.password_hash = password_hash.to_owned();
        u.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<SanitizedUser>, StoreError> {
        let mut users = self.users.lock().await;
        if let Some(email) = &update.email {
            if users.iter().any(|u| u.id != id && u.email.eq_ignore_ascii_case(email)) {
                return Err(StoreError::Duplicate);
            }
        }
        let Some(u) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(full_name) = &update.full_name {
            u.full_name = full_name.clone();
        }
        if let Some(email) = &update.email {
            u.email = email.clone();
        }
        u.updated_at = OffsetDateTime::now_utc();
        Ok(Some(u.clone().into()))
    }

    async fn update_media(
        &self,
        id: Uuid,
        slot: MediaSlot,
        url: &str,
    ) -> anyhow::Result<Option<SanitizedUser>> {
        let mut users = self.users.lock().await;
        let Some(u) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        match slot {
            MediaSlot::Avatar => u.avatar_url = url.to_owned(),
            MediaSlot::CoverImage => u.cover_image_url = Some(url.to_owned()),
        }
        u.updated_at = OffsetDateTime::now_utc();
        Ok(Some(u.clone().into()))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut users = self.users.lock().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() != before)
    }
}

/// Wraps a [`MemoryUserStore`] and injects store faults or scheduling
/// points on demand. Switches can be flipped while the store is shared.
pub struct FlakyUserStore {
    inner: Arc<MemoryUserStore>,
    fail_token_writes: AtomicBool,
    fail_session_reads: AtomicBool,
    yield_after_find: AtomicBool,
}

impl FlakyUserStore {
    pub fn new(inner: Arc<MemoryUserStore>) -> Self {
        Self {
            inner,
            fail_token_writes: AtomicBool::new(false),
            fail_session_reads: AtomicBool::new(false),
            yield_after_find: AtomicBool::new(false),
        }
    }

    /// `replace_refresh_token` errors without touching the record.
    pub fn fail_token_writes(&self, on: bool) {
        self.fail_token_writes.store(on, Ordering::SeqCst);
    }

    /// `find_public_by_id` errors.
    pub fn fail_session_reads(&self, on: bool) {
        self.fail_session_reads.store(on, Ordering::SeqCst);
    }

    /// `find_by_id` hands control back to the scheduler before returning,
    /// so concurrent callers interleave between read and write.
    pub fn yield_after_find(&self, on: bool) {
        self.yield_after_find.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserStore for FlakyUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = self.inner.find_by_id(id).await?;
        if self.yield_after_find.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(user)
    }

    async fn find_public_by_id(&self, id: Uuid) -> anyhow::Result<Option<SanitizedUser>> {
        if self.fail_session_reads.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset by peer");
        }
        self.inner.find_public_by_id(id).await
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        self.inner.find_by_username_or_email(username, email).await
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        self.inner.create(user).await
    }

    async fn replace_refresh_token(
        &self,
        id: Uuid,
        guard: RefreshGuard<'_>,
        next: Option<&str>,
    ) -> anyhow::Result<bool> {
        if self.fail_token_writes.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset by peer");
        }
        self.inner.replace_refresh_token(id, guard, next).await
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        self.inner.update_password_hash(id, password_hash).await
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<SanitizedUser>, StoreError> {
        self.inner.update_profile(id, update).await
    }

    async fn update_media(
        &self,
        id: Uuid,
        slot: MediaSlot,
        url: &str,
    ) -> anyhow::Result<Option<SanitizedUser>> {
        self.inner.update_media(id, slot, url).await
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        self.inner.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            full_name: "Test User".into(),
            password_hash: "hash".into(),
            avatar_url: "https://media.local/a.png".into(),
            cover_image_url: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_username_or_email() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice", "alice@x.com")).await.unwrap();

        let dup_name = store.create(new_user("alice", "other@x.com")).await;
        assert!(matches!(dup_name, Err(StoreError::Duplicate)));

        let dup_email = store.create(new_user("bob", "alice@x.com")).await;
        assert!(matches!(dup_email, Err(StoreError::Duplicate)));

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn guarded_replace_only_applies_to_matching_token() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("alice", "alice@x.com")).await.unwrap();

        assert!(store
            .replace_refresh_token(user.id, RefreshGuard::Any, Some("t1"))
            .await
            .unwrap());
        assert!(!store
            .replace_refresh_token(user.id, RefreshGuard::Matches("stale"), Some("t2"))
            .await
            .unwrap());
        assert!(store
            .replace_refresh_token(user.id, RefreshGuard::Matches("t1"), Some("t2"))
            .await
            .unwrap());

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn lookup_matches_either_identifier() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice", "alice@x.com")).await.unwrap();

        assert!(store
            .find_by_username_or_email(None, Some("alice@x.com"))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_username_or_email(Some("alice"), None)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_username_or_email(Some("ALICE"), None)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_username_or_email(None, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn flaky_store_fails_only_when_switched_on() {
        let inner = Arc::new(MemoryUserStore::new());
        let user = inner.create(new_user("alice", "alice@x.com")).await.unwrap();
        let store = FlakyUserStore::new(inner.clone());

        store.fail_token_writes(true);
        assert!(store
            .replace_refresh_token(user.id, RefreshGuard::Any, Some("t1"))
            .await
            .is_err());
        assert!(inner.find_by_id(user.id).await.unwrap().unwrap().refresh_token.is_none());

        store.fail_token_writes(false);
        assert!(store
            .replace_refresh_token(user.id, RefreshGuard::Any, Some("t1"))
            .await
            .unwrap());
    }
}
