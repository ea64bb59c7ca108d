use std::time::Duration;

use anyhow::Context;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::auth::repo::UserStore;
use crate::auth::repo_types::RefreshGuard;
use crate::config::JwtConfig;

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn from_secret(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::from_secs(ttl_minutes.max(0) as u64 * 60),
        }
    }
}

/// Mints and verifies access/refresh JWTs. Each kind has its own secret and lifetime.
#[derive(Clone)]
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
    audience: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Expired, forged, malformed and wrong-kind tokens are all reported the same way.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid or expired token")]
    Invalid,
}

#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    /// The guarded update did not apply: the presented refresh token is no
    /// longer the stored one, or the user is gone.
    #[error("refresh token is expired or used")]
    Stale,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TokenService {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            access: SigningKeys::from_secret(&cfg.access_secret, cfg.access_ttl_minutes),
            refresh: SigningKeys::from_secret(&cfg.refresh_secret, cfg.refresh_ttl_minutes),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn sign_at(&self, user_id: Uuid, kind: TokenKind, now: OffsetDateTime) -> anyhow::Result<String> {
        let keys = self.keys(kind);
        let exp = now + TimeDuration::seconds(keys.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp().max(0) as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::default(), &claims, &keys.encoding)
            .with_context(|| format!("sign {:?} token", kind))?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn issue_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_at(user_id, TokenKind::Access, OffsetDateTime::now_utc())
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_at(user_id, TokenKind::Refresh, OffsetDateTime::now_utc())
    }

    /// Checks signature (with the secret for `kind`), expiry, issuer, audience and kind.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation).map_err(|e| {
            debug!(error = %e, kind = ?kind, "jwt rejected");
            TokenError::Invalid
        })?;
        if data.claims.kind != kind {
            debug!(expected = ?kind, got = ?data.claims.kind, "jwt kind mismatch");
            return Err(TokenError::Invalid);
        }
        debug!(user_id = %data.claims.sub, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }

    /// Issues a fresh pair and stores the new refresh token in one guarded
    /// update. Nothing is returned unless the update applied.
    pub async fn rotate(
        &self,
        store: &dyn UserStore,
        user_id: Uuid,
        guard: RefreshGuard<'_>,
    ) -> Result<TokenPair, RotateError> {
        let access_token = self.issue_access(user_id)?;
        let refresh_token = self.issue_refresh(user_id)?;

        let applied = store
            .replace_refresh_token(user_id, guard, Some(&refresh_token))
            .await
            .context("persist rotated refresh token")?;
        if !applied {
            warn!(user_id = %user_id, "refresh token rotation lost its guard");
            return Err(RotateError::Stale);
        }

        info!(user_id = %user_id, "tokens rotated");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryUserStore;
    use crate::auth::repo_types::NewUser;

    fn make_service(access: &str, refresh: &str) -> TokenService {
        TokenService::from_config(&JwtConfig {
            access_secret: access.into(),
            refresh_secret: refresh.into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 15,
            refresh_ttl_minutes: 60 * 24,
        })
    }

    async fn seeded_store() -> (MemoryUserStore, Uuid) {
        let store = MemoryUserStore::new();
        let user = store
            .create(NewUser {
                username: "alice".into(),
                email: "alice@x.com".into(),
                full_name: "Alice".into(),
                password_hash: "hash".into(),
                avatar_url: "https://media.local/a.png".into(),
                cover_image_url: None,
            })
            .await
            .unwrap();
        (store, user.id)
    }

    #[test]
    fn access_token_round_trip_returns_user_id() {
        let svc = make_service("access-secret", "refresh-secret");
        let user_id = Uuid::new_v4();
        let token = svc.issue_access(user_id).expect("sign access");
        let claims = svc.verify(&token, TokenKind::Access).expect("verify access");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn verify_fails_with_other_secret() {
        let svc = make_service("access-secret", "refresh-secret");
        let other = make_service("another-secret", "refresh-secret");
        let token = svc.issue_access(Uuid::new_v4()).unwrap();
        assert!(other.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn access_and_refresh_are_not_interchangeable() {
        let svc = make_service("access-secret", "refresh-secret");
        let access = svc.issue_access(Uuid::new_v4()).unwrap();
        let refresh = svc.issue_refresh(Uuid::new_v4()).unwrap();
        assert!(svc.verify(&access, TokenKind::Refresh).is_err());
        assert!(svc.verify(&refresh, TokenKind::Access).is_err());
        assert!(svc.verify(&refresh, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = make_service("access-secret", "refresh-secret");
        let long_ago = OffsetDateTime::now_utc() - TimeDuration::hours(2);
        let token = svc
            .sign_at(Uuid::new_v4(), TokenKind::Access, long_ago)
            .unwrap();
        assert!(matches!(
            svc.verify(&token, TokenKind::Access),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let svc = make_service("access-secret", "refresh-secret");
        assert!(svc.verify("not.a.jwt", TokenKind::Access).is_err());
    }

    #[test]
    fn consecutive_tokens_differ() {
        let svc = make_service("access-secret", "refresh-secret");
        let user_id = Uuid::new_v4();
        assert_ne!(svc.issue_refresh(user_id).unwrap(), svc.issue_refresh(user_id).unwrap());
    }

    #[tokio::test]
    async fn rotate_persists_refresh_token() {
        let svc = make_service("access-secret", "refresh-secret");
        let (store, user_id) = seeded_store().await;

        let pair = svc
            .rotate(&store, user_id, RefreshGuard::Any)
            .await
            .expect("rotate");
        let stored = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
        assert_eq!(
            svc.verify(&pair.access_token, TokenKind::Access).unwrap().sub,
            user_id
        );
    }

    #[tokio::test]
    async fn rotate_with_stale_guard_hands_out_nothing() {
        let svc = make_service("access-secret", "refresh-secret");
        let (store, user_id) = seeded_store().await;
        let first = svc.rotate(&store, user_id, RefreshGuard::Any).await.unwrap();
        let second = svc
            .rotate(&store, user_id, RefreshGuard::Matches(&first.refresh_token))
            .await
            .unwrap();

        let replay = svc
            .rotate(&store, user_id, RefreshGuard::Matches(&first.refresh_token))
            .await;
        assert!(matches!(replay, Err(RotateError::Stale)));

        let stored = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(second.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn rotate_for_unknown_user_is_stale() {
        let svc = make_service("access-secret", "refresh-secret");
        let store = MemoryUserStore::new();
        let res = svc.rotate(&store, Uuid::new_v4(), RefreshGuard::Any).await;
        assert!(matches!(res, Err(RotateError::Stale)));
    }
}
