use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::auth::tokens::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn token_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .path("/")
        .build()
}

/// Adds both token cookies (HttpOnly, Secure unless disabled by config).
pub fn with_tokens(jar: CookieJar, pair: &TokenPair, secure: bool) -> CookieJar {
    jar.add(token_cookie(ACCESS_COOKIE, pair.access_token.clone(), secure))
        .add(token_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), secure))
}

/// Expires both token cookies.
pub fn without_tokens(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}
