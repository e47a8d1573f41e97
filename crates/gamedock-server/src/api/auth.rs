// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request admission: user sessions and the bot shared secret.
//!
//! Two strategies behind one front door. Endpoints that accept either
//! principal check the bot key first; everything downstream receives an
//! opaque [`Principal`].

use axum::http::HeaderMap;
use gamedock_store::sessions::{self, AuthSessionRecord};

use super::AppState;
use crate::error::{Error, Result};

/// Header carrying the bot shared secret.
pub const BOT_KEY_HEADER: &str = "x-bot-api-key";

/// Session cookie name.
const SESSION_COOKIE: &str = "session";

/// An authenticated caller.
#[derive(Debug, Clone)]
pub enum Principal {
    /// A panel user with a live auth session.
    User(AuthSessionRecord),
    /// The chat bot, authenticated by shared secret.
    Bot,
}

/// Extract the session token from the cookie or a bearer header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get("cookie").and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix(SESSION_COOKIE)
                && let Some(value) = value.strip_prefix('=')
            {
                return Some(value.to_string());
            }
        }
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

fn is_bot(state: &AppState, headers: &HeaderMap) -> bool {
    headers
        .get(BOT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| !key.is_empty() && key == state.config.bot_api_key)
}

/// Admit only a user with an unexpired session.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<Principal> {
    let token = session_token(headers).ok_or(Error::Unauthorized)?;
    let session = sessions::get_valid(&state.pool, &token)
        .await?
        .ok_or(Error::Unauthorized)?;
    Ok(Principal::User(session))
}

/// Admit a user session or the bot secret, bot checked first.
pub async fn require_user_or_bot(state: &AppState, headers: &HeaderMap) -> Result<Principal> {
    if is_bot(state, headers) {
        return Ok(Principal::Bot);
    }
    require_user(state, headers).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_session_token_from_cookie() {
        let map = headers(&[("cookie", "theme=dark; session=tok123; other=1")]);
        assert_eq!(session_token(&map).as_deref(), Some("tok123"));
    }

    #[test]
    fn test_session_token_from_bearer() {
        let map = headers(&[("authorization", "Bearer tok456")]);
        assert_eq!(session_token(&map).as_deref(), Some("tok456"));
    }

    #[test]
    fn test_session_token_cookie_wins_over_bearer() {
        let map = headers(&[
            ("cookie", "session=cookie-tok"),
            ("authorization", "Bearer bearer-tok"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("cookie-tok"));
    }

    #[test]
    fn test_session_token_ignores_prefix_collisions() {
        // A cookie named "session_extra" must not match.
        let map = headers(&[("cookie", "session_extra=nope")]);
        assert_eq!(session_token(&map), None);
    }

    #[test]
    fn test_session_token_absent() {
        let map = headers(&[("cookie", "theme=dark")]);
        assert_eq!(session_token(&map), None);
        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
