//! Local identity resolution from the stored credential.
//!
//! The server authenticates sessions with a JWT bearer token; the `sub`
//! claim is the stable user identifier and doubles as the player name the
//! rest of this crate publishes moves under. Only the payload segment is
//! read — this module never verifies signatures and never writes the
//! credential.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

/// Read-only access to the locally stored credential.
///
/// Implemented by whatever owns credential storage (keychain, file, memory);
/// that concern is outside this crate.
pub trait CredentialSource: Send + Sync {
    /// The raw bearer token, if one is stored.
    fn token(&self) -> Option<String>;
}

impl CredentialSource for Option<String> {
    fn token(&self) -> Option<String> {
        self.clone()
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

/// Extract the user id (`sub` claim) from a JWT bearer token.
///
/// Returns the empty string when the token is malformed, not base64url, not
/// JSON, or carries no `sub` — callers treat an empty id as "not logged in"
/// rather than an error.
pub fn user_id_from_token(token: &str) -> String {
    let Some(payload) = token.split('.').nth(1) else {
        debug!("credential is not a JWT (no payload segment)");
        return String::new();
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload) else {
        debug!("credential payload is not valid base64url");
        return String::new();
    };
    match serde_json::from_slice::<Claims>(&bytes) {
        Ok(claims) => claims.sub.unwrap_or_default(),
        Err(e) => {
            debug!("credential payload is not valid JSON: {e}");
            String::new()
        }
    }
}

/// Resolve the current user id from a credential source.
///
/// Empty string when no credential is stored or it cannot be decoded.
pub fn current_user_id(source: &dyn CredentialSource) -> String {
    source
        .token()
        .map(|token| user_id_from_token(&token))
        .unwrap_or_default()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    /// Build an unsigned JWT with the given payload JSON.
    fn jwt(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn extracts_sub_claim() {
        let token = jwt(r#"{"sub":"alice","iat":1715000000}"#);
        assert_eq!(user_id_from_token(&token), "alice");
    }

    #[test]
    fn missing_sub_yields_empty() {
        let token = jwt(r#"{"iat":1715000000}"#);
        assert_eq!(user_id_from_token(&token), "");
    }

    #[test]
    fn garbage_tokens_yield_empty() {
        assert_eq!(user_id_from_token(""), "");
        assert_eq!(user_id_from_token("not-a-jwt"), "");
        assert_eq!(user_id_from_token("a.!!!not-base64!!!.c"), "");
        let bad_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode(b"not json"));
        assert_eq!(user_id_from_token(&bad_json), "");
    }

    #[test]
    fn source_without_credential_yields_empty() {
        let source: Option<String> = None;
        assert_eq!(current_user_id(&source), "");

        let source = Some(jwt(r#"{"sub":"bob"}"#));
        assert_eq!(current_user_id(&source), "bob");
    }
}
