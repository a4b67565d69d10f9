//! Client-side inspection of signed bearer tokens.
//!
//! Only the payload segment is decoded; the signature is the backend's
//! business. Any token that cannot be read is invalid.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

/// Why a token payload could not be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token does not have three segments")]
    Malformed,
    #[error("token payload is not valid base64url")]
    Encoding,
    #[error("token payload is not a JSON object")]
    Payload,
    #[error("token payload has no numeric exp claim")]
    MissingExpiry,
}

/// Claims the client cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Subject, when present.
    pub sub: Option<String>,
    /// Full decoded payload.
    pub raw: Value,
}

/// Decode the payload segment of `token`.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };
    if payload.is_empty() {
        return Err(TokenError::Malformed);
    }

    // Some issuers keep the '=' padding, most strip it.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|_| TokenError::Encoding)?;

    let raw: Value = serde_json::from_slice(&bytes).map_err(|_| TokenError::Payload)?;
    if !raw.is_object() {
        return Err(TokenError::Payload);
    }

    let exp = match raw.get("exp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or(TokenError::MissingExpiry)?,
        _ => return Err(TokenError::MissingExpiry),
    };
    let sub = raw.get("sub").and_then(Value::as_str).map(str::to_string);

    Ok(TokenClaims { exp, sub, raw })
}

/// Whether `token` is unexpired at `now` (seconds since epoch).
pub fn is_valid_at(token: &str, now: i64) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.exp > now,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting unreadable token");
            false
        }
    }
}

/// Whether `token` is unexpired right now.
pub fn is_valid(token: &str) -> bool {
    is_valid_at(token, now_secs())
}

/// Current Unix epoch in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Build an unsigned token carrying `payload`. Test fixture only.
#[cfg(test)]
pub(crate) fn forge(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

/// Unsigned token expiring `offset_secs` from now. Test fixture only.
#[cfg(test)]
pub(crate) fn forge_expiring_in(offset_secs: i64) -> String {
    forge(&serde_json::json!({
        "sub": "65f0c",
        "role": "super_admin",
        "exp": now_secs() + offset_secs,
    }))
}
