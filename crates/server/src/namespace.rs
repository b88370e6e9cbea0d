//! Namespace derivation from bearer credentials.
//!
//! A namespace is a tenant key: clients presenting the same credential land in
//! the same namespace and are invisible to every other one. The token is used
//! purely as a stable identifier carrier, never as a verified security claim;
//! authorization is the bridge's own token check at hello time.

use std::fmt::Write as _;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use md5::{Digest, Md5};
use serde::Deserialize;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Default, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    email: String,
    #[serde(default)]
    sub: String,
}

/// Derive a namespace from an `Authorization` header value, if any.
pub fn namespace_from_header(value: Option<&str>) -> String {
    namespace_from_token(value.unwrap_or(""))
}

/// Derive a namespace from a raw credential: `email` claim, else `sub` claim,
/// else a stable hash of the token. Deterministic and infallible.
pub fn namespace_from_token(raw: &str) -> String {
    let token = normalize_bearer(raw);
    if token.is_empty() {
        return DEFAULT_NAMESPACE.to_string();
    }
    if let Some(claims) = extract_claims_unverified(token) {
        if !claims.email.is_empty() {
            return claims.email;
        }
        if !claims.sub.is_empty() {
            return claims.sub;
        }
    }
    let digest = Md5::digest(token.as_bytes());
    let mut out = String::with_capacity(36);
    out.push_str("tkn-");
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn normalize_bearer(value: &str) -> &str {
    let value = value.trim();
    let lower = value.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("bearer ") {
        // Slice the original by the prefix length so casing is preserved.
        let offset = value.len() - rest.len();
        return value[offset..].trim();
    }
    value
}

/// Decode the claims segment of a JWT without verifying its signature.
/// This is data extraction, not authentication: any malformed token simply
/// yields `None` and the caller falls back to the token hash.
fn extract_claims_unverified(token: &str) -> Option<TokenClaims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    serde_json::from_slice(&decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn jwt_with_claims(claims: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn empty_credential_falls_back_to_default() {
        assert_eq!(namespace_from_token(""), "default");
        assert_eq!(namespace_from_token("   "), "default");
        assert_eq!(namespace_from_header(None), "default");
        assert_eq!(namespace_from_token("Bearer "), "default");
    }

    #[test]
    fn email_claim_wins_over_sub() {
        let token = jwt_with_claims(r#"{"email":"alice@x","sub":"u-1"}"#);
        assert_eq!(namespace_from_token(&token), "alice@x");
    }

    #[test]
    fn sub_claim_used_when_email_absent() {
        let token = jwt_with_claims(r#"{"sub":"u-1"}"#);
        assert_eq!(namespace_from_token(&token), "u-1");
    }

    #[test]
    fn bearer_prefix_is_stripped_case_insensitively() {
        let token = jwt_with_claims(r#"{"email":"alice@x"}"#);
        assert_eq!(namespace_from_token(&format!("Bearer {token}")), "alice@x");
        assert_eq!(namespace_from_token(&format!("bEaReR {token}")), "alice@x");
    }

    #[test]
    fn opaque_token_hashes_deterministically() {
        let ns = namespace_from_token("abc");
        assert_eq!(ns, "tkn-900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(namespace_from_token("abc"), ns);
    }

    #[test]
    fn malformed_jwt_falls_back_to_hash() {
        let ns = namespace_from_token("a.b.c");
        assert!(ns.starts_with("tkn-"), "unexpected namespace: {ns}");
        assert_eq!(namespace_from_token("a.b.c"), ns);
    }

    #[test]
    fn empty_claims_fall_back_to_hash() {
        let token = jwt_with_claims(r#"{"email":"","sub":""}"#);
        assert!(namespace_from_token(&token).starts_with("tkn-"));
    }
}
