//! Connection token verification.
//!
//! Browsers cannot attach an `Authorization` header to a WebSocket upgrade,
//! so the token travels in the `Sec-WebSocket-Protocol` header as
//! `access_token, <jwt>`. The token carries either a `request_id` claim
//! (customer) or an `admin_id` claim (moderator); carrying both is a
//! protocol error, and the claim value must match the `sid` query parameter
//! the connection declared.

use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::ApiError;

/// Subprotocol name announcing the token; echoed back in the upgrade
/// response so the handshake completes.
pub const TOKEN_PROTOCOL: &str = "access_token";

const ERR_TOKEN_STRUCTURE: &str = "received token has wrong structure";

#[derive(Debug, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub admin_id: Option<u64>,
}

/// The authenticated identity behind one connection.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub user_id: u64,
    pub is_customer: bool,
    pub is_moderator: bool,
}

/// Extract the token from `Sec-WebSocket-Protocol: access_token, <jwt>`.
pub fn token_from_protocol_header(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    let mut values = raw.split(',');
    let start = values.next()?.trim();
    let token = values.next()?.trim();
    if start != TOKEN_PROTOCOL || values.next().is_some() || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Tokens are minted by the parent application and may carry no exp.
    validation.required_spec_claims = Default::default();

    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| {
        tracing::debug!(%err, "token verification failed");
        ApiError::unauthorized("invalid token")
    })
}

/// Derive the connection principal from verified claims, cross-checking the
/// claimed identity against the identity the connection declared.
pub fn principal_from_claims(claims: &Claims, declared_sid: u64) -> Result<Principal, ApiError> {
    let (user_id, is_customer, is_moderator) = match (claims.request_id, claims.admin_id) {
        (Some(_), Some(_)) => {
            tracing::error!("token contains both a request_id and an admin_id");
            return Err(ApiError::bad_request(ERR_TOKEN_STRUCTURE));
        }
        (Some(request_id), None) => (request_id, true, false),
        (None, Some(admin_id)) => (admin_id, false, true),
        (None, None) => return Err(ApiError::bad_request(ERR_TOKEN_STRUCTURE)),
    };

    if user_id != declared_sid {
        tracing::error!(
            claimed = user_id,
            declared = declared_sid,
            "token identity does not match the sid parameter"
        );
        return Err(ApiError::unauthorized("token identity mismatch"));
    }

    Ok(Principal {
        user_id,
        is_customer,
        is_moderator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::EncodingKey;

    fn mint(secret: &str, claims: serde_json::Value) -> String {
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn protocol_header_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("access_token, abc.def.ghi"),
        );
        assert_eq!(
            token_from_protocol_header(&headers).as_deref(),
            Some("abc.def.ghi")
        );
    }

    #[test]
    fn protocol_header_rejects_wrong_shape() {
        for value in ["abc.def.ghi", "bearer, abc", "access_token, a, b", ""] {
            let mut headers = HeaderMap::new();
            headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(value));
            assert!(token_from_protocol_header(&headers).is_none(), "{value:?}");
        }
    }

    #[test]
    fn customer_token_yields_customer_principal() {
        let token = mint("s3cret", serde_json::json!({ "request_id": 42 }));
        let claims = verify_token("s3cret", &token).unwrap();
        let principal = principal_from_claims(&claims, 42).unwrap();
        assert_eq!(principal.user_id, 42);
        assert!(principal.is_customer);
        assert!(!principal.is_moderator);
    }

    #[test]
    fn admin_token_yields_moderator_principal() {
        let token = mint("s3cret", serde_json::json!({ "admin_id": 9 }));
        let claims = verify_token("s3cret", &token).unwrap();
        let principal = principal_from_claims(&claims, 9).unwrap();
        assert!(principal.is_moderator);
        assert!(!principal.is_customer);
    }

    #[test]
    fn both_claims_is_a_protocol_error() {
        let claims = Claims {
            request_id: Some(1),
            admin_id: Some(1),
        };
        assert!(principal_from_claims(&claims, 1).is_err());
    }

    #[test]
    fn claim_must_match_declared_sid() {
        let claims = Claims {
            request_id: Some(42),
            admin_id: None,
        };
        assert!(principal_from_claims(&claims, 43).is_err());
    }

    #[test]
    fn bad_signature_is_rejected() {
        let token = mint("other-secret", serde_json::json!({ "request_id": 42 }));
        assert!(verify_token("s3cret", &token).is_err());
    }
}
