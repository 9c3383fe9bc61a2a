use std::{fmt, path::PathBuf, sync::Arc};

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;

use crate::claims::Claims;

/// Coarse classification of a rejected token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No key in the key set matches the token's `kid`.
    UnknownKey,
    /// The token is malformed or no candidate key verifies its signature.
    InvalidSignature,
    /// The token's `exp` claim lies in the past.
    Expired,
    /// A claim does not hold the value the decoder expects.
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownKey => "unknown_key",
            ErrorCode::InvalidSignature => "invalid_signature",
            ErrorCode::Expired => "expired",
            ErrorCode::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeErrorKind {
    #[error("no verification key found for kid {kid:?}")]
    UnknownKey { kid: String },
    #[error("invalid token: {reason}")]
    InvalidSignature { reason: String },
    #[error("token expired at {exp}")]
    Expired { exp: f64 },
    #[error("{message}")]
    Unexpected { claim: String, message: String },
}

impl DecodeErrorKind {
    pub(crate) fn mismatch(claim: &str) -> Self {
        DecodeErrorKind::Unexpected {
            claim: claim.to_string(),
            message: format!("Mismatch: {claim}"),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeErrorKind::UnknownKey { .. } => ErrorCode::UnknownKey,
            DecodeErrorKind::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            DecodeErrorKind::Expired { .. } => ErrorCode::Expired,
            DecodeErrorKind::Unexpected { .. } => ErrorCode::Unexpected,
        }
    }
}

/// A rejected token.
///
/// Carries whatever claims could be decoded from the token's payload, even though the token must not be trusted.
/// Callers typically only log identifying claims (e.g. `email`) from it. The claims are empty if the token could not
/// be structurally parsed.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}")]
pub struct DecodeError {
    kind: DecodeErrorKind,
    claims: Claims,
}

impl DecodeError {
    pub(crate) fn new(kind: DecodeErrorKind, claims: Claims) -> Self {
        Self { kind, claims }
    }

    pub fn kind(&self) -> &DecodeErrorKind {
        &self.kind
    }

    pub fn code(&self) -> ErrorCode {
        self.kind.code()
    }

    /// HTTP status an HTTP-facing caller should answer with. Every rejection maps to `401 Unauthorized`.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    /// Name of the offending claim for [`ErrorCode::Unexpected`].
    pub fn claim(&self) -> Option<&str> {
        match &self.kind {
            DecodeErrorKind::Unexpected { claim, .. } => Some(claim),
            _ => None,
        }
    }

    /// Unverified, best-effort claims of the rejected token.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

impl IntoResponse for DecodeError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code().as_str(),
        }));
        (self.status_code(), body).into_response()
    }
}

/// Failure to load or refresh a key set.
///
/// Never returned from [`Decoder::decode`](crate::Decoder::decode); a failed initial load is reported through
/// [`Decoder::check_ready`](crate::Decoder::check_ready) and [`Decoder::init_error`](crate::Decoder::init_error).
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone)]
pub enum KeySetError {
    #[error("invalid key source {location:?}")]
    InvalidSource {
        location: String,
        #[source]
        reason: url::ParseError,
    },
    #[error("failed to read key material from {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: Arc<std::io::Error>,
    },
    #[error("failed to fetch key material")]
    Transport(#[source] Arc<dyn std::error::Error + Send + Sync>),
    #[error("received error response when fetching key material: {status_code}")]
    Status { status_code: StatusCode },
    #[error("failed to parse key material")]
    Parse(#[source] Arc<serde_json::Error>),
    #[error("key material is neither a JWK set nor a certificate map")]
    UnrecognizedFormat,
    #[error("key material contains no usable verification keys")]
    Empty,
}

impl KeySetError {
    pub(crate) fn transport(error: impl Into<tower::BoxError>) -> Self {
        KeySetError::Transport(Arc::from(error.into()))
    }
}

#[cfg(test)]
mod test {
    use axum::response::IntoResponse;
    use http::StatusCode;
    use serde_json::json;

    use super::{DecodeError, DecodeErrorKind, ErrorCode};
    use crate::claims::Claims;

    #[test]
    fn test_mismatch_names_claim() {
        let error = DecodeError::new(DecodeErrorKind::mismatch("aud"), Claims::default());
        assert_eq!(error.code(), ErrorCode::Unexpected);
        assert_eq!(error.claim(), Some("aud"));
        assert_eq!(error.to_string(), "Mismatch: aud");
    }

    #[test]
    fn test_every_rejection_is_unauthorized() {
        let kinds = [
            DecodeErrorKind::UnknownKey { kid: "k".to_string() },
            DecodeErrorKind::InvalidSignature {
                reason: "bad".to_string(),
            },
            DecodeErrorKind::Expired { exp: 1.0 },
            DecodeErrorKind::mismatch("iss"),
        ];
        for kind in kinds {
            let error = DecodeError::new(kind, Claims::default());
            assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(error.into_response().status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_error_keeps_claims() {
        let claims: Claims = serde_json::from_value(json!({ "email": "a@b.com" })).unwrap();
        let error = DecodeError::new(DecodeErrorKind::Expired { exp: 10.0 }, claims);
        assert_eq!(error.kind(), &DecodeErrorKind::Expired { exp: 10.0 });
        assert_eq!(error.claims().get_str("email"), Some("a@b.com"));
        assert_eq!(error.to_string(), "token expired at 10");

        let claims = error.into_claims();
        assert_eq!(claims.get_str("email"), Some("a@b.com"));
    }
}
