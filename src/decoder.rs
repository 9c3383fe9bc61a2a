use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode_header, Header};
use tracing::{debug, warn};

use crate::{
    claims::{first_mismatch, Claims, ExpectedClaims},
    clock::{unix_seconds, Clock, SystemClock},
    error::{DecodeError, DecodeErrorKind},
    jwk_set::KeySet,
    key_cache::KeyCache,
    key_source::{KeyLocation, KeySource},
    remote_jwk_set::{rate_limited, HttpTransport, RemoteJwkSet, Transport},
    KeySetError,
};

/// Default time-to-live of key sets fetched from a remote endpoint.
pub const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(3600);

/// Default minimum age of the cached key set before an unknown `kid` triggers a refresh.
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// What to do with tokens that carry no `exp` claim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingExpiry {
    /// Treat the token as never expiring.
    #[default]
    Accept,
    /// Reject the token as [`ErrorCode::Unexpected`](crate::ErrorCode::Unexpected), naming `exp`.
    Reject,
}

struct RateLimitConfig {
    num: u64,
    per: Duration,
}

/// Builder for configuring a [`Decoder`].
pub struct DecoderBuilder {
    location: KeyLocation,
    ttl: Option<Duration>,
    refresh_cooldown: Duration,
    expected_claims: ExpectedClaims,
    missing_expiry: MissingExpiry,
    leeway: Duration,
    clock: Arc<dyn Clock>,
    transport: Option<Transport>,
    rate_limit_config: Option<RateLimitConfig>,
}

impl DecoderBuilder {
    /// Creates a new builder loading keys from `location`.
    pub fn new(location: impl Into<KeyLocation>) -> Self {
        Self {
            location: location.into(),
            ttl: None,
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            expected_claims: ExpectedClaims::new(),
            missing_expiry: MissingExpiry::default(),
            leeway: Duration::ZERO,
            clock: Arc::new(SystemClock),
            transport: None,
            rate_limit_config: None,
        }
    }

    /// Sets how long a key set stays fresh. Defaults to [`DEFAULT_REMOTE_TTL`] for remote sources; local files never
    /// go stale unless a TTL is set.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the minimum age of the key set before a token with an unknown `kid` triggers a refresh.
    pub fn with_refresh_cooldown(mut self, refresh_cooldown: Duration) -> Self {
        self.refresh_cooldown = refresh_cooldown;
        self
    }

    /// Replaces the claims every token must carry.
    pub fn with_expected_claims(mut self, expected_claims: ExpectedClaims) -> Self {
        self.expected_claims = expected_claims;
        self
    }

    /// Requires claim `name` to equal `value`.
    pub fn expect_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_claims.insert(name.into(), value.into());
        self
    }

    pub fn with_missing_expiry(mut self, missing_expiry: MissingExpiry) -> Self {
        self.missing_expiry = missing_expiry;
        self
    }

    /// Tolerated clock skew when checking `exp`.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the default [`HttpTransport`] used for remote sources.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Limits outgoing fetches of remote key material to `num` per `per`.
    pub fn with_rate_limit(mut self, num: u64, per: Duration) -> Self {
        self.rate_limit_config = Some(RateLimitConfig { num, per });
        self
    }

    /// Builds the [`Decoder`] and loads the initial key set.
    ///
    /// Never fails: a failed initial load is reported through [`Decoder::check_ready`] and [`Decoder::init_error`].
    /// Must be awaited within a Tokio runtime when a rate limit is configured.
    pub async fn build(self) -> Decoder {
        let (source, ttl) = match self.location {
            KeyLocation::File(path) => (KeySource::File(path), self.ttl),
            KeyLocation::Remote(url) => {
                let transport = self
                    .transport
                    .unwrap_or_else(|| HttpTransport::default().into_transport());
                let transport = match self.rate_limit_config {
                    Some(RateLimitConfig { num, per }) => rate_limited(transport, num, per),
                    None => transport,
                };
                let ttl = self.ttl.unwrap_or(DEFAULT_REMOTE_TTL);
                (KeySource::Remote(RemoteJwkSet::new(url, transport)), Some(ttl))
            }
        };

        let source_name = source.to_string();
        let cache = KeyCache::new(source, Arc::clone(&self.clock), ttl, self.refresh_cooldown);
        let init_error = cache.refresh().await.err();
        if let Some(error) = &init_error {
            warn!(source = %source_name, %error, "failed to load initial key set");
        }

        Decoder {
            cache,
            expected_claims: Arc::new(ArcSwap::from_pointee(self.expected_claims)),
            clock: self.clock,
            missing_expiry: self.missing_expiry,
            leeway: self.leeway,
            init_error,
        }
    }
}

/// Verifies tokens against the key set of a single key source.
///
/// Cloning is cheap; clones share the key set cache and the expected claims.
#[derive(Clone)]
pub struct Decoder {
    cache: KeyCache,
    expected_claims: Arc<ArcSwap<ExpectedClaims>>,
    clock: Arc<dyn Clock>,
    missing_expiry: MissingExpiry,
    leeway: Duration,
    init_error: Option<KeySetError>,
}

impl Decoder {
    /// Creates a builder for a decoder loading keys from `location`, e.g. `"https://…/jwks.json".parse()?`.
    pub fn builder(location: impl Into<KeyLocation>) -> DecoderBuilder {
        DecoderBuilder::new(location)
    }

    /// Whether the initial key set was loaded and contains at least one usable key.
    pub fn check_ready(&self) -> bool {
        self.init_error.is_none()
    }

    /// Why the initial key set could not be loaded.
    pub fn init_error(&self) -> Option<&KeySetError> {
        self.init_error.as_ref()
    }

    /// The currently cached key set.
    pub fn key_set(&self) -> Arc<KeySet> {
        self.cache.key_set()
    }

    /// Refreshes the key set now. On failure the previous key set stays in use.
    pub async fn refresh(&self) -> Result<(), KeySetError> {
        self.cache.refresh().await.map(|_| ())
    }

    pub fn expected_claims(&self) -> Arc<ExpectedClaims> {
        self.expected_claims.load_full()
    }

    /// Replaces the expected claims for subsequent decodes, in this decoder and all its clones.
    pub fn set_expected_claims(&self, expected_claims: ExpectedClaims) {
        self.expected_claims.store(Arc::new(expected_claims));
    }

    /// Verifies `token` and returns its claims.
    ///
    /// Checks run in order: structure, key lookup, signature, expiry, expected claims. The first failing check
    /// decides the error. Every error except a structurally malformed token carries the token's (unverified) claims.
    pub async fn decode(&self, token: &str) -> Result<Claims, DecodeError> {
        let token = match UnverifiedToken::parse(token) {
            Ok(token) => token,
            Err(error) => {
                debug!(%error, "rejecting malformed token");
                return Err(DecodeError::new(
                    DecodeErrorKind::InvalidSignature {
                        reason: error.to_string(),
                    },
                    Claims::default(),
                ));
            }
        };

        match self.verify(&token).await {
            Ok(()) => Ok(token.claims),
            Err(kind) => {
                debug!(kid = token.kid(), error = %kind, "rejecting token");
                Err(DecodeError::new(kind, token.claims))
            }
        }
    }

    async fn verify(&self, token: &UnverifiedToken<'_>) -> Result<(), DecodeErrorKind> {
        let kid = token.kid();
        let key_set = self.cache.key_set_for(kid).await;
        let candidates = key_set.get_verification_keys(kid);
        if candidates.is_empty() {
            return Err(DecodeErrorKind::UnknownKey {
                kid: kid.to_string(),
            });
        }

        let algorithm = token.header.alg;
        let verified = candidates
            .iter()
            .any(|key| key.verify(token.signature, token.message.as_bytes(), algorithm));
        if !verified {
            return Err(DecodeErrorKind::InvalidSignature {
                reason: format!("no key for kid {kid:?} verifies the {algorithm:?} signature"),
            });
        }

        self.check_expiry(&token.claims)?;

        let expected_claims = self.expected_claims.load();
        if let Some(claim) = first_mismatch(&token.claims, &expected_claims) {
            return Err(DecodeErrorKind::mismatch(claim));
        }
        Ok(())
    }

    fn check_expiry(&self, claims: &Claims) -> Result<(), DecodeErrorKind> {
        let exp = match claims.get("exp") {
            None => {
                return match self.missing_expiry {
                    MissingExpiry::Accept => Ok(()),
                    MissingExpiry::Reject => Err(DecodeErrorKind::Unexpected {
                        claim: "exp".to_string(),
                        message: "Missing: exp".to_string(),
                    }),
                }
            }
            Some(exp) => exp.as_f64().ok_or_else(|| DecodeErrorKind::Unexpected {
                claim: "exp".to_string(),
                message: "exp is not a number".to_string(),
            })?,
        };

        let now = unix_seconds(self.clock.now());
        if now >= exp + self.leeway.as_secs_f64() {
            return Err(DecodeErrorKind::Expired { exp });
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
enum MalformedToken {
    #[error("token does not consist of three segments")]
    Segments,
    #[error("invalid token header")]
    Header(#[from] jsonwebtoken::errors::Error),
    #[error("invalid payload encoding")]
    Encoding(#[from] base64::DecodeError),
    #[error("payload is not a JSON object")]
    Payload(#[from] serde_json::Error),
}

/// A structurally valid token whose signature has not been checked yet.
struct UnverifiedToken<'a> {
    header: Header,
    claims: Claims,
    /// `header.payload`, the signed part of the token.
    message: &'a str,
    signature: &'a str,
}

impl<'a> UnverifiedToken<'a> {
    fn parse(token: &'a str) -> Result<Self, MalformedToken> {
        let (message, signature) = token.rsplit_once('.').ok_or(MalformedToken::Segments)?;
        let (_, payload) = message.split_once('.').ok_or(MalformedToken::Segments)?;
        if payload.contains('.') {
            return Err(MalformedToken::Segments);
        }

        let header = decode_header(token)?;
        let claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;

        Ok(Self {
            header,
            claims,
            message,
            signature,
        })
    }

    fn kid(&self) -> &str {
        self.header.kid.as_deref().unwrap_or_default()
    }
}
