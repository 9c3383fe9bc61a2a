//! Verification of [JSON Web Tokens (JWT)](https://datatracker.ietf.org/doc/html/rfc7519) against key sets that are
//! either stored locally or published remotely by an identity provider.
//!
//! ## Overview
//!
//! A [`Decoder`] is built once per key source (typically once per process and identity provider) and then shared by
//! all requests. For every token it
//!
//! 1. resolves the verification keys named by the token's `kid` header,
//! 2. verifies the token's signature,
//! 3. checks the token's `exp` claim against an injectable [`Clock`], and
//! 4. compares a configurable set of [`ExpectedClaims`] (e.g. `iss` or `aud`) with the token's own.
//!
//! Rejections are reported as a [`DecodeError`] out of a small, closed set of [`ErrorCode`]s, each mapping to an HTTP
//! status. A rejected token's claims are still handed out (unverified) so callers can log who presented it.
//!
//! ## Features
//!
//! - **Key formats**: Both standard [JWK sets](https://datatracker.ietf.org/doc/html/rfc7517) and flat maps from key
//!   ID to PEM encoded X.509 certificate (as published e.g. by Firebase) are understood. The format is sniffed from the
//!   document's content.
//! - **Caching**: Remotely hosted key sets are cached with a configurable time-to-live. Refreshes replace the key set
//!   wholesale; concurrent lookups never observe a partially updated set, and a failed refresh keeps the previous set.
//! - **Key rotation**: A token signed with a key ID that is not part of the cached key set triggers a single refresh,
//!   bounded by a cooldown so unknown key IDs cannot be used to hammer the key set endpoint. Concurrent refreshes are
//!   collapsed into one fetch.
//! - **Injectable collaborators**: The HTTP [`Transport`] is a `tower` service and the [`Clock`] is a trait, both
//!   scoped to the decoder instance.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use jwt_keyset::{Decoder, ErrorCode, KeyLocation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let location: KeyLocation =
//!         "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com".parse()?;
//!     let decoder = Decoder::builder(location)
//!         .with_ttl(Duration::from_secs(300))
//!         .expect_claim("iss", "https://securetoken.google.com/my-project")
//!         .expect_claim("aud", "my-project")
//!         .build()
//!         .await;
//!
//!     // Refuse to start serving rather than rejecting every request.
//!     if let Some(error) = decoder.init_error() {
//!         return Err(error.clone().into());
//!     }
//!
//!     match decoder.decode("eyJhbGciOiJSUzI1NiIsImtpZCI6Ij...").await {
//!         Ok(claims) => println!("welcome {:?}", claims.get_str("email")),
//!         Err(error) if error.code() == ErrorCode::Expired => {
//!             println!("expired token of {:?}", error.claims().get_str("email"))
//!         }
//!         Err(error) => println!("rejected with {}: {error}", error.status_code()),
//!     }
//!     Ok(())
//! }
//! ```

pub use claims::{Claims, ExpectedClaims};
pub use clock::{Clock, SystemClock};
pub use decoder::{
    Decoder, DecoderBuilder, MissingExpiry, DEFAULT_REFRESH_COOLDOWN, DEFAULT_REMOTE_TTL,
};
pub use error::{DecodeError, DecodeErrorKind, ErrorCode, KeySetError};
pub use jwk_set::{KeyFamily, KeySet, VerificationKey};
pub use key_material::parse_key_set;
pub use key_source::KeyLocation;
pub use remote_jwk_set::{rate_limited, HttpTransport, Transport};

mod claims;
mod clock;
mod decoder;
mod error;
mod jwk_set;
mod key_cache;
mod key_material;
mod key_source;
mod remote_jwk_set;

#[cfg(test)]
mod test_support;
