//! Parsing of raw key material into a [`KeySet`].
//!
//! Two document shapes are understood, told apart by their content:
//!
//! - a JWK set (`{"keys": [...]}`), as published by most OpenID Connect providers and OAuth2 authorization servers;
//! - a flat map from key ID to a PEM encoded certificate or public key, as published e.g. by Firebase
//!   (`https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com`).
//!
//! Entries that cannot be turned into a verification key are skipped, so a single exotic key does not take down the
//! whole set.

use std::sync::Arc;

use jsonwebtoken::{
    jwk::{AlgorithmParameters, Jwk, KeyAlgorithm, PublicKeyUse},
    Algorithm, DecodingKey,
};
use serde_json::{Map, Value};
use tracing::warn;
use x509_parser::{
    certificate::X509Certificate, prelude::FromDer, public_key::PublicKey,
    x509::SubjectPublicKeyInfo,
};

use crate::{
    jwk_set::{KeyFamily, KeySet, VerificationKey},
    KeySetError,
};

#[derive(thiserror::Error, Debug)]
enum UnusableKey {
    #[error("malformed JWK")]
    Malformed(#[from] serde_json::Error),
    #[error("key is meant for encryption")]
    NotForSigning,
    #[error("unsupported key type {0}")]
    Unsupported(String),
    #[error("failed to decode JWK into key")]
    InvalidJwk(#[from] jsonwebtoken::errors::Error),
    #[error("invalid PEM")]
    Pem(#[from] pem::PemError),
    #[error("invalid certificate: {0}")]
    Certificate(String),
}

/// Parses a JWK set or a certificate map into a [`KeySet`].
pub fn parse_key_set(bytes: &[u8]) -> Result<KeySet, KeySetError> {
    let document: Value =
        serde_json::from_slice(bytes).map_err(|error| KeySetError::Parse(Arc::new(error)))?;
    let Value::Object(document) = document else {
        return Err(KeySetError::UnrecognizedFormat);
    };

    match document.get("keys") {
        Some(Value::Array(entries)) => Ok(parse_jwk_set(entries)),
        _ if document.values().all(Value::is_string) => Ok(parse_certificate_map(&document)),
        _ => Err(KeySetError::UnrecognizedFormat),
    }
}

fn parse_jwk_set(entries: &[Value]) -> KeySet {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match jwk_to_key(entry) {
            Ok(key) => Some(key),
            Err(error) => {
                warn!(index, kid = ?entry.get("kid"), %error, "skipping unusable JWK");
                None
            }
        })
        .collect()
}

fn jwk_to_key(entry: &Value) -> Result<VerificationKey, UnusableKey> {
    let jwk: Jwk = serde_json::from_value(entry.clone())?;
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return Err(UnusableKey::NotForSigning);
    }

    let family = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => KeyFamily::Rsa,
        AlgorithmParameters::EllipticCurve(_) => KeyFamily::Ec,
        AlgorithmParameters::OctetKey(_) => KeyFamily::Hmac,
        AlgorithmParameters::OctetKeyPair(_) => KeyFamily::Okp,
    };
    let key = DecodingKey::from_jwk(&jwk)?;
    let algorithm = jwk.common.key_algorithm.and_then(signing_algorithm);
    let kid = jwk.common.key_id.unwrap_or_default();

    Ok(VerificationKey::new(kid, family, algorithm, key))
}

fn signing_algorithm(key_algorithm: KeyAlgorithm) -> Option<Algorithm> {
    match key_algorithm {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

fn parse_certificate_map(document: &Map<String, Value>) -> KeySet {
    document
        .iter()
        .filter_map(|(kid, pem_text)| {
            let pem_text = pem_text.as_str()?;
            match pem_to_key(kid, pem_text) {
                Ok(key) => Some(key),
                Err(error) => {
                    warn!(kid, %error, "skipping unusable certificate");
                    None
                }
            }
        })
        .collect()
}

fn pem_to_key(kid: &str, pem_text: &str) -> Result<VerificationKey, UnusableKey> {
    let block = pem::parse(pem_text)?;
    match block.tag() {
        "CERTIFICATE" => {
            let (_, certificate) = X509Certificate::from_der(block.contents())
                .map_err(|error| UnusableKey::Certificate(error.to_string()))?;
            spki_to_key(kid, certificate.public_key())
        }
        "PUBLIC KEY" => {
            let (_, spki) = SubjectPublicKeyInfo::from_der(block.contents())
                .map_err(|error| UnusableKey::Certificate(error.to_string()))?;
            spki_to_key(kid, &spki)
        }
        "RSA PUBLIC KEY" => Ok(VerificationKey::new(
            kid,
            KeyFamily::Rsa,
            None,
            DecodingKey::from_rsa_der(block.contents()),
        )),
        tag => Err(UnusableKey::Unsupported(tag.to_string())),
    }
}

fn spki_to_key(kid: &str, spki: &SubjectPublicKeyInfo) -> Result<VerificationKey, UnusableKey> {
    let public_key = spki
        .parsed()
        .map_err(|error| UnusableKey::Certificate(error.to_string()))?;
    match public_key {
        PublicKey::RSA(rsa) => Ok(VerificationKey::new(
            kid,
            KeyFamily::Rsa,
            None,
            DecodingKey::from_rsa_raw_components(
                strip_leading_zeros(rsa.modulus),
                strip_leading_zeros(rsa.exponent),
            ),
        )),
        // An uncompressed SEC1 point, the same encoding `DecodingKey::from_ec_components` produces.
        PublicKey::EC(point) => Ok(VerificationKey::new(
            kid,
            KeyFamily::Ec,
            None,
            DecodingKey::from_ec_der(point.data()),
        )),
        _ => Err(UnusableKey::Unsupported(spki.algorithm.algorithm.to_string())),
    }
}

// DER integers carry a leading zero byte when the high bit is set.
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&byte| byte != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
