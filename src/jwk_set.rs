use std::{collections::HashMap, fmt};

use jsonwebtoken::{Algorithm, DecodingKey};

/// Family of signature algorithms a key can verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Hmac,
    Okp,
}

impl KeyFamily {
    pub fn of(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Okp,
        }
    }
}

/// A public key usable to verify token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl VerificationKey {
    pub fn new(
        kid: impl Into<String>,
        family: KeyFamily,
        algorithm: Option<Algorithm>,
        key: DecodingKey,
    ) -> Self {
        Self {
            kid: kid.into(),
            family,
            algorithm,
            key,
        }
    }

    /// Key ID, empty if the key material did not name one.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Algorithm the key material pins the key to, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether this key may verify signatures made with `algorithm`.
    ///
    /// The family check keeps e.g. an RSA public key from being used as an HMAC secret.
    pub fn accepts(&self, algorithm: Algorithm) -> bool {
        self.family == KeyFamily::of(algorithm)
            && self.algorithm.is_none_or(|pinned| pinned == algorithm)
    }

    /// Verifies the base64url `signature` over `message` (the token's `header.payload` segments).
    pub fn verify(&self, signature: &str, message: &[u8], algorithm: Algorithm) -> bool {
        self.accepts(algorithm)
            && jsonwebtoken::crypto::verify(signature, message, &self.key, algorithm)
                .unwrap_or(false)
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Immutable set of verification keys, indexed by key ID.
///
/// Several keys may share a key ID (e.g. while an issuer rotates keys); lookups return all of them in the order they
/// appeared in the key material.
#[derive(Clone, Debug, Default)]
pub struct KeySet {
    keys: Vec<VerificationKey>,
    by_kid: HashMap<String, Vec<usize>>,
}

impl KeySet {
    /// Candidate keys for `kid`, in document order. An empty `kid` (a token header without one) yields every key.
    pub fn get_verification_keys(&self, kid: &str) -> Vec<&VerificationKey> {
        if kid.is_empty() {
            return self.keys.iter().collect();
        }
        self.by_kid
            .get(kid)
            .map(|indices| indices.iter().map(|&index| &self.keys[index]).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, kid: &str) -> bool {
        if kid.is_empty() {
            !self.keys.is_empty()
        } else {
            self.by_kid.contains_key(kid)
        }
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.by_kid.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<VerificationKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = VerificationKey>>(iter: I) -> Self {
        let keys: Vec<VerificationKey> = iter.into_iter().collect();
        let mut by_kid: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, key) in keys.iter().enumerate() {
            by_kid.entry(key.kid.clone()).or_default().push(index);
        }
        KeySet { keys, by_kid }
    }
}
