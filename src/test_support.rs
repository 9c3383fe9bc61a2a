//! Key, token, clock and endpoint fixtures shared by the unit tests.

use std::{
    sync::{
        atomic::{AtomicU16, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bytes::Bytes;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509Builder, X509NameBuilder},
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::{util::BoxCloneService, BoxError};

use crate::{clock::Clock, remote_jwk_set::Transport};

/// A freshly generated signing key together with its published forms.
pub struct TestKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub jwk: Value,
    pub certificate_pem: String,
    pub public_key_pem: String,
    encoding_key: EncodingKey,
}

impl TestKey {
    pub fn rsa(kid: &str) -> Self {
        let rsa = Rsa::generate(2048).unwrap();
        let jwk = json!({
            "kty": "RSA",
            "kid": kid,
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(rsa.n().to_vec()),
            "e": URL_SAFE_NO_PAD.encode(rsa.e().to_vec()),
        });
        let private_key = PKey::from_rsa(rsa).unwrap();
        let encoding_key =
            EncodingKey::from_rsa_pem(&private_key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        Self::new(kid, Algorithm::RS256, jwk, &private_key, encoding_key)
    }

    pub fn ec(kid: &str) -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let ec = EcKey::generate(&group).unwrap();
        let mut x = BigNum::new().unwrap();
        let mut y = BigNum::new().unwrap();
        let mut ctx = BigNumContext::new().unwrap();
        ec.public_key()
            .affine_coordinates(&group, &mut x, &mut y, &mut ctx)
            .unwrap();
        let jwk = json!({
            "kty": "EC",
            "kid": kid,
            "alg": "ES256",
            "use": "sig",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x.to_vec_padded(32).unwrap()),
            "y": URL_SAFE_NO_PAD.encode(y.to_vec_padded(32).unwrap()),
        });
        let private_key = PKey::from_ec_key(ec).unwrap();
        let encoding_key =
            EncodingKey::from_ec_pem(&private_key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        Self::new(kid, Algorithm::ES256, jwk, &private_key, encoding_key)
    }

    fn new(
        kid: &str,
        algorithm: Algorithm,
        jwk: Value,
        private_key: &PKey<Private>,
        encoding_key: EncodingKey,
    ) -> Self {
        Self {
            kid: kid.to_string(),
            algorithm,
            jwk,
            certificate_pem: self_signed_certificate(private_key),
            public_key_pem: String::from_utf8(private_key.public_key_to_pem().unwrap()).unwrap(),
            encoding_key,
        }
    }

    /// Signs `claims` with a header naming this key's `kid`.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).unwrap()
    }

    /// Signs `claims` with a header that carries no `kid`.
    pub fn sign_without_kid(&self, claims: &Value) -> String {
        jsonwebtoken::encode(&Header::new(self.algorithm), claims, &self.encoding_key).unwrap()
    }

    /// Signs `claims` with this key, but claims to be `kid` in the header.
    pub fn sign_as(&self, kid: &str, claims: &Value) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(kid.to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).unwrap()
    }
}

fn self_signed_certificate(private_key: &PKey<Private>) -> String {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "securetoken.test").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial_number = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial_number).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(private_key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(private_key, MessageDigest::sha256()).unwrap();

    String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
}

/// A JWK set document publishing `keys`.
pub fn jwk_set(keys: &[&TestKey]) -> Vec<u8> {
    let keys: Vec<&Value> = keys.iter().map(|key| &key.jwk).collect();
    serde_json::to_vec(&json!({ "keys": keys })).unwrap()
}

/// A Firebase-style `{kid: certificate}` document publishing `keys`.
pub fn certificate_map(keys: &[&TestKey]) -> Vec<u8> {
    let map: serde_json::Map<String, Value> = keys
        .iter()
        .map(|key| (key.kid.clone(), Value::String(key.certificate_pem.clone())))
        .collect();
    serde_json::to_vec(&map).unwrap()
}

/// Seconds since the Unix epoch as a `SystemTime`.
pub fn at(unix_seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(unix_seconds)
}

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<SystemTime>>);

impl ManualClock {
    pub fn at(unix_seconds: u64) -> Self {
        ManualClock(Arc::new(Mutex::new(at(unix_seconds))))
    }

    pub fn set(&self, unix_seconds: u64) {
        *self.0.lock() = at(unix_seconds);
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.0.lock()
    }
}

/// An in-memory key endpoint whose document and status can be swapped between fetches.
#[derive(Clone)]
pub struct StubEndpoint {
    body: Arc<Mutex<Vec<u8>>>,
    status: Arc<AtomicU16>,
    delay: Duration,
    pub fetches: Arc<AtomicUsize>,
}

impl StubEndpoint {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(Mutex::new(body)),
            status: Arc::new(AtomicU16::new(200)),
            delay: Duration::ZERO,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_body(&self, body: Vec<u8>) {
        *self.body.lock() = body;
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn transport(&self) -> Transport {
        let endpoint = self.clone();
        BoxCloneService::new(tower::service_fn(move |_request: http::Request<()>| {
            let endpoint = endpoint.clone();
            async move {
                endpoint.fetches.fetch_add(1, Ordering::SeqCst);
                if !endpoint.delay.is_zero() {
                    tokio::time::sleep(endpoint.delay).await;
                }
                let body = Bytes::from(endpoint.body.lock().clone());
                let response = http::Response::builder()
                    .status(endpoint.status.load(Ordering::SeqCst))
                    .body(body)?;
                Ok::<_, BoxError>(response)
            }
        }))
    }
}
