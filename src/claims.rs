use std::{collections::BTreeMap, ops::Deref};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claims carried in a token's payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(pub Map<String, Value>);

impl Claims {
    /// Returns the claim `name` if it is a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

impl Deref for Claims {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(claims: Map<String, Value>) -> Self {
        Claims(claims)
    }
}

/// Claim values a token must carry, keyed by claim name. Claims not listed here are unconstrained.
pub type ExpectedClaims = BTreeMap<String, String>;

/// Returns the first expected claim, in claim name order, that `claims` does not satisfy.
pub(crate) fn first_mismatch<'a>(claims: &Claims, expected: &'a ExpectedClaims) -> Option<&'a str> {
    expected
        .iter()
        .find(|(name, value)| !claim_matches(claims.get(name.as_str()), value))
        .map(|(name, _)| name.as_str())
}

// `aud` is commonly an array, in which case any member may match.
fn claim_matches(claim: Option<&Value>, expected: &str) -> bool {
    match claim {
        Some(Value::String(value)) => value == expected,
        Some(Value::Array(values)) => values.iter().any(|value| value.as_str() == Some(expected)),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::{first_mismatch, Claims, ExpectedClaims};

    fn claims(value: serde_json::Value) -> Claims {
        serde_json::from_value(value).unwrap()
    }

    fn expect(pairs: &[(&str, &str)]) -> ExpectedClaims {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_matching_claims() {
        let claims = claims(json!({ "iss": "https://issuer", "aud": "api" }));
        let expected = expect(&[("iss", "https://issuer"), ("aud", "api")]);
        assert_eq!(first_mismatch(&claims, &expected), None);
    }

    #[test]
    fn test_non_string_claims_never_match() {
        let claims = claims(json!({ "admin": true, "tier": 3 }));
        assert_eq!(
            first_mismatch(&claims, &expect(&[("admin", "true")])),
            Some("admin")
        );
        assert_eq!(
            first_mismatch(&claims, &expect(&[("tier", "3")])),
            Some("tier")
        );
    }

    #[test]
    fn test_empty_expectations_match_anything() {
        assert_eq!(first_mismatch(&Claims::default(), &ExpectedClaims::new()), None);
    }

    #[test]
    fn test_array_audience_matches_any_member() {
        let claims = claims(json!({ "aud": ["first", "second"] }));
        assert_eq!(first_mismatch(&claims, &expect(&[("aud", "second")])), None);
        assert_eq!(
            first_mismatch(&claims, &expect(&[("aud", "third")])),
            Some("aud")
        );
    }

    #[test]
    fn test_missing_claim_is_a_mismatch() {
        let claims = claims(json!({ "iss": "https://issuer" }));
        assert_eq!(
            first_mismatch(&claims, &expect(&[("aud", "api")])),
            Some("aud")
        );
    }

    #[test]
    fn test_first_mismatch_in_name_order() {
        let claims = claims(json!({ "aud": "wrong", "iss": "wrong" }));
        let expected = expect(&[("iss", "a"), ("aud", "b")]);
        assert_eq!(first_mismatch(&claims, &expected), Some("aud"));
    }

    #[test]
    fn test_get_str() {
        let claims = claims(json!({ "email": "a@b.com", "exp": 42 }));
        assert_eq!(claims.get_str("email"), Some("a@b.com"));
        assert_eq!(claims.get_str("exp"), None);
        assert!(claims.contains_key("exp"));
    }
}
