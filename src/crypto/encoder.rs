use super::CryptoError;
use crate::error::{Error, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;

/// Marshals values to compact HS256 JWS and back.
///
/// The same secret signs and verifies. Values must serialize to a JSON object.
/// Registered claims are not interpreted here; expiry is the caller's concern.
#[derive(Clone)]
pub struct Hs256Encoder {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Hs256Encoder {
    /// # Errors
    /// Returns [`Error::Key`] if `key` is empty.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Key("signing key must not be empty".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_aud = false;

        Ok(Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
        })
    }

    /// # Errors
    /// Returns [`CryptoError::Encode`] if `value` cannot be serialized.
    pub fn marshal<T: Serialize>(&self, value: &T) -> Result<String, CryptoError> {
        encode(&Header::new(Algorithm::HS256), value, &self.encoding)
            .map_err(|e| CryptoError::Encode(e.to_string()))
    }

    /// Verify `token` and deserialize its payload.
    ///
    /// # Errors
    /// Returns [`CryptoError::AuthenticationFailure`] for malformed, forged or foreign tokens.
    pub fn unmarshal<T: DeserializeOwned>(&self, token: &str) -> Result<T, CryptoError> {
        decode::<T>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }
}
