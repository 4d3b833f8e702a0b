//! Verification keys for tokens issued outside the authenticate service.

use crate::error::{Error, Result};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::der::{asn1::ObjectIdentifier, Decode, Document};
use rsa::pkcs8::spki::SubjectPublicKeyInfoRef;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Build the key set from an optional base64 encoded public key.
    ///
    /// An absent or blank input yields an empty set: token verification is
    /// simply not available until a key is configured.
    ///
    /// # Errors
    /// Returns [`Error::CertificateDecode`] if the input is not base64 and
    /// [`Error::KeyConversion`] if the decoded bytes are not a supported
    /// RSA or P-256 key.
    pub fn populate(encoded: Option<&str>) -> Result<Self> {
        let mut jwks = Self::default();

        let Some(encoded) = encoded.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(jwks);
        };

        let decoded =
            Base64::decode_vec(encoded).map_err(|e| Error::CertificateDecode(e.to_string()))?;

        let jwk = Jwk::from_pem_or_der(&decoded)?;
        debug!("loaded signing key {}", jwk.kid);
        jwks.keys.push(jwk);

        Ok(jwks)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    pub kid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Build a public JWK from a key in PEM or DER form.
    ///
    /// RSA public and private keys are accepted (only the public half of a
    /// private key is kept), as are P-256 public keys.
    ///
    /// # Errors
    /// Returns [`Error::KeyConversion`] if no supported key encoding matches.
    pub fn from_pem_or_der(pem_or_der: &[u8]) -> Result<Self> {
        if let Ok(public_key) = decode_rsa_public_key(pem_or_der) {
            return Ok(Self::from_rsa_public_key(&public_key));
        }

        let (x, y) = decode_p256_public_key(pem_or_der)?;
        Ok(Self::from_p256_point(&x, &y))
    }

    /// The `kid` is the RFC 7638 thumbprint of the key.
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey) -> Self {
        let n = Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be());
        let e = Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be());
        // members in lexicographic order, no whitespace
        let kid = thumbprint(&format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#));

        Self {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid,
            n: Some(n),
            e: Some(e),
            crv: None,
            x: None,
            y: None,
        }
    }

    /// JWK for a P-256 point given by its affine coordinates.
    #[must_use]
    pub fn from_p256_point(x: &[u8], y: &[u8]) -> Self {
        let x = Base64UrlUnpadded::encode_string(x);
        let y = Base64UrlUnpadded::encode_string(y);
        let kid = thumbprint(&format!(
            r#"{{"crv":"{P256_CURVE}","kty":"EC","x":"{x}","y":"{y}"}}"#
        ));

        Self {
            kty: "EC".to_string(),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            kid,
            n: None,
            e: None,
            crv: Some(P256_CURVE.to_string()),
            x: Some(x),
            y: Some(y),
        }
    }
}

const P256_CURVE: &str = "P-256";

// id-ecPublicKey and prime256v1
const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const P256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

fn thumbprint(canonical: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(canonical.as_bytes()))
}

fn unsupported() -> Error {
    Error::KeyConversion("unsupported or malformed signing key".to_string())
}

fn decode_rsa_public_key(pem_or_der: &[u8]) -> Result<RsaPublicKey> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| unsupported())?;
        if let Ok(k) = RsaPublicKey::from_public_key_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPublicKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(RsaPublicKey::from(&k));
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(s) {
            return Ok(RsaPublicKey::from(&k));
        }
        return Err(unsupported());
    }

    if let Ok(k) = RsaPublicKey::from_public_key_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPublicKey::from_pkcs1_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(RsaPublicKey::from(&k));
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs1_der(pem_or_der) {
        return Ok(RsaPublicKey::from(&k));
    }
    Err(unsupported())
}

/// Affine coordinates of a P-256 SubjectPublicKeyInfo with an uncompressed point.
fn decode_p256_public_key(pem_or_der: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let der = if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| unsupported())?;
        let (label, document) = Document::from_pem(s).map_err(|_| unsupported())?;
        if label != "PUBLIC KEY" {
            return Err(unsupported());
        }
        document.as_bytes().to_vec()
    } else {
        pem_or_der.to_vec()
    };

    let spki = SubjectPublicKeyInfoRef::from_der(&der).map_err(|_| unsupported())?;
    if spki.algorithm.oid != EC_PUBLIC_KEY_OID
        || spki.algorithm.parameters_oid().map_err(|_| unsupported())? != P256_OID
    {
        return Err(unsupported());
    }

    match spki.subject_public_key.as_bytes() {
        Some([0x04, point @ ..]) if point.len() == 64 => {
            let (x, y) = point.split_at(32);
            Ok((x.to_vec(), y.to_vec()))
        }
        _ => Err(Error::KeyConversion(
            "P-256 key must be an uncompressed point".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    #[allow(clippy::unwrap_used)]
    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_populate_empty() {
        assert!(Jwks::populate(None).unwrap().is_empty());
        assert!(Jwks::populate(Some("")).unwrap().is_empty());
        assert!(Jwks::populate(Some("  ")).unwrap().is_empty());
    }

    #[test]
    fn test_populate_malformed_base64() {
        assert!(matches!(
            Jwks::populate(Some("%%% not base64 %%%")),
            Err(Error::CertificateDecode(_))
        ));
    }

    #[test]
    fn test_populate_not_a_key() {
        let encoded = Base64::encode_string(b"-----BEGIN PUBLIC KEY-----\ngarbage\n-----END PUBLIC KEY-----\n");
        assert!(matches!(
            Jwks::populate(Some(&encoded)),
            Err(Error::KeyConversion(_))
        ));

        let encoded = Base64::encode_string(&[0u8, 1, 2, 3]);
        assert!(matches!(
            Jwks::populate(Some(&encoded)),
            Err(Error::KeyConversion(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_populate_public_key_encodings() {
        let private_key = test_key();
        let public_key = RsaPublicKey::from(&private_key);
        let expected = Jwk::from_rsa_public_key(&public_key);

        let spki_pem = public_key.to_public_key_pem(LineEnding::LF).unwrap();
        let pkcs1_pem = public_key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let spki_der = public_key.to_public_key_der().unwrap();
        let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let private_pkcs1_pem = private_key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let private_der = private_key.to_pkcs8_der().unwrap();
        let private_pkcs1_der = private_key.to_pkcs1_der().unwrap();

        for input in [
            spki_pem.as_bytes(),
            pkcs1_pem.as_bytes(),
            spki_der.as_bytes(),
            private_pem.as_bytes(),
            private_pkcs1_pem.as_bytes(),
            private_der.as_bytes(),
            private_pkcs1_der.as_bytes(),
        ] {
            let jwks = Jwks::populate(Some(&Base64::encode_string(input))).unwrap();
            assert_eq!(jwks.keys, vec![expected.clone()]);
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_jwk_fields() {
        let public_key = RsaPublicKey::from(&test_key());
        let jwk = Jwk::from_rsa_public_key(&public_key);

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg.as_deref(), Some("RS256"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert_eq!(jwk.e.as_deref(), Some("AQAB"));
        assert!(jwk.crv.is_none());
        assert_eq!(jwk.kid.len(), 43);

        let jwks = Jwks { keys: vec![jwk] };
        let json = jwks.to_json().unwrap();
        assert!(json.contains(r#""use":"sig""#));
        assert!(jwks.find_by_kid(&jwks.keys[0].kid).is_some());
        assert!(jwks.find_by_kid("missing").is_none());
    }

    // SubjectPublicKeyInfo prefix for an uncompressed P-256 point
    const P256_SPKI_PREFIX: [u8; 26] = [
        0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
        0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
    ];

    fn p256_spki(x: [u8; 32], y: [u8; 32]) -> Vec<u8> {
        let mut der = P256_SPKI_PREFIX.to_vec();
        der.push(0x04);
        der.extend_from_slice(&x);
        der.extend_from_slice(&y);
        der
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_populate_p256_public_key() {
        let der = p256_spki([1u8; 32], [2u8; 32]);
        let pem = format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            Base64::encode_string(&der)
        );

        for input in [der.as_slice(), pem.as_bytes()] {
            let jwks = Jwks::populate(Some(&Base64::encode_string(input))).unwrap();
            let jwk = &jwks.keys[0];

            assert_eq!(jwk.kty, "EC");
            assert_eq!(jwk.alg.as_deref(), Some("ES256"));
            assert_eq!(jwk.crv.as_deref(), Some("P-256"));
            assert_eq!(
                jwk.x.as_deref(),
                Some(Base64UrlUnpadded::encode_string(&[1u8; 32]).as_str())
            );
            assert_eq!(
                jwk.y.as_deref(),
                Some(Base64UrlUnpadded::encode_string(&[2u8; 32]).as_str())
            );
            assert!(jwk.n.is_none());
            assert_eq!(jwk.kid.len(), 43);
        }

        let json = Jwks::populate(Some(&Base64::encode_string(&der)))
            .unwrap()
            .to_json()
            .unwrap();
        assert!(json.contains(r#""crv":"P-256""#));
        assert!(!json.contains(r#""n":"#));
    }

    #[test]
    fn test_populate_compressed_p256_point_is_rejected() {
        let mut der = p256_spki([1u8; 32], [2u8; 32]);
        der[26] = 0x02;
        assert!(matches!(
            Jwks::populate(Some(&Base64::encode_string(&der))),
            Err(Error::KeyConversion(_))
        ));
    }
}
