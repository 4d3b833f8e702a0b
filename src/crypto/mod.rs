//! Ciphers and encoders derived from a single secret.
//!
//! Every bootstrap builds two [`CipherPair`]s: one from the shared key, used for
//! data exchanged with other services, and one from the cookie secret, used for
//! user session state. The two pairs are built from unrelated secrets and never
//! share key material.

mod aead;
mod encoder;

pub use aead::{AeadCipher, KEY_LEN, NONCE_LEN};
pub use encoder::Hs256Encoder;

use crate::error::Result;
use secrecy::{ExposeSecret, SecretSlice};
use thiserror::Error;

/// Failures while protecting or opening a single message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The message was forged, tampered with, or protected with another key.
    #[error("message authentication failed")]
    AuthenticationFailure,
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// An authenticated cipher and a signed-message encoder bound to one secret.
#[derive(Clone)]
pub struct CipherPair {
    cipher: AeadCipher,
    encoder: Hs256Encoder,
}

impl CipherPair {
    /// Build both primitives from `secret`.
    ///
    /// # Errors
    /// Returns [`Error::Key`](crate::Error::Key) if the secret is not a valid key for either primitive.
    pub fn new(secret: &SecretSlice<u8>) -> Result<Self> {
        let key = secret.expose_secret();
        Ok(Self {
            cipher: AeadCipher::new(key)?,
            encoder: Hs256Encoder::new(key)?,
        })
    }

    #[must_use]
    pub fn cipher(&self) -> &AeadCipher {
        &self.cipher
    }

    #[must_use]
    pub fn encoder(&self) -> &Hs256Encoder {
        &self.encoder
    }
}

impl std::fmt::Debug for CipherPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherPair").finish_non_exhaustive()
    }
}
