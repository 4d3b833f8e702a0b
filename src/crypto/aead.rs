use super::CryptoError;
use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};

/// Key size of the cipher suite in bytes.
pub const KEY_LEN: usize = 32;

/// XChaCha20 nonce size in bytes.
pub const NONCE_LEN: usize = 24;

/// XChaCha20-Poly1305 bound to one key.
///
/// Sealed messages are laid out as `nonce (24 bytes) || ciphertext`.
#[derive(Clone)]
pub struct AeadCipher {
    inner: XChaCha20Poly1305,
}

impl AeadCipher {
    /// # Errors
    /// Returns [`Error::Key`] if `key` is not exactly [`KEY_LEN`] bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::Key(format!(
                "cipher requires a {KEY_LEN}-byte key, got {} bytes",
                key.len()
            )));
        }

        let inner = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| Error::Key(format!("failed to initialise cipher: {e}")))?;

        Ok(Self { inner })
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    /// Returns [`CryptoError::Encode`] if the cipher refuses the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.encrypt_with_aad(plaintext, &[])
    }

    /// # Errors
    /// Returns [`CryptoError::Encode`] if the cipher refuses the input.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: plaintext,
            aad,
        };

        let ciphertext = self
            .inner
            .encrypt(&nonce, payload)
            .map_err(|e| CryptoError::Encode(format!("encryption failure: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(sealed)
    }

    /// # Errors
    /// Returns [`CryptoError::AuthenticationFailure`] for truncated, tampered or foreign input.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.decrypt_with_aad(data, &[])
    }

    /// # Errors
    /// Returns [`CryptoError::AuthenticationFailure`] for truncated, tampered or foreign input.
    pub fn decrypt_with_aad(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::AuthenticationFailure);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };

        self.inner
            .decrypt(XNonce::from_slice(nonce), payload)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }
}
