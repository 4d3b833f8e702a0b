//! WebAuthn relying party bound to remote credential storage.

mod storage;

pub use storage::{CredentialStorage, CREDENTIAL_RECORD_TYPE};

use crate::error::{Error, Result};
use std::sync::Arc;
use url::Url;
use webauthn_rs::prelude::{Webauthn, WebauthnBuilder};

const RP_NAME: &str = "Authgate";

/// Relying party for the authenticate service origin. Immutable once bound.
#[derive(Clone)]
pub struct RelyingParty {
    origin: Url,
    rp_id: String,
    webauthn: Arc<Webauthn>,
    storage: CredentialStorage,
}

impl RelyingParty {
    /// Bind the relying party to `origin`. No network I/O happens here.
    ///
    /// The relying party id is the origin host.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the origin has no host or is not a
    /// valid WebAuthn origin.
    pub fn bind(origin: &Url, storage: CredentialStorage) -> Result<Self> {
        let rp_id = origin
            .host_str()
            .ok_or_else(|| Error::config(format!("relying party origin {origin} has no host")))?
            .to_string();

        let webauthn = WebauthnBuilder::new(&rp_id, origin)
            .and_then(|builder| builder.rp_name(RP_NAME).build())
            .map_err(|e| Error::config(format!("invalid relying party origin {origin}: {e}")))?;

        Ok(Self {
            origin: origin.clone(),
            rp_id,
            webauthn: Arc::new(webauthn),
            storage,
        })
    }

    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn webauthn(&self) -> &Webauthn {
        &self.webauthn
    }

    #[must_use]
    pub fn storage(&self) -> &CredentialStorage {
        &self.storage
    }
}
