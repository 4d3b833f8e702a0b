use crate::databroker::{DataBrokerClient, Error, Record};
use base64ct::{Base64UrlUnpadded, Encoding};
use tracing::instrument;
use webauthn_rs::prelude::Passkey;

/// Record type under which credentials are kept in the data broker.
pub const CREDENTIAL_RECORD_TYPE: &str = "authgate.webauthn.credential";

/// Registered WebAuthn credentials, persisted in the data broker.
///
/// Nothing is fetched until a ceremony asks for a credential.
#[derive(Clone)]
pub struct CredentialStorage {
    client: DataBrokerClient,
}

impl CredentialStorage {
    #[must_use]
    pub fn new(client: DataBrokerClient) -> Self {
        Self { client }
    }

    /// Record id for a raw credential id.
    #[must_use]
    pub fn record_id(credential_id: &[u8]) -> String {
        Base64UrlUnpadded::encode_string(credential_id)
    }

    /// # Errors
    /// Returns an error if the data broker cannot be reached or the stored
    /// credential cannot be decoded.
    #[instrument(skip_all)]
    pub async fn get_credential(&self, credential_id: &[u8]) -> Result<Option<Passkey>, Error> {
        let id = Self::record_id(credential_id);
        let Some(record) = self.client.get_record(CREDENTIAL_RECORD_TYPE, &id).await? else {
            return Ok(None);
        };

        let passkey = serde_json::from_value(record.data)
            .map_err(|e| Error::Payload(format!("credential {id}: {e}")))?;

        Ok(Some(passkey))
    }

    /// # Errors
    /// Returns an error if the credential cannot be encoded or the data broker rejects it.
    #[instrument(skip_all)]
    pub async fn set_credential(&self, passkey: &Passkey) -> Result<(), Error> {
        let data = serde_json::to_value(passkey).map_err(|e| Error::Payload(e.to_string()))?;
        let record = Record {
            record_type: CREDENTIAL_RECORD_TYPE.to_string(),
            id: Self::record_id(passkey.cred_id().as_slice()),
            data,
        };

        self.client.put_record(&record).await
    }
}
