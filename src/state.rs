//! Authenticate service state, built from configuration in one step.
//!
//! A state is either built completely or not at all. Reconfiguration builds a
//! fresh state and swaps it into the [`StateHolder`]; readers keep whatever
//! `Arc` they already cloned, so they always see one consistent snapshot.

use crate::config::Config;
use crate::crypto::CipherPair;
use crate::databroker::{DataBrokerClient, DataBrokerConnection};
use crate::error::Result;
use crate::jwks::Jwks;
use crate::outbound::{CachedOutboundConnection, Connector, OutboundOptions};
use crate::session::{CookieOptions, CookieStore, SessionLoader, SessionStore};
use crate::webauthn::{CredentialStorage, RelyingParty};
use secrecy::{ExposeSecret, SecretSlice};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};
use url::Url;

pub struct AuthenticateState {
    redirect_url: Url,
    /// Protects data exchanged with the other services.
    shared: CipherPair,
    shared_key: SecretSlice<u8>,
    /// Protects user session data.
    cookie: CipherPair,
    cookie_secret: SecretSlice<u8>,
    session_store: Arc<dyn SessionStore>,
    session_loader: Arc<dyn SessionLoader>,
    jwks: Jwks,
    data_broker_client: DataBrokerClient,
    relying_party: RelyingParty,
}

impl AuthenticateState {
    /// Build the state for `cfg`, acquiring the data broker connection from `cache`.
    ///
    /// # Errors
    /// Returns the first error of any step; nothing built before it is kept.
    #[instrument(skip_all)]
    pub async fn from_config<C>(cfg: &Config, cache: &CachedOutboundConnection<C>) -> Result<Self>
    where
        C: Connector<Connection = DataBrokerConnection>,
    {
        let options = &cfg.options;
        options.validate()?;

        let authenticate_url = options.authenticate_url()?;
        let mut redirect_url = authenticate_url.clone();
        redirect_url.set_path(&options.authenticate_callback_path);

        // shared cipher to protect data passed between services
        let shared_key = options.shared_key()?;
        let shared = CipherPair::new(&shared_key)?;

        // cookie cipher to protect session state
        let cookie_secret = options.cookie_secret()?;
        let cookie = CipherPair::new(&cookie_secret)?;

        let cookie_store = Arc::new(CookieStore::new(
            CookieOptions::from_options(options),
            cookie.encoder().clone(),
        )?);

        let signing_key = options.signing_key()?;
        let jwks = Jwks::populate(signing_key.as_ref().map(|k| k.expose_secret()))?;

        let outbound = OutboundOptions {
            outbound_port: cfg.outbound_port,
            installation_id: options.installation_id.clone().unwrap_or_default(),
            service_name: options.service_name(),
            signed_jwt_key: SecretSlice::from(shared_key.expose_secret().to_vec()),
        };
        debug!("outbound fingerprint {}", outbound.fingerprint());

        let connection = cache.get(&outbound).await?;
        let data_broker_client = DataBrokerClient::new(connection);

        let relying_party = RelyingParty::bind(
            &authenticate_url,
            CredentialStorage::new(data_broker_client.clone()),
        )?;

        info!(
            "authenticate state ready: redirect {redirect_url}, {} signing key(s)",
            jwks.keys.len()
        );

        Ok(Self {
            redirect_url,
            shared,
            shared_key,
            cookie,
            cookie_secret,
            session_store: cookie_store.clone(),
            session_loader: cookie_store,
            jwks,
            data_broker_client,
            relying_party,
        })
    }

    #[must_use]
    pub fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    #[must_use]
    pub fn shared(&self) -> &CipherPair {
        &self.shared
    }

    #[must_use]
    pub fn shared_key(&self) -> &SecretSlice<u8> {
        &self.shared_key
    }

    #[must_use]
    pub fn cookie(&self) -> &CipherPair {
        &self.cookie
    }

    #[must_use]
    pub fn cookie_secret(&self) -> &SecretSlice<u8> {
        &self.cookie_secret
    }

    #[must_use]
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.session_store
    }

    #[must_use]
    pub fn session_loader(&self) -> &Arc<dyn SessionLoader> {
        &self.session_loader
    }

    #[must_use]
    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    #[must_use]
    pub fn data_broker_client(&self) -> &DataBrokerClient {
        &self.data_broker_client
    }

    #[must_use]
    pub fn relying_party(&self) -> &RelyingParty {
        &self.relying_party
    }
}

impl std::fmt::Debug for AuthenticateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticateState")
            .field("redirect_url", &self.redirect_url.as_str())
            .field("signing_keys", &self.jwks.keys.len())
            .field("data_broker", &self.data_broker_client.connection().base_url().as_str())
            .field("rp_id", &self.relying_party.rp_id())
            .finish_non_exhaustive()
    }
}

/// The current state, replaced wholesale on reconfiguration.
///
/// Reloads run one at a time in the order they were requested, so the last
/// requested configuration is the one left in effect.
#[derive(Default)]
pub struct StateHolder {
    current: RwLock<Option<Arc<AuthenticateState>>>,
    reload: Mutex<()>,
}

impl StateHolder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current state, if one was ever built.
    #[must_use]
    pub fn load(&self) -> Option<Arc<AuthenticateState>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self, state: Arc<AuthenticateState>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    /// Build a state for `cfg` and publish it. On failure the previous state
    /// stays in effect.
    ///
    /// # Errors
    /// Returns the bootstrap error.
    pub async fn reload<C>(
        &self,
        cfg: &Config,
        cache: &CachedOutboundConnection<C>,
    ) -> Result<Arc<AuthenticateState>>
    where
        C: Connector<Connection = DataBrokerConnection>,
    {
        let _reload = self.reload.lock().await;

        match AuthenticateState::from_config(cfg, cache).await {
            Ok(state) => {
                let state = Arc::new(state);
                self.store(Arc::clone(&state));
                Ok(state)
            }
            Err(e) => {
                error!("keeping previous authenticate state: {e}");
                Err(e)
            }
        }
    }
}
