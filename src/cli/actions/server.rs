use crate::config::{check::check_unknown_config_fields, check::KeyAction, Config, Options};
use crate::databroker::HttpConnector;
use crate::state::StateHolder;
use crate::DataBrokerCache;
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Where the options come from: an optional JSON file, overridden by flags and
/// environment variables.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub config_path: Option<PathBuf>,
    pub authenticate_service_url: Option<String>,
    pub shared_secret: Option<SecretString>,
    pub cookie_secret: Option<SecretString>,
    pub signing_key: Option<SecretString>,
    pub installation_id: Option<String>,
    pub services: Option<Vec<String>>,
    pub outbound_port: u16,
}

impl Args {
    /// Read the config file, if any, and apply the overrides.
    ///
    /// # Errors
    /// Returns an error if the config file cannot be read or parsed.
    pub fn load(&self) -> Result<Config> {
        let mut options = match &self.config_path {
            Some(path) => Options::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => Options::default(),
        };

        if let Some(url) = &self.authenticate_service_url {
            options.authenticate_service_url = Some(url.clone());
        }
        if let Some(secret) = &self.shared_secret {
            options.shared_secret = Some(secret.clone());
        }
        if let Some(secret) = &self.cookie_secret {
            options.cookie_secret = Some(secret.clone());
        }
        if let Some(key) = &self.signing_key {
            options.signing_key = Some(key.clone());
        }
        if let Some(id) = &self.installation_id {
            options.installation_id = Some(id.clone());
        }
        if let Some(services) = &self.services {
            options.services.clone_from(services);
        }

        Ok(Config::new(options, self.outbound_port))
    }
}

/// Log unknown and removed fields. Returns `true` if any of them is fatal.
pub fn report_unknown_fields(options: &Options) -> bool {
    let mut fatal = false;

    for msg in check_unknown_config_fields(options.unknown_fields()) {
        let docs = msg.docs_url.unwrap_or("");
        match msg.action {
            KeyAction::Warn => warn!("config field {} is {} {docs}", msg.key, msg.message),
            KeyAction::Error => {
                error!("config field {} is {} {docs}", msg.key, msg.message);
                fatal = true;
            }
        }
    }

    fatal
}

async fn bootstrap(args: &Args, holder: &StateHolder, cache: &DataBrokerCache) -> Result<()> {
    let config = args.load()?;

    if report_unknown_fields(&config.options) {
        anyhow::bail!("configuration contains removed fields");
    }

    let state = holder
        .reload(&config, cache)
        .await
        .context("failed to bootstrap authenticate service")?;

    info!("authenticate service ready: {state:?}");

    Ok(())
}

/// Bootstrap the service, then rebuild its state on `SIGHUP` until interrupted.
///
/// # Errors
/// Returns an error if the first bootstrap fails.
pub async fn handle(args: Args) -> Result<()> {
    let holder = StateHolder::new();
    let cache = Arc::new(DataBrokerCache::new(HttpConnector));

    bootstrap(&args, &holder, &cache).await?;

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration");
                if let Err(e) = bootstrap(&args, &holder, &cache).await {
                    error!("reload failed, previous state kept: {e:#}");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
