//! Authenticate service options and the secrets derived from them.
//!
//! Options are read from a JSON document. Keys the loader does not recognise
//! are kept aside so they can be reported with [`check::check_unknown_config_fields`].

pub mod check;

use crate::crypto::KEY_LEN;
use crate::error::{Error, Result};
use base64ct::{Base64, Encoding};
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::{collections::BTreeMap, fs, path::Path, time::Duration};
use tracing::debug;
use url::Url;

pub const DEFAULT_CALLBACK_PATH: &str = "/oauth2/callback";
pub const DEFAULT_COOKIE_NAME: &str = "_authgate";
pub const DEFAULT_COOKIE_EXPIRE_SECONDS: u64 = 14 * 60 * 60;
pub const DEFAULT_OUTBOUND_PORT: u16 = 5443;
pub const DEFAULT_SERVICES: &str = "all";

fn secret_string<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Process-level configuration: the options plus settings that are not part of
/// the options document.
#[derive(Debug, Clone)]
pub struct Config {
    pub options: Options,
    /// Local port of the data broker listener.
    pub outbound_port: u16,
}

impl Config {
    #[must_use]
    pub fn new(options: Options, outbound_port: u16) -> Self {
        Self {
            options,
            outbound_port,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub policy: Option<Value>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    pub authenticate_service_url: Option<String>,
    pub authenticate_callback_path: String,
    #[serde(deserialize_with = "secret_string")]
    pub shared_secret: Option<SecretString>,
    pub shared_secret_file: Option<String>,
    #[serde(deserialize_with = "secret_string")]
    pub cookie_secret: Option<SecretString>,
    pub cookie_secret_file: Option<String>,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    /// Session cookie lifetime in seconds.
    pub cookie_expire: u64,
    pub cookie_same_site: Option<String>,
    #[serde(deserialize_with = "secret_string")]
    pub signing_key: Option<SecretString>,
    pub signing_key_file: Option<String>,
    pub installation_id: Option<String>,
    pub services: Vec<String>,
    pub routes: Vec<Route>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            authenticate_service_url: None,
            authenticate_callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            shared_secret: None,
            shared_secret_file: None,
            cookie_secret: None,
            cookie_secret_file: None,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_domain: None,
            cookie_secure: true,
            cookie_http_only: true,
            cookie_expire: DEFAULT_COOKIE_EXPIRE_SECONDS,
            cookie_same_site: None,
            signing_key: None,
            signing_key_file: None,
            installation_id: None,
            services: vec![DEFAULT_SERVICES.to_string()],
            routes: Vec::new(),
            unknown: BTreeMap::new(),
        }
    }
}

impl Options {
    /// Parse options from a JSON document.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the document is not valid JSON or a
    /// known field has the wrong type.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::config(format!("invalid options document: {e}")))
    }

    /// # Errors
    /// Returns [`Error::Configuration`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        debug!("loaded config file {}", path.display());

        Self::from_json(&contents)
    }

    /// Key paths present in the document that no option consumed, e.g.
    /// `idp_qps` or `routes[2].health_checks`.
    #[must_use]
    pub fn unknown_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.unknown.keys().cloned().collect();

        for (i, route) in self.routes.iter().enumerate() {
            fields.extend(route.unknown.keys().map(|k| format!("routes[{i}].{k}")));
        }

        fields
    }

    /// Absolute URL of the authenticate service.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the URL is missing, relative or has no host.
    pub fn authenticate_url(&self) -> Result<Url> {
        let raw = self
            .authenticate_service_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("authenticate_service_url is required"))?;

        let url = Url::parse(raw)
            .map_err(|e| Error::config(format!("invalid authenticate_service_url {raw}: {e}")))?;

        if url.host_str().is_none() {
            return Err(Error::config(format!(
                "authenticate_service_url {raw} must be an absolute URL with a host"
            )));
        }

        Ok(url)
    }

    /// Secret shared with the other services of the proxy.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the secret is absent, not base64 or not 32 bytes.
    pub fn shared_key(&self) -> Result<SecretSlice<u8>> {
        let encoded = read_secret(
            "shared_secret",
            self.shared_secret.as_ref(),
            self.shared_secret_file.as_deref(),
        )?;
        decode_key("shared_secret", &encoded)
    }

    /// Secret protecting session cookies.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the secret is absent, not base64 or not 32 bytes.
    pub fn cookie_secret(&self) -> Result<SecretSlice<u8>> {
        let encoded = read_secret(
            "cookie_secret",
            self.cookie_secret.as_ref(),
            self.cookie_secret_file.as_deref(),
        )?;
        decode_key("cookie_secret", &encoded)
    }

    /// Base64 encoded public key used to verify externally issued tokens.
    ///
    /// `signing_key` is already base64 text; `signing_key_file` holds the raw
    /// PEM, which is encoded here so both sources look the same to callers.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `signing_key_file` cannot be read.
    pub fn signing_key(&self) -> Result<Option<SecretString>> {
        if let Some(key) = self
            .signing_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
        {
            return Ok(Some(SecretString::from(key.expose_secret().trim().to_string())));
        }

        match self.signing_key_file.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => {
                let pem = fs::read(path).map_err(|e| {
                    Error::config(format!("failed to read signing_key_file {path}: {e}"))
                })?;
                Ok(Some(SecretString::from(Base64::encode_string(&pem))))
            }
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn cookie_expire(&self) -> Duration {
        Duration::from_secs(self.cookie_expire)
    }

    /// Service names joined the way they are announced to the data broker.
    #[must_use]
    pub fn service_name(&self) -> String {
        self.services.join(",")
    }

    /// Check every option the authenticate service depends on.
    ///
    /// # Errors
    /// Returns the first [`Error::Configuration`] found.
    pub fn validate(&self) -> Result<()> {
        self.shared_key()?;
        self.cookie_secret()?;
        self.authenticate_url()?;

        if !self.authenticate_callback_path.starts_with('/') {
            return Err(Error::config(format!(
                "authenticate_callback_path {} must start with '/'",
                self.authenticate_callback_path
            )));
        }

        if self.cookie_name.trim().is_empty() {
            return Err(Error::config("cookie_name must not be empty"));
        }

        if self.cookie_expire == 0 {
            return Err(Error::config("cookie_expire must be greater than zero"));
        }

        if self.services.iter().all(|s| s.trim().is_empty()) {
            return Err(Error::config("at least one service must be configured"));
        }

        Ok(())
    }
}

fn read_secret(name: &str, inline: Option<&SecretString>, file: Option<&str>) -> Result<SecretString> {
    if let Some(secret) = inline.filter(|s| !s.expose_secret().trim().is_empty()) {
        return Ok(SecretString::from(secret.expose_secret().trim().to_string()));
    }

    let path = file
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::config(format!("{name} or {name}_file is required")))?;

    let contents = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {name}_file {path}: {e}")))?;

    Ok(SecretString::from(contents.trim().to_string()))
}

fn decode_key(name: &str, encoded: &SecretString) -> Result<SecretSlice<u8>> {
    let decoded = Base64::decode_vec(encoded.expose_secret())
        .map_err(|_| Error::config(format!("{name} is not valid base64")))?;

    if decoded.len() != KEY_LEN {
        return Err(Error::config(format!(
            "{name} must decode to {KEY_LEN} bytes, got {}",
            decoded.len()
        )));
    }

    Ok(SecretSlice::from(decoded))
}
