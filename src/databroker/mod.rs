//! HTTP client for the data broker reached through the outbound connection.

use crate::crypto::{CryptoError, Hs256Encoder};
use crate::outbound::{ConnectionError, Connector, OutboundOptions};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use url::Url;

pub(crate) static APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Bound on dialing and probing a new connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifetime of the bearer token attached to each request.
const TOKEN_TTL_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("data broker returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid data broker payload: {0}")]
    Payload(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    iat: i64,
    exp: i64,
}

/// A record stored in the data broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    #[serde(rename = "type")]
    pub record_type: String,
    pub id: String,
    pub data: Value,
}

/// Pooled HTTP connection to the local data broker listener.
///
/// Dropping the last handle closes the pool.
pub struct DataBrokerConnection {
    http: Client,
    base_url: Url,
    signer: Hs256Encoder,
    installation_id: String,
    service_name: String,
}

impl DataBrokerConnection {
    /// Build the connection without any network I/O.
    ///
    /// # Errors
    /// Returns [`ConnectionError::InvalidTarget`] for port zero or unusable key material.
    pub fn new(options: &OutboundOptions) -> Result<Self, ConnectionError> {
        if options.outbound_port == 0 {
            return Err(ConnectionError::InvalidTarget(
                "outbound port must not be zero".to_string(),
            ));
        }

        let base_url = Url::parse(&format!("http://127.0.0.1:{}/", options.outbound_port))
            .map_err(|e| ConnectionError::InvalidTarget(e.to_string()))?;

        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .connect_timeout(DIAL_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ConnectionError::InvalidTarget(e.to_string()))?;

        let signer = Hs256Encoder::new(options.signed_jwt_key.expose_secret())
            .map_err(|e| ConnectionError::InvalidTarget(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            signer,
            installation_id: options.installation_id.clone(),
            service_name: options.service_name.clone(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn bearer_token(&self) -> Result<String, ConnectionError> {
        let iat = Utc::now().timestamp();
        let claims = ServiceClaims {
            iss: &self.service_name,
            sub: &self.installation_id,
            iat,
            exp: iat + TOKEN_TTL_SECONDS,
        };
        self.signer
            .marshal(&claims)
            .map_err(|e: CryptoError| ConnectionError::InvalidTarget(e.to_string()))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ConnectionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ConnectionError::InvalidTarget(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Check that the broker answers and accepts our credentials.
    ///
    /// # Errors
    /// Returns a [`ConnectionError`] describing why the broker is not usable.
    pub async fn check_health(&self) -> Result<(), ConnectionError> {
        let url = self.endpoint(&["healthz"])?;

        let span = info_span!("databroker.healthz", http.method = "GET", url = %url);
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(self.bearer_token()?)
            .timeout(DIAL_TIMEOUT)
            .send()
            .instrument(span)
            .await
            .map_err(connection_error)?;

        let status = response.status();
        if status.is_success() {
            debug!("data broker at {} is ready", self.base_url);
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ConnectionError::Unauthorized(status.as_u16()));
        }

        Err(ConnectionError::Unexpected(format!("{url} - {status}")))
    }
}

impl Drop for DataBrokerConnection {
    fn drop(&mut self) {
        debug!("closing data broker connection to {}", self.base_url);
    }
}

fn connection_error(err: reqwest::Error) -> ConnectionError {
    if err.is_timeout() {
        ConnectionError::Timeout
    } else if err.is_connect() {
        ConnectionError::Unreachable(err.to_string())
    } else {
        ConnectionError::Unexpected(err.to_string())
    }
}

fn error_message(json_response: &Value) -> &str {
    json_response
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Dials the data broker over HTTP and checks its health before handing it out.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    type Connection = DataBrokerConnection;

    async fn connect(&self, options: &OutboundOptions) -> Result<DataBrokerConnection, ConnectionError> {
        let connection = DataBrokerConnection::new(options)?;
        connection.check_health().await?;
        Ok(connection)
    }
}

/// Typed data broker client sharing a cached connection.
#[derive(Clone)]
pub struct DataBrokerClient {
    connection: Arc<DataBrokerConnection>,
}

impl DataBrokerClient {
    #[must_use]
    pub fn new(connection: Arc<DataBrokerConnection>) -> Self {
        Self { connection }
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<DataBrokerConnection> {
        &self.connection
    }

    /// Fetch a record, `None` when the broker does not have it.
    ///
    /// # Errors
    /// Returns an error if the request fails or the broker answers with an unexpected status.
    pub async fn get_record(&self, record_type: &str, id: &str) -> Result<Option<Record>, Error> {
        let conn = &self.connection;
        let url = conn.endpoint(&["v1", "records", record_type, id])?;

        let span = info_span!("databroker.get", http.method = "GET", url = %url);
        let response = conn
            .http
            .get(url.clone())
            .bearer_auth(conn.bearer_token()?)
            .send()
            .instrument(span)
            .await
            .map_err(connection_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let json_response: Value = response.json().await.unwrap_or(Value::Null);
            return Err(Error::Status {
                status: status.as_u16(),
                message: error_message(&json_response).to_string(),
            });
        }

        let record = response
            .json::<Record>()
            .await
            .map_err(|e| Error::Payload(e.to_string()))?;

        Ok(Some(record))
    }

    /// Create or replace a record.
    ///
    /// # Errors
    /// Returns an error if the request fails or the broker rejects the record.
    pub async fn put_record(&self, record: &Record) -> Result<(), Error> {
        let conn = &self.connection;
        let url = conn.endpoint(&["v1", "records", &record.record_type, &record.id])?;

        let span = info_span!("databroker.put", http.method = "PUT", url = %url);
        let response = conn
            .http
            .put(url.clone())
            .bearer_auth(conn.bearer_token()?)
            .json(record)
            .send()
            .instrument(span)
            .await
            .map_err(connection_error)?;

        let status = response.status();
        if !status.is_success() {
            let json_response: Value = response.json().await.unwrap_or(Value::Null);
            return Err(Error::Status {
                status: status.as_u16(),
                message: error_message(&json_response).to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretSlice;

    fn options(port: u16) -> OutboundOptions {
        OutboundOptions {
            outbound_port: port,
            installation_id: "install-1".to_string(),
            service_name: "authenticate".to_string(),
            signed_jwt_key: SecretSlice::from(vec![5u8; 32]),
        }
    }

    #[test]
    fn test_zero_port_is_invalid() {
        assert!(matches!(
            DataBrokerConnection::new(&options(0)),
            Err(ConnectionError::InvalidTarget(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_endpoint_encodes_segments() {
        let conn = DataBrokerConnection::new(&options(5443)).unwrap();
        assert_eq!(conn.base_url().as_str(), "http://127.0.0.1:5443/");

        let url = conn.endpoint(&["v1", "records", "a type", "id/1"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:5443/v1/records/a%20type/id%2F1");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_bearer_token_is_signed_with_shared_key() {
        let conn = DataBrokerConnection::new(&options(5443)).unwrap();
        let token = conn.bearer_token().unwrap();

        let verifier = Hs256Encoder::new(&[5u8; 32]).unwrap();
        let claims: Value = verifier.unmarshal(&token).unwrap();
        assert_eq!(claims["iss"], "authenticate");
        assert_eq!(claims["sub"], "install-1");
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            TOKEN_TTL_SECONDS
        );

        let other = Hs256Encoder::new(&[6u8; 32]).unwrap();
        assert!(other.unmarshal::<Value>(&token).is_err());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_health_check_unreachable() {
        // grab a free port and release it so nothing is listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = HttpConnector.connect(&options(port)).await;
        assert!(matches!(result, Err(ConnectionError::Unreachable(_))));
    }
}
