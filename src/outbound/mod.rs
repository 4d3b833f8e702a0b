//! Cached outbound connection to the data broker.
//!
//! The cache holds a single entry keyed by the [`Fingerprint`] of the options
//! that created it. Every bootstrap asking for the same fingerprint shares one
//! connection; a different fingerprint dials a new connection and replaces the
//! entry. A superseded connection is closed when the last [`Arc`] handed out for
//! it is dropped, so in-flight callers are never cut off.

use secrecy::{ExposeSecret, SecretSlice};
use sha2::{Digest, Sha256};
use std::{fmt, future::Future, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid outbound target: {0}")]
    InvalidTarget(String),
    #[error("data broker unreachable: {0}")]
    Unreachable(String),
    #[error("timed out connecting to data broker")]
    Timeout,
    #[error("data broker rejected credentials with status {0}")]
    Unauthorized(u16),
    #[error("unexpected data broker response: {0}")]
    Unexpected(String),
}

/// Parameters of an outbound connection.
pub struct OutboundOptions {
    pub outbound_port: u16,
    pub installation_id: String,
    pub service_name: String,
    /// Key used to sign the bearer tokens sent with every request.
    pub signed_jwt_key: SecretSlice<u8>,
}

impl OutboundOptions {
    /// Digest of every field; the cache key never holds raw key material.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.outbound_port.to_be_bytes());
        for field in [
            self.installation_id.as_bytes(),
            self.service_name.as_bytes(),
            self.signed_jwt_key.expose_secret(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        Fingerprint(hasher.finalize().into())
    }
}

impl Clone for OutboundOptions {
    fn clone(&self) -> Self {
        Self {
            outbound_port: self.outbound_port,
            installation_id: self.installation_id.clone(),
            service_name: self.service_name.clone(),
            signed_jwt_key: SecretSlice::from(self.signed_jwt_key.expose_secret().to_vec()),
        }
    }
}

impl fmt::Debug for OutboundOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundOptions")
            .field("outbound_port", &self.outbound_port)
            .field("installation_id", &self.installation_id)
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Dials a new connection for a set of options.
pub trait Connector: Send + Sync {
    type Connection: Send + Sync + 'static;

    fn connect(
        &self,
        options: &OutboundOptions,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

struct CachedEntry<T> {
    fingerprint: Fingerprint,
    options: OutboundOptions,
    connection: Arc<T>,
}

/// Single-entry, fingerprint keyed connection cache.
///
/// Creation is serialized: callers that arrive while a connection is being
/// dialed wait for it and then share the result. Failed dials are not cached.
pub struct CachedOutboundConnection<C: Connector> {
    connector: C,
    current: Mutex<Option<CachedEntry<C::Connection>>>,
}

impl<C: Connector> CachedOutboundConnection<C> {
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
        }
    }

    /// Return the connection for `options`, dialing only when the fingerprint
    /// differs from the cached one.
    ///
    /// # Errors
    /// Returns the [`ConnectionError`] of a failed dial; the next call retries.
    #[instrument(skip_all, fields(port = options.outbound_port, service = %options.service_name))]
    pub async fn get(&self, options: &OutboundOptions) -> Result<Arc<C::Connection>, ConnectionError> {
        let fingerprint = options.fingerprint();
        let mut current = self.current.lock().await;

        if let Some(entry) = current.as_ref().filter(|e| e.fingerprint == fingerprint) {
            debug!("reusing outbound connection {fingerprint}");
            return Ok(Arc::clone(&entry.connection));
        }

        let connection = Arc::new(self.connector.connect(options).await?);

        let previous = current.replace(CachedEntry {
            fingerprint,
            options: options.clone(),
            connection: Arc::clone(&connection),
        });

        match previous {
            Some(previous) => info!(
                "replaced outbound connection {} (installation {:?}) with {fingerprint} (installation {:?})",
                previous.fingerprint, previous.options.installation_id, options.installation_id
            ),
            None => info!("created outbound connection {fingerprint}"),
        }

        Ok(connection)
    }

    /// Drop the cached entry. Handles already given out stay usable.
    pub async fn invalidate(&self) {
        if let Some(entry) = self.current.lock().await.take() {
            info!("invalidated outbound connection {}", entry.fingerprint);
        }
    }

    pub async fn current_fingerprint(&self) -> Option<Fingerprint> {
        self.current.lock().await.as_ref().map(|e| e.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingConnector {
        dials: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[derive(Debug)]
    struct FakeConnection {
        installation_id: String,
    }

    impl Connector for Arc<CountingConnector> {
        type Connection = FakeConnection;

        async fn connect(&self, options: &OutboundOptions) -> Result<FakeConnection, ConnectionError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            // widen the window for concurrent callers
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ConnectionError::Unreachable("connection refused".to_string()));
            }
            Ok(FakeConnection {
                installation_id: options.installation_id.clone(),
            })
        }
    }

    fn options(installation_id: &str) -> OutboundOptions {
        OutboundOptions {
            outbound_port: 5443,
            installation_id: installation_id.to_string(),
            service_name: "authenticate".to_string(),
            signed_jwt_key: SecretSlice::from(vec![9u8; 32]),
        }
    }

    fn cache() -> (Arc<CountingConnector>, CachedOutboundConnection<Arc<CountingConnector>>) {
        let connector = Arc::new(CountingConnector::default());
        (Arc::clone(&connector), CachedOutboundConnection::new(connector))
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(options("a").fingerprint(), options("a").fingerprint());
        assert_ne!(options("a").fingerprint(), options("b").fingerprint());

        let mut other_key = options("a");
        other_key.signed_jwt_key = SecretSlice::from(vec![8u8; 32]);
        assert_ne!(options("a").fingerprint(), other_key.fingerprint());

        let mut other_port = options("a");
        other_port.outbound_port = 5444;
        assert_ne!(options("a").fingerprint(), other_port.fingerprint());

        // field boundaries are length prefixed
        let mut shifted = options("ab");
        shifted.service_name = "cauthenticate".to_string();
        let mut unshifted = options("abc");
        unshifted.service_name = "authenticate".to_string();
        assert_ne!(shifted.fingerprint(), unshifted.fingerprint());

        assert_eq!(options("a").fingerprint().to_string().len(), 16);
    }

    #[test]
    fn test_options_debug_redacts_key() {
        let rendered = format!("{:?}", options("a"));
        assert!(rendered.contains("installation_id"));
        assert!(!rendered.contains("signed_jwt_key"));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_get_reuses_connection() {
        let (connector, cache) = cache();

        let first = cache.get(&options("a")).await.unwrap();
        let second = cache.get(&options("a")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert_eq!(cache.current_fingerprint().await, Some(options("a").fingerprint()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[allow(clippy::unwrap_used)]
    async fn test_concurrent_get_dials_once() {
        let (connector, cache) = cache();
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(&options("a")).await })
            })
            .collect();

        let mut connections = Vec::new();
        for handle in handles {
            connections.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_changed_fingerprint_replaces_connection() {
        let (connector, cache) = cache();

        let old = cache.get(&options("a")).await.unwrap();
        let old_weak = Arc::downgrade(&old);

        let new = cache.get(&options("b")).await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
        assert_eq!(new.installation_id, "b");
        assert!(!Arc::ptr_eq(&old, &new));

        // still referenced by the caller, so still alive
        assert!(old_weak.upgrade().is_some());
        drop(old);
        assert!(old_weak.upgrade().is_none());

        let again = cache.get(&options("b")).await.unwrap();
        assert!(Arc::ptr_eq(&new, &again));
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_failed_dial_is_not_cached() {
        let (connector, cache) = cache();
        connector.fail_next.store(true, Ordering::SeqCst);

        let result = cache.get(&options("a")).await;
        assert!(matches!(result, Err(ConnectionError::Unreachable(_))));
        assert_eq!(cache.current_fingerprint().await, None);

        let connection = cache.get(&options("a")).await.unwrap();
        assert_eq!(connection.installation_id, "a");
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_failed_replacement_keeps_previous_entry() {
        let (connector, cache) = cache();
        let first = cache.get(&options("a")).await.unwrap();

        connector.fail_next.store(true, Ordering::SeqCst);
        assert!(cache.get(&options("b")).await.is_err());
        assert_eq!(cache.current_fingerprint().await, Some(options("a").fingerprint()));

        let again = cache.get(&options("a")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_invalidate_forces_new_dial() {
        let (connector, cache) = cache();

        let first = cache.get(&options("a")).await.unwrap();
        cache.invalidate().await;
        assert_eq!(cache.current_fingerprint().await, None);

        let second = cache.get(&options("a")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }
}
