//! Bootstrap and secure state of the authenticate service.
//!
//! [`state::AuthenticateState::from_config`] turns a [`config::Config`] into the
//! ciphers, session store, signing keys, data broker client and WebAuthn relying
//! party that request handling depends on.

pub mod cli;
pub mod config;
pub mod crypto;
pub mod databroker;
pub mod error;
pub mod jwks;
pub mod outbound;
pub mod session;
pub mod state;
pub mod webauthn;

pub use error::{Error, Result};

/// Cache type used by the service for its data broker connection.
pub type DataBrokerCache = outbound::CachedOutboundConnection<databroker::HttpConnector>;
