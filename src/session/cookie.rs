use super::{SessionError, SessionLoader, SessionState, SessionStore};
use crate::config::Options;
use crate::crypto::Hs256Encoder;
use crate::error::{Error, Result};
use axum::http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use std::{collections::HashMap, time::Duration};
use tracing::debug;

/// Longest value written into a single cookie; larger sessions are chunked.
pub const MAX_CHUNK_SIZE: usize = 3800;

/// Upper bound on chunks per session, including the first cookie.
pub const MAX_NUM_CHUNKS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub name: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub expire: Duration,
    pub same_site: Option<String>,
}

impl CookieOptions {
    #[must_use]
    pub fn from_options(options: &Options) -> Self {
        Self {
            name: options.cookie_name.clone(),
            domain: options.cookie_domain.clone().filter(|d| !d.is_empty()),
            secure: options.cookie_secure,
            http_only: options.cookie_http_only,
            expire: options.cookie_expire(),
            same_site: options.cookie_same_site.clone().filter(|s| !s.is_empty()),
        }
    }
}

/// Session persistence in (possibly chunked) cookies signed by the cookie-domain encoder.
#[derive(Clone)]
pub struct CookieStore {
    options: CookieOptions,
    same_site: Option<&'static str>,
    encoder: Hs256Encoder,
}

impl CookieStore {
    /// # Errors
    /// Returns [`Error::Configuration`] for an empty or malformed cookie name
    /// or an unknown `SameSite` mode.
    pub fn new(options: CookieOptions, encoder: Hs256Encoder) -> Result<Self> {
        let valid_name = !options.name.is_empty()
            && options
                .name
                .bytes()
                .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b));
        if !valid_name {
            return Err(Error::config(format!(
                "invalid cookie name {:?}",
                options.name
            )));
        }

        let same_site = match options.same_site.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => None,
            Some("lax") => Some("Lax"),
            Some("strict") => Some("Strict"),
            Some("none") => Some("None"),
            Some(other) => {
                return Err(Error::config(format!("invalid cookie_same_site {other}")));
            }
        };

        Ok(Self {
            options,
            same_site,
            encoder,
        })
    }

    #[must_use]
    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    fn chunk_name(&self, index: usize) -> String {
        if index == 0 {
            self.options.name.clone()
        } else {
            format!("{}_{index}", self.options.name)
        }
    }

    fn set_cookie(&self, name: &str, value: &str, max_age: u64) -> Result<HeaderValue, SessionError> {
        let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age}");
        if let Some(domain) = &self.options.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.options.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.options.secure {
            cookie.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            cookie.push_str("; SameSite=");
            cookie.push_str(same_site);
        }
        HeaderValue::from_str(&cookie).map_err(|e| SessionError::Invalid(e.to_string()))
    }

    /// Name of the cookie holding the chunk count of a chunked session.
    fn count_name(&self) -> String {
        format!("{}_n", self.options.name)
    }

    /// Expiring cookies for every chunk index from `from` on, plus the count
    /// cookie when the session is no longer chunked.
    fn expired_chunks(&self, from: usize) -> Result<Vec<HeaderValue>, SessionError> {
        let mut cookies = Vec::new();
        if from <= 1 {
            cookies.push(self.set_cookie(&self.count_name(), "", 0)?);
        }
        for index in from.max(1)..MAX_NUM_CHUNKS {
            cookies.push(self.set_cookie(&self.chunk_name(index), "", 0)?);
        }
        Ok(cookies)
    }

    /// Reassemble the encoded session from the request cookies.
    ///
    /// Exactly as many chunks as the count cookie announces are read, so
    /// leftovers of an earlier, larger session are never appended.
    fn read_value(&self, headers: &HeaderMap) -> Result<Option<String>, SessionError> {
        let mut jar: HashMap<&str, &str> = HashMap::new();
        for header in headers.get_all(COOKIE) {
            let value = header
                .to_str()
                .map_err(|e| SessionError::Invalid(format!("unreadable cookie header: {e}")))?;
            for pair in value.split(';') {
                if let Some((key, val)) = pair.trim().split_once('=') {
                    let val = val.trim();
                    if !val.is_empty() {
                        jar.entry(key.trim()).or_insert(val);
                    }
                }
            }
        }

        let Some(first) = jar.get(self.options.name.as_str()) else {
            return Ok(None);
        };

        let count = match jar.get(self.count_name().as_str()) {
            None => 1,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if (1..=MAX_NUM_CHUNKS).contains(&n) => n,
                _ => {
                    debug!("ignoring session with chunk count {raw:?}");
                    return Ok(None);
                }
            },
        };

        let mut value = (*first).to_string();
        for index in 1..count {
            let Some(chunk) = jar.get(self.chunk_name(index).as_str()) else {
                debug!("session cookie {} is missing chunk {index}", self.options.name);
                return Ok(None);
            };
            value.push_str(chunk);
        }

        Ok(Some(value))
    }
}

impl SessionLoader for CookieStore {
    fn load_session(&self, headers: &HeaderMap) -> Result<SessionState, SessionError> {
        let value = self.read_value(headers)?.ok_or(SessionError::NotFound)?;

        let state: SessionState = self.encoder.unmarshal(&value).map_err(|e| {
            debug!("discarding session cookie {}: {e}", self.options.name);
            SessionError::NotFound
        })?;

        if state.is_expired() {
            debug!("discarding expired session {}", state.id);
            return Err(SessionError::NotFound);
        }

        Ok(state)
    }
}

impl SessionStore for CookieStore {
    fn save_session(&self, headers: &mut HeaderMap, state: &SessionState) -> Result<(), SessionError> {
        let encoded = self
            .encoder
            .marshal(state)
            .map_err(|e| SessionError::Invalid(e.to_string()))?;

        // compact JWS is ASCII, so byte chunks are valid strings
        let chunks: Vec<&[u8]> = encoded.as_bytes().chunks(MAX_CHUNK_SIZE).collect();
        if chunks.len() > MAX_NUM_CHUNKS {
            return Err(SessionError::Invalid(format!(
                "session needs {} cookies, at most {MAX_NUM_CHUNKS} allowed",
                chunks.len()
            )));
        }

        let max_age = self.options.expire.as_secs();
        let count = chunks.len();
        let mut cookies = Vec::with_capacity(count + 1);
        for (index, chunk) in chunks.into_iter().enumerate() {
            let chunk = std::str::from_utf8(chunk).map_err(|e| SessionError::Invalid(e.to_string()))?;
            cookies.push(self.set_cookie(&self.chunk_name(index), chunk, max_age)?);
        }
        if count > 1 {
            cookies.push(self.set_cookie(&self.count_name(), &count.to_string(), max_age)?);
        }

        cookies.extend(self.expired_chunks(count)?);

        for cookie in cookies {
            headers.append(SET_COOKIE, cookie);
        }

        Ok(())
    }

    fn clear_session(&self, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let mut cookies = vec![self.set_cookie(&self.options.name, "", 0)?];
        cookies.extend(self.expired_chunks(1)?);

        for cookie in cookies {
            headers.append(SET_COOKIE, cookie);
        }

        Ok(())
    }
}
