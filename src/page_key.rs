//! Page identity.
//!
//! A [`PageKey`] groups log records by the document they belong to. It is
//! derived from a URL by keeping only the components selected in
//! [`PageKeyOptions`], so e.g. two URLs differing only in their fragment
//! share highlights by default.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageKey(String);

#[derive(Debug, thiserror::Error)]
pub enum PageKeyError {
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageKeyOptions {
    pub scheme: bool,
    pub host: bool,
    pub port: bool,
    pub path: bool,
    pub query: bool,
    pub fragment: bool,
}

impl Default for PageKeyOptions {
    fn default() -> Self {
        Self {
            scheme: false,
            host: true,
            port: true,
            path: true,
            query: true,
            fragment: false,
        }
    }
}

impl PageKey {
    /// Uses `key` verbatim, for keys that were normalized elsewhere.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_url(url: &str, options: &PageKeyOptions) -> Result<Self, PageKeyError> {
        let parsed = Url::parse(url).map_err(|source| PageKeyError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::from_parsed(&parsed, options))
    }

    pub fn from_parsed(url: &Url, options: &PageKeyOptions) -> Self {
        let mut key = String::new();
        if options.scheme {
            key.push_str(url.scheme());
            key.push_str(if url.has_host() { "://" } else { ":" });
        }
        if options.host
            && let Some(host) = url.host_str()
        {
            key.push_str(host);
        }
        if options.port
            && let Some(port) = url.port()
        {
            key.push(':');
            key.push_str(&port.to_string());
        }
        if options.path {
            key.push_str(url.path());
        }
        if options.query
            && let Some(query) = url.query().filter(|query| !query.is_empty())
        {
            key.push('?');
            key.push_str(query);
        }
        if options.fragment
            && let Some(fragment) = url.fragment().filter(|fragment| !fragment.is_empty())
        {
            key.push('#');
            key.push_str(fragment);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}
