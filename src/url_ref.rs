use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A parsed `scheme://host[:port][path]` reference. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRef {
    scheme: Scheme,
    host: String,
    port: u16,
    /// Request target: path plus query, never empty.
    path: String,
}

impl UrlRef {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| Error::InvalidUrl(input.to_string()))?;
        if scheme.is_empty() || rest.is_empty() || rest.starts_with('/') {
            return Err(Error::InvalidUrl(input.to_string()));
        }

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(Error::UnsupportedScheme(scheme.to_string())),
        };

        let parsed = Url::parse(input).map_err(|err| Error::InvalidUrl(format!("{input}: {err}")))?;

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::InvalidUrl(input.to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = parsed.port().unwrap_or(scheme.default_port());

        let mut path = match parsed.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Value of the `host` header: the host, with the port only when it is not the default.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Resolves a `location` header value, absolute or relative, against this reference.
    pub fn join(&self, location: &str) -> Result<Self> {
        let location = location.trim();

        let base = Url::parse(&self.to_string())
            .map_err(|err| Error::InvalidUrl(format!("{self}: {err}")))?;
        let joined = base
            .join(location)
            .map_err(|err| Error::InvalidUrl(format!("{location}: {err}")))?;

        Self::parse(joined.as_str())
    }

    /// The percent-decoded last path segment, ignoring the query string.
    pub fn file_name(&self) -> Option<String> {
        let path = self.path.split('?').next().unwrap_or_default();
        let segment = path.rsplit('/').next()?;

        let decoded = percent_decode_str(segment).decode_utf8_lossy().into_owned();
        (!decoded.is_empty()).then_some(decoded)
    }
}

impl fmt::Display for UrlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.authority(), self.path)
    }
}
