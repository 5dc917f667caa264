//! Client identity resolution from request headers.

use axum::http::{HeaderMap, HeaderName};
use std::fmt;

/// Opaque, case-sensitive identifier of the calling client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads the client identity from a configured header.
///
/// Requests without the header, with a blank value or with a value that is
/// not visible ASCII resolve to the anonymous identity. Resolution never
/// fails.
#[derive(Debug, Clone)]
pub struct ClientResolver {
    header: HeaderName,
    anonymous: ClientIdentity,
}

impl ClientResolver {
    pub fn new(header: HeaderName, anonymous: impl Into<String>) -> Self {
        Self {
            header,
            anonymous: ClientIdentity::new(anonymous),
        }
    }

    /// Name of the header carrying the client id.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// The identity assigned to unidentified clients.
    pub fn anonymous(&self) -> &ClientIdentity {
        &self.anonymous
    }

    /// Resolve the identity of the client that sent `headers`.
    pub fn resolve(&self, headers: &HeaderMap) -> ClientIdentity {
        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ClientIdentity::new)
            .unwrap_or_else(|| self.anonymous.clone())
    }
}
