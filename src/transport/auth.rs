//! Identity resolution at upgrade time.
//!
//! Authentication happens before any frame is processed. A connection whose
//! credentials are missing or invalid is still accepted, as an anonymous
//! connection that cannot subscribe.

use std::fmt;

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use tungstenite::handshake::server::Request;

use crate::client::Identity;

pub trait Authenticator: Send + Sync {
    /// Resolves the identity behind an upgrade request, `None` if anonymous.
    fn authenticate(&self, request: &Request) -> Option<Identity>;
}

/// Treats every connection as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn authenticate(&self, _request: &Request) -> Option<Identity> {
        None
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub exp: usize,
}

/// HS256 bearer tokens, read from the `Authorization` header or the `token`
/// query parameter.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    fn token(request: &Request) -> Option<&str> {
        let from_header = request
            .headers()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if from_header.is_some() {
            return from_header;
        }
        request
            .uri()
            .query()?
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, request: &Request) -> Option<Identity> {
        let token = Self::token(request)?;
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(Identity {
                id: data.claims.sub,
                name: data.claims.name,
            }),
            Err(e) => {
                debug!("Rejected bearer token: {e}");
                None
            }
        }
    }
}

impl fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtAuthenticator").finish_non_exhaustive()
    }
}
