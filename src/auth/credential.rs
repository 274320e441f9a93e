//! Session credential material and its durable slot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::auth::session::Identity;
use crate::error::{SessionError, SessionResult};
use crate::storage::KeyValueStore;

/// Name of the cookie carrying the anti-forgery token.
pub const CSRF_COOKIE: &str = "csrf_token";

const CREDENTIAL_SLOT: &str = "session:credential";
const IDENTITY_SLOT: &str = "session:identity";

/// Opaque session token plus its CSRF token.
///
/// The session token is whatever cookies the backend issued alongside the
/// CSRF cookie (access and refresh tokens); the layer never looks inside.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    session: BTreeMap<String, String>,
    csrf_token: String,
    #[serde(skip)]
    generation: u64,
}

impl Credential {
    /// Build a credential from the cookies of a login response.
    pub fn from_cookies(cookies: &[(String, String)]) -> SessionResult<Self> {
        let mut credential = Self {
            session: BTreeMap::new(),
            csrf_token: String::new(),
            generation: 0,
        };
        credential.merge(cookies);
        if credential.csrf_token.is_empty() {
            return Err(SessionError::CsrfMissing);
        }
        Ok(credential)
    }

    /// The credential after a refresh response. Cookies the backend did not
    /// re-issue are kept, including the previous CSRF token.
    pub fn rotated(&self, cookies: &[(String, String)]) -> Self {
        let mut next = self.clone();
        next.merge(cookies);
        next
    }

    fn merge(&mut self, cookies: &[(String, String)]) {
        for (name, value) in cookies {
            if name == CSRF_COOKIE {
                if !value.is_empty() {
                    self.csrf_token = value.clone();
                }
            } else if value.is_empty() {
                self.session.remove(name);
            } else {
                self.session.insert(name.clone(), value.clone());
            }
        }
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Monotonic counter assigned when the coordinator installs a credential.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.session
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .chain(std::iter::once(format!("{}={}", CSRF_COOKIE, self.csrf_token)))
            .collect::<Vec<_>>()
            .join("; ")
    }

    #[cfg(test)]
    pub(crate) fn for_tests(csrf: &str) -> Self {
        Self {
            session: BTreeMap::from([("access_token".to_string(), format!("access-{}", csrf))]),
            csrf_token: csrf.to_string(),
            generation: 0,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("session", &format_args!("<{} cookies>", self.session.len()))
            .field("csrf_token", &"<redacted>")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Durable slots for the credential pair and the identity it belongs to.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save_credential(&self, credential: &Credential) -> SessionResult<()> {
        self.store
            .put(CREDENTIAL_SLOT, serde_json::to_string(credential)?)
    }

    /// Load the persisted credential. A malformed slot is removed and reported
    /// as absent.
    pub fn load_credential(&self) -> Option<Credential> {
        self.load(CREDENTIAL_SLOT)
    }

    pub fn save_identity(&self, identity: &Identity) -> SessionResult<()> {
        self.store.put(IDENTITY_SLOT, serde_json::to_string(identity)?)
    }

    pub fn load_identity(&self) -> Option<Identity> {
        self.load(IDENTITY_SLOT)
    }

    pub fn clear_credential(&self) -> SessionResult<()> {
        self.store.remove(CREDENTIAL_SLOT)
    }

    pub fn clear(&self) -> SessionResult<()> {
        self.store.remove(CREDENTIAL_SLOT)?;
        self.store.remove(IDENTITY_SLOT)
    }

    fn load<T: serde::de::DeserializeOwned>(&self, slot: &str) -> Option<T> {
        let raw = match self.store.get(slot) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(slot, error = %e, "Failed to read session slot");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = SessionError::CacheCorrupt(e.to_string());
                tracing::warn!(slot, error = %err, "Discarding corrupt session slot");
                if let Err(e) = self.store.remove(slot) {
                    tracing::warn!(slot, error = %e, "Failed to remove corrupt session slot");
                }
                None
            }
        }
    }
}
