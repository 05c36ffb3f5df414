use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap, HeaderName, HeaderValue, IF_MATCH};
use serde::{Deserialize, Serialize};

use crate::common::PresenceRecord;
use crate::error::RegistryError;

/// The shared document: `{ "users": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub users: Vec<PresenceRecord>,
}

/// A read of the registry together with the version token it was read at.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub users: Vec<PresenceRecord>,
    /// None when the backend does not version its documents.
    pub version: Option<String>,
}

/// Remote home of the presence directory. Writes replace the whole document.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot, RegistryError>;

    /// Replaces the document. With `expected` set, fails with `Conflict`
    /// when the stored version moved on.
    async fn replace(
        &self,
        users: Vec<PresenceRecord>,
        expected: Option<&str>,
    ) -> Result<(), RegistryError>;

    /// Creates an empty document after a `NotFound`.
    async fn create(&self) -> Result<(), RegistryError>;
}

/// Registry document served over plain HTTP GET/PUT.
pub struct HttpRegistry {
    url: String,
    http: reqwest::Client,
}

impl HttpRegistry {
    pub fn new(
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    default_headers.insert(name, value);
                }
                _ => log::warn!("Ignoring invalid registry header `{name}`"),
            }
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()?;
        Ok(Self {
            url: url.to_string(),
            http,
        })
    }

    async fn put(
        &self,
        document: &RegistryDocument,
        expected: Option<&str>,
    ) -> Result<(), RegistryError> {
        let mut request = self.http.put(&self.url).json(document);
        if let Some(version) = expected {
            request = request.header(IF_MATCH, version);
        }
        let resp = request.send().await?;
        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED => Err(RegistryError::Conflict),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound),
            status => Err(RegistryError::Status(status.as_u16())),
        }
    }
}

#[async_trait]
impl RegistryStore for HttpRegistry {
    async fn fetch(&self) -> Result<Snapshot, RegistryError> {
        let resp = self.http.get(&self.url).send().await?;
        match resp.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(RegistryError::NotFound),
            status => return Err(RegistryError::Status(status.as_u16())),
        }
        let version = resp
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await?;
        let document: RegistryDocument = if body.iter().all(u8::is_ascii_whitespace) {
            RegistryDocument::default()
        } else {
            serde_json::from_slice(&body)?
        };
        Ok(Snapshot {
            users: document.users,
            version,
        })
    }

    async fn replace(
        &self,
        users: Vec<PresenceRecord>,
        expected: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.put(&RegistryDocument { users }, expected).await
    }

    async fn create(&self) -> Result<(), RegistryError> {
        log::info!("Creating presence registry document at {}", self.url);
        self.put(&RegistryDocument::default(), None).await
    }
}

struct StoredDocument {
    users: Vec<PresenceRecord>,
    version: u64,
}

/// In-process registry. Versioned by default; `unversioned` behaves like a
/// plain overwrite backend that hands out no version tokens.
pub struct MemoryRegistry {
    document: Mutex<Option<StoredDocument>>,
    versioned: bool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::with_document(true, true)
    }

    pub fn unversioned() -> Self {
        Self::with_document(true, false)
    }

    /// A registry whose document does not exist yet.
    pub fn missing() -> Self {
        Self::with_document(false, true)
    }

    fn with_document(exists: bool, versioned: bool) -> Self {
        let document = exists.then(|| StoredDocument {
            users: Vec::new(),
            version: 0,
        });
        Self {
            document: Mutex::new(document),
            versioned,
        }
    }

    /// Current raw content, stale entries included.
    pub fn users(&self) -> Vec<PresenceRecord> {
        let guard = self.document.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|doc| doc.users.clone())
            .unwrap_or_default()
    }

    pub fn seed(&self, users: Vec<PresenceRecord>) {
        let mut guard = self.document.lock().unwrap_or_else(|e| e.into_inner());
        let version = guard.as_ref().map(|doc| doc.version + 1).unwrap_or(0);
        *guard = Some(StoredDocument { users, version });
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn fetch(&self) -> Result<Snapshot, RegistryError> {
        let guard = self.document.lock().unwrap_or_else(|e| e.into_inner());
        let doc = guard.as_ref().ok_or(RegistryError::NotFound)?;
        Ok(Snapshot {
            users: doc.users.clone(),
            version: self.versioned.then(|| doc.version.to_string()),
        })
    }

    async fn replace(
        &self,
        users: Vec<PresenceRecord>,
        expected: Option<&str>,
    ) -> Result<(), RegistryError> {
        let mut guard = self.document.lock().unwrap_or_else(|e| e.into_inner());
        let doc = guard.as_mut().ok_or(RegistryError::NotFound)?;
        if let Some(expected) = expected {
            if self.versioned && expected != doc.version.to_string() {
                return Err(RegistryError::Conflict);
            }
        }
        doc.users = users;
        doc.version += 1;
        Ok(())
    }

    async fn create(&self) -> Result<(), RegistryError> {
        let mut guard = self.document.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(StoredDocument {
                users: Vec::new(),
                version: 0,
            });
        }
        Ok(())
    }
}
