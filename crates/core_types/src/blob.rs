//! Transient content URLs for in-memory payloads (render documents, capture rasters).
//!
//! Every URL handed out by [`BlobRegistry::create`] keeps its bytes alive until
//! [`BlobRegistry::revoke`] is called. Callers own the revocation: a superseded
//! payload that is never revoked stays resident for the rest of the session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

const BLOB_ORIGIN: &str = "drift";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub mime: &'static str,
    pub bytes: Arc<[u8]>,
}

impl Blob {
    pub fn new(mime: &'static str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime,
            bytes: bytes.into(),
        }
    }

    pub fn html(markup: &str) -> Self {
        Self::new("text/html", markup.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobUrl(Url);

impl BlobUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for BlobUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// A blob paired with the URL that currently resolves to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    pub blob: Blob,
    pub url: BlobUrl,
}

#[derive(Debug)]
pub enum BlobError {
    InvalidUrl(String),
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::InvalidUrl(raw) => write!(f, "invalid blob url: {raw}"),
        }
    }
}

impl std::error::Error for BlobError {}

#[derive(Debug)]
pub struct BlobRegistry {
    next_id: u64,
    live: HashMap<BlobUrl, Blob>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            live: HashMap::new(),
        }
    }

    pub fn create(&mut self, blob: Blob) -> Result<StoredBlob, BlobError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let raw = format!("blob:{BLOB_ORIGIN}/{id}");
        let url = Url::parse(&raw).map_err(|_| BlobError::InvalidUrl(raw))?;
        let url = BlobUrl(url);
        self.live.insert(url.clone(), blob.clone());
        Ok(StoredBlob { blob, url })
    }

    /// Revokes `url`. Returns `false` when it was already revoked or never issued.
    pub fn revoke(&mut self, url: &BlobUrl) -> bool {
        self.live.remove(url).is_some()
    }

    pub fn resolve(&self, url: &BlobUrl) -> Option<&Blob> {
        self.live.get(url)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.live.values().map(Blob::len).sum()
    }
}

impl Default for BlobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
