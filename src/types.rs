//! Core types for crawl-dl

use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque identifier for a crawlable item, as published by the extractor
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Description of one outbound call
///
/// Requests are immutable once submitted to the dispatcher. Only idempotent
/// GETs are issued by this system, so the method is implicit.
#[derive(Clone, Debug)]
pub struct Request {
    url: Url,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Create a GET request for the given URL
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    /// Add a header to the request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The target URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Result of one executed transport call
///
/// A `Response` always carries a usable status and body; transport failures
/// surface as the `Err` arm of the dispatch instead. Ownership transfers to
/// the caller that submitted the matching [`Request`].
#[derive(Clone, Debug)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Final URL after redirects; next-page references resolve against this
    pub final_url: Url,
    /// Content-Type reported by the upstream, if any
    pub content_type: Option<String>,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl Response {
    /// Returns true for 2xx status codes
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Downloaded payload handed to the sink for persistence
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Raw payload bytes
    pub data: Vec<u8>,
    /// Content-Type reported by the upstream, if any
    pub content_type: Option<String>,
    /// The URL the payload was fetched from
    pub source: Url,
}

/// Event emitted during crawl and download lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A listing page was fetched and extracted
    PageFetched {
        /// The page URL
        url: String,
        /// Number of item identifiers found on the page
        ids_found: usize,
    },

    /// An item identifier was published to the download queue
    ItemDiscovered {
        /// The discovered identifier
        id: ItemId,
    },

    /// An item was fetched and persisted
    ItemCompleted {
        /// The completed identifier
        id: ItemId,
    },

    /// An item was skipped because its artifact already exists
    ItemSkipped {
        /// The skipped identifier
        id: ItemId,
    },

    /// An item could not be fetched or persisted; the fanout continues
    ItemFailed {
        /// The failed identifier
        id: ItemId,
        /// Why the item failed
        reason: String,
    },

    /// A seed traversal finished (successfully or not) and the fanout drained
    CrawlFinished {
        /// The seed URL
        seed: String,
        /// Pages fetched during traversal
        pages_fetched: u32,
        /// Identifiers published during traversal
        ids_published: u64,
    },

    /// The downloader is shutting down
    Shutdown,
}
