use std::path::PathBuf;
use thiserror::Error;

/// Failure to download or parse a single wiki page.
///
/// Recoverable: the crawler logs it, skips the page and carries on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} has no {region} region")]
    MissingRegion { url: String, region: &'static str },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("page \"{0}\" is not in the cache")]
    NotFound(String),

    #[error("cache I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache journal: {0}")]
    Journal(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that end a crawl. Per-page failures never show up here.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("could not load the page index at {url}: {source}")]
    IndexDiscovery {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("could not derive a wiki base URL from {0}")]
    BaseUrl(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Error)]
pub enum PdfError {
    /// A batch named a page the cache does not hold. Batches are only ever
    /// built from cached ids, so this is a sequencing bug.
    #[error("page \"{0}\" was batched but is missing from the cache")]
    MissingCache(String),

    #[error(transparent)]
    Cache(CacheError),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("failed to serialize PDF: {0}")]
    Serialize(String),

    #[error("failed to write PDF {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<CacheError> for PdfError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound(id) => Self::MissingCache(id),
            other => Self::Cache(other),
        }
    }
}
