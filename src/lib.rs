//! # wiki2pdf
//!
//! A CLI utility to download a whole MediaWiki site and turn it into PDF files
//! for offline reading or for feeding to an AI assistant.
//!
//! ## Pipeline
//!
//! - Crawl the wiki's `Special:AllPages` index, following "Next page" links
//! - Cache each page's text on disk, skipping pages already cached
//! - Group cached pages into batches of 100 and render one PDF per batch,
//!   one chapter per wiki page
//!
//! Re-running after an interruption resumes where the last run stopped; the
//! last page written is always downloaded again.
//!
//! ## Usage
//!
//! ```bash
//! wiki2pdf https://terraria.fandom.com/wiki/Terraria_Wiki
//! ```

mod batcher;
mod cache;
mod crawler;
mod downloader;
mod error;
mod fetcher;
mod pdf_builder;

pub use batcher::{batches, build_order, PageBatch, DEFAULT_BATCH_SIZE};
pub use cache::{sanitize_filename, CacheStore, JournalRecord};
pub use crawler::{
    all_pages_url, base_url, page_links, parse_index, CrawlReport, Crawler, IndexPage, PageFailure,
};
pub use downloader::{
    Downloader, DownloaderConfig, RunSummary, WikiLayout, DEFAULT_OUT_DIR, DEFAULT_USER_AGENT,
};
pub use error::{CacheError, CrawlError, FetchError, PdfError};
pub use fetcher::{page_id_from_url, parse_page, Fetcher, WikiPage};
pub use pdf_builder::{chapter_titles, PdfBuilder};
