use colored::*;
use futures_util::stream::{self, Stream, TryStreamExt};
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::error::{CrawlError, FetchError};
use crate::fetcher::{page_id_from_url, Fetcher};

const ALL_PAGES_PATH: &str = "wiki/Special:AllPages";

static ALL_PAGES_BODY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.mw-allpages-body")
        .expect("BUG: hardcoded CSS selector 'div.mw-allpages-body' is invalid")
});

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").expect("BUG: hardcoded CSS selector 'a[href]' is invalid")
});

/// Scheme, host and port of `input`, with an empty path.
pub fn base_url(input: &str) -> Result<Url, CrawlError> {
    let mut url = Url::parse(input).map_err(|_| CrawlError::BaseUrl(input.to_string()))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(CrawlError::BaseUrl(input.to_string()));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// The `Special:AllPages` index for a wiki base URL.
pub fn all_pages_url(base: &Url) -> Result<Url, CrawlError> {
    base.join(ALL_PAGES_PATH)
        .map_err(|_| CrawlError::BaseUrl(base.to_string()))
}

/// Page links and the "Next page" link found on one index page.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexPage {
    pub links: Vec<Url>,
    pub next: Option<Url>,
}

pub fn parse_index(base: &Url, index_url: &Url, html: &str) -> Result<IndexPage, FetchError> {
    let document = Html::parse_document(html);
    let body = document
        .select(&ALL_PAGES_BODY_SELECTOR)
        .next()
        .ok_or_else(|| FetchError::MissingRegion {
            url: index_url.to_string(),
            region: "div.mw-allpages-body",
        })?;

    let links = body
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .collect();

    let next = document
        .select(&LINK_SELECTOR)
        .find(|a| a.text().collect::<String>().trim().starts_with("Next page"))
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| base.join(href).ok());

    Ok(IndexPage { links, next })
}

/// Walks the paginated index one page at a time, handing out page links
/// as they are found.
struct IndexCursor<'a> {
    fetcher: &'a Fetcher,
    base: Url,
    next: Option<Url>,
    pending: VecDeque<Url>,
    seen_links: HashSet<Url>,
    seen_index: HashSet<Url>,
}

impl<'a> IndexCursor<'a> {
    fn new(fetcher: &'a Fetcher, base: Url, start: Url) -> Self {
        Self {
            fetcher,
            base,
            next: Some(start),
            pending: VecDeque::new(),
            seen_links: HashSet::new(),
            seen_index: HashSet::new(),
        }
    }

    async fn next_link(&mut self) -> Result<Option<Url>, CrawlError> {
        loop {
            if let Some(link) = self.pending.pop_front() {
                return Ok(Some(link));
            }
            let Some(index_url) = self.next.take() else {
                return Ok(None);
            };
            if !self.seen_index.insert(index_url.clone()) {
                warn!("Index page {} already visited, stopping pagination", index_url);
                return Ok(None);
            }

            let first = self.seen_index.len() == 1;
            let page = match self.load(&index_url).await {
                Ok(page) => page,
                Err(source) if first => {
                    return Err(CrawlError::IndexDiscovery {
                        url: index_url.to_string(),
                        source,
                    })
                }
                Err(e) => {
                    warn!("Stopping at index page {}: {}", index_url, e);
                    return Ok(None);
                }
            };

            debug!("Index page {} lists {} links", index_url, page.links.len());
            for link in page.links {
                if self.seen_links.insert(link.clone()) {
                    self.pending.push_back(link);
                }
            }
            if let Some(next) = &page.next {
                info!("Found next page: {}", next.as_str().green());
            }
            self.next = page.next;
        }
    }

    async fn load(&self, index_url: &Url) -> Result<IndexPage, FetchError> {
        let html = self.fetcher.get_html(index_url).await?;
        parse_index(&self.base, index_url, &html)
    }
}

/// Lazily yields every page link of the wiki, following "Next page" links
/// until there are none. Only the first index page is mandatory.
pub fn page_links<'a>(
    fetcher: &'a Fetcher,
    base: &Url,
) -> Result<impl Stream<Item = Result<Url, CrawlError>> + 'a, CrawlError> {
    let start = all_pages_url(base)?;
    info!("Starting to scrape from: {}", start.as_str().green());
    let cursor = IndexCursor::new(fetcher, base.clone(), start);

    Ok(stream::try_unfold(cursor, |mut cursor| async move {
        let link = cursor.next_link().await?;
        Ok::<_, CrawlError>(link.map(|link| (link, cursor)))
    }))
}

#[derive(Debug)]
pub struct PageFailure {
    pub url: String,
    pub error: FetchError,
}

/// Outcome of one crawl.
#[derive(Debug, Default)]
pub struct CrawlReport {
    /// Page ids in discovery order, without duplicates.
    pub discovered: Vec<String>,
    pub downloaded: usize,
    pub already_cached: usize,
    pub failed: Vec<PageFailure>,
}

impl CrawlReport {
    pub fn log_summary(&self) {
        info!(
            "Crawl finished: {} discovered, {} downloaded, {} already cached, {} failed",
            self.discovered.len().to_string().green(),
            self.downloaded.to_string().green(),
            self.already_cached.to_string().blue(),
            if self.failed.is_empty() {
                "0".green()
            } else {
                self.failed.len().to_string().red()
            }
        );
        for failure in &self.failed {
            warn!("  failed: {} ({})", failure.url, failure.error);
        }
    }
}

/// Fills the cache with every page of a wiki, one request at a time.
pub struct Crawler<'a> {
    fetcher: &'a Fetcher,
    store: &'a CacheStore,
}

impl<'a> Crawler<'a> {
    pub fn new(fetcher: &'a Fetcher, store: &'a CacheStore) -> Self {
        Self { fetcher, store }
    }

    /// Crawls the wiki that `seed` belongs to.
    ///
    /// The page written last by a previous run is downloaded again before
    /// anything else, since that run may have died while writing it. Every
    /// other page already in the cache is skipped. Page failures land in
    /// the report; only index discovery and cache I/O abort the crawl.
    pub async fn crawl(&self, seed: &str) -> Result<CrawlReport, CrawlError> {
        let base = base_url(seed)?;
        info!("Wiki base URL: {}", base.as_str().green());

        let mut report = CrawlReport::default();

        let revalidated = match self.store.last_written().await? {
            Some(last) => {
                info!("Re-downloading last written page \"{}\"", last.id.yellow());
                match Url::parse(&last.url) {
                    Ok(url) => self.fetch_and_store(&url, &mut report).await?,
                    Err(source) => report.failed.push(PageFailure {
                        url: last.url.clone(),
                        error: FetchError::InvalidUrl {
                            url: last.url.clone(),
                            source,
                        },
                    }),
                }
                Some(last.id)
            }
            None => None,
        };

        let links = page_links(self.fetcher, &base)?;
        futures_util::pin_mut!(links);

        let mut seen_ids = HashSet::new();
        while let Some(link) = links.try_next().await? {
            let id = page_id_from_url(&link);
            if !seen_ids.insert(id.clone()) {
                continue;
            }
            report.discovered.push(id.clone());
            let position = report.discovered.len();

            if revalidated.as_deref() == Some(id.as_str()) {
                continue;
            }
            if self.store.has(&id).await {
                debug!("[{}] Loading from cache: {}", position, id);
                report.already_cached += 1;
                continue;
            }

            info!("[{}] Downloading: {}", position, link.as_str().green());
            self.fetch_and_store(&link, &mut report).await?;
        }

        Ok(report)
    }

    async fn fetch_and_store(&self, url: &Url, report: &mut CrawlReport) -> Result<(), CrawlError> {
        match self.fetcher.fetch(url).await {
            Ok(page) => {
                self.store.write(&page).await?;
                report.downloaded += 1;
            }
            Err(error) => {
                warn!("Error downloading page {}: {}", url, error);
                report.failed.push(PageFailure {
                    url: url.to_string(),
                    error,
                });
            }
        }
        Ok(())
    }
}
