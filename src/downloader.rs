use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::batcher::{batches, build_order, DEFAULT_BATCH_SIZE};
use crate::cache::{sanitize_filename, CacheStore};
use crate::crawler::{base_url, CrawlReport, Crawler};
use crate::fetcher::Fetcher;
use crate::pdf_builder::PdfBuilder;

pub const DEFAULT_OUT_DIR: &str = "all_wiki";
pub const DEFAULT_USER_AGENT: &str = "WikiToPDF/3.0";

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Root directory holding the per-wiki cache and PDF folders.
    pub out_dir: PathBuf,
    pub batch_size: usize,
    pub timeout: Duration,
    pub user_agent: String,
    /// Build PDFs from whatever is cached without touching the network.
    pub skip_crawl: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            skip_crawl: false,
        }
    }
}

/// Where one wiki's files live under the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLayout {
    /// `<out>/<host>_txt`
    pub cache_dir: PathBuf,
    /// `<out>/<host>_wiki_PDF`
    pub pdf_dir: PathBuf,
}

impl WikiLayout {
    pub fn for_wiki(out_dir: &std::path::Path, base: &Url) -> Self {
        let host = match (base.host_str(), base.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => "wiki".to_string(),
        };
        let host = sanitize_filename(&host);
        Self {
            cache_dir: out_dir.join(format!("{host}_txt")),
            pdf_dir: out_dir.join(format!("{host}_wiki_PDF")),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    /// Absent when the crawl was skipped.
    pub crawl: Option<CrawlReport>,
    pub pdfs: Vec<PathBuf>,
}

/// Crawls a wiki into the text cache, then renders the cache into PDFs.
pub struct Downloader {
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, target_url: &str) -> Result<RunSummary> {
        info!("Visiting \"{}\"", target_url.green());

        let base = base_url(target_url)?;
        let layout = WikiLayout::for_wiki(&self.config.out_dir, &base);
        let store = CacheStore::open(&layout.cache_dir)
            .await
            .with_context(|| format!("Failed to open cache at {}", layout.cache_dir.display()))?;
        info!("Caching page text in {}", layout.cache_dir.display().to_string().blue());

        let mut summary = RunSummary::default();

        let discovered = if self.config.skip_crawl {
            info!("Skipping crawl, building from cache only");
            Vec::new()
        } else {
            let fetcher = Fetcher::new(&self.config.user_agent, self.config.timeout)
                .context("Failed to create HTTP client")?;
            let report = Crawler::new(&fetcher, &store)
                .crawl(target_url)
                .await
                .context("Crawl aborted")?;
            report.log_summary();
            let discovered = report.discovered.clone();
            summary.crawl = Some(report);
            discovered
        };

        let cached = store.ids().await.context("Failed to list cached pages")?;
        let order = build_order(&discovered, &cached);
        if order.is_empty() {
            warn!("No pages found. Nothing to put into PDFs.");
            return Ok(summary);
        }

        let batches = batches(&order, self.config.batch_size);
        info!(
            "Building {} PDF(s) from {} cached pages",
            batches.len().to_string().green(),
            order.len().to_string().green()
        );

        let builder = PdfBuilder::new(&store).await?;
        summary.pdfs = builder
            .build_all(&batches, &layout.pdf_dir)
            .await
            .context("Failed to build PDFs")?;

        info!(
            "Successfully created {} PDF(s) in {}",
            summary.pdfs.len(),
            layout.pdf_dir.display().to_string().green()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::WikiPage;
    use crate::pdf_builder::chapter_titles;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(out_dir: &std::path::Path) -> DownloaderConfig {
        DownloaderConfig {
            out_dir: out_dir.to_path_buf(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn layout_is_named_after_host() {
        let out = std::path::Path::new("all_wiki");
        let base = Url::parse("https://terraria.fandom.com/").unwrap();
        let layout = WikiLayout::for_wiki(out, &base);
        assert_eq!(layout.cache_dir, out.join("terraria.fandom.com_txt"));
        assert_eq!(layout.pdf_dir, out.join("terraria.fandom.com_wiki_PDF"));

        let layout = WikiLayout::for_wiki(out, &Url::parse("http://127.0.0.1:8080/").unwrap());
        assert_eq!(layout.cache_dir, out.join("127.0.0.1_8080_txt"));
    }

    #[tokio::test]
    async fn seed_to_pdf_end_to_end() {
        let server = MockServer::start().await;
        let index = |links: &[&str], next: &str| {
            let items: String = links
                .iter()
                .map(|l| format!(r#"<li><a href="/wiki/{l}">{l}</a></li>"#))
                .collect();
            format!(r#"<div class="mw-allpages-body"><ul>{items}</ul></div>{next}"#)
        };
        Mock::given(method("GET"))
            .and(path("/wiki/Special:AllPages"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index(
                &["Zombie", "Copper_Sword"],
                r#"<a href="/w/index.php?title=Special:AllPages&amp;from=Slime">Next page (Slime)</a>"#,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/w/index.php"))
            .and(query_param("from", "Slime"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index(&["Slime"], "")))
            .mount(&server)
            .await;
        let articles = [("Zombie", "Zombie"), ("Copper_Sword", "Copper Sword"), ("Slime", "Slime")];
        for (slug, title) in articles {
            Mock::given(method("GET"))
                .and(path(format!("/wiki/{slug}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                    r#"<h1 id="firstHeading">{title}</h1><div id="mw-content-text"><p>{title} facts.</p></div>"#
                )))
                .expect(1)
                .mount(&server)
                .await;
        }

        let tmp = TempDir::new().unwrap();
        let summary = Downloader::new(config(tmp.path()))
            .run(&format!("{}/wiki/Zombie", server.uri()))
            .await
            .unwrap();

        let report = summary.crawl.unwrap();
        assert_eq!(report.downloaded, 3);
        assert!(report.failed.is_empty());
        assert_eq!(summary.pdfs.len(), 1);
        assert_eq!(
            chapter_titles(&summary.pdfs[0]).await.unwrap(),
            vec!["Zombie", "Copper Sword", "Slime"]
        );
        let name = summary.pdfs[0].file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, "001_zombie_to_slime.pdf");
    }

    #[tokio::test]
    async fn skip_crawl_builds_from_cache() {
        let tmp = TempDir::new().unwrap();
        let base = Url::parse("https://wiki.example/").unwrap();
        let layout = WikiLayout::for_wiki(tmp.path(), &base);
        let store = CacheStore::open(&layout.cache_dir).await.unwrap();
        for i in 1..=3 {
            store
                .write(&WikiPage {
                    id: format!("Page {i}"),
                    title: format!("Page {i}"),
                    url: format!("https://wiki.example/wiki/Page_{i}"),
                    text: format!("Body {i}"),
                })
                .await
                .unwrap();
        }

        let summary = Downloader::new(DownloaderConfig {
            batch_size: 2,
            skip_crawl: true,
            ..config(tmp.path())
        })
        .run("https://wiki.example/wiki/Page_1")
        .await
        .unwrap();

        assert!(summary.crawl.is_none());
        assert_eq!(summary.pdfs.len(), 2);
        assert!(summary.pdfs.iter().all(|p| p.starts_with(&layout.pdf_dir)));
        assert_eq!(chapter_titles(&summary.pdfs[1]).await.unwrap(), vec!["Page 3"]);
    }

    #[tokio::test]
    async fn rerun_over_grown_cache_leaves_one_pdf_per_batch() {
        let tmp = TempDir::new().unwrap();
        let base = Url::parse("https://wiki.example/").unwrap();
        let layout = WikiLayout::for_wiki(tmp.path(), &base);
        let store = CacheStore::open(&layout.cache_dir).await.unwrap();
        let downloader = Downloader::new(DownloaderConfig {
            skip_crawl: true,
            ..config(tmp.path())
        });

        for i in 1..=3 {
            store
                .write(&WikiPage {
                    id: format!("Page {i}"),
                    title: format!("Page {i}"),
                    url: format!("https://wiki.example/wiki/Page_{i}"),
                    text: format!("Body {i}"),
                })
                .await
                .unwrap();
            if i >= 2 {
                downloader.run("https://wiki.example/wiki/Page_1").await.unwrap();
            }
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&layout.pdf_dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            files.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(files, vec!["001_page-1_to_page-3.pdf"]);
    }

    #[tokio::test]
    async fn invalid_seed_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = Downloader::new(config(tmp.path()))
            .run("definitely not a url")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("base URL"));
    }
}
