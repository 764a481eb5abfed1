use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

static CONTENT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("#mw-content-text")
        .expect("BUG: hardcoded CSS selector '#mw-content-text' is invalid")
});

static HEADING_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("#firstHeading")
        .expect("BUG: hardcoded CSS selector '#firstHeading' is invalid")
});

/// Wrapper elements that only ever hold navigation or page furniture.
const STRIPPED_TAGS: &[&str] = &["div", "table", "ul", "ol", "span", "img", "figure"];
const STRIPPED_CLASSES: &[&str] = &[
    "toc",
    "navbox",
    "infobox",
    "reflist",
    "mw-references-columns",
    "mw-editsection",
    "gallery",
    "thumb",
];

const PARAGRAPH_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "table", "ul", "ol", "dl",
];
const LINE_TAGS: &[&str] = &["br", "li", "tr", "dt", "dd", "div", "figcaption"];

/// One downloaded wiki page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    /// Normalized title taken from the URL; also the cache key.
    pub id: String,
    pub title: String,
    pub url: String,
    pub text: String,
}

/// Plain HTTP client for wiki pages. One request per call, no retries.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// A zero `timeout` means requests never time out.
    pub fn new(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let mut builder = Client::builder().user_agent(user_agent);
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Downloads `url` and returns the body of a 2xx response.
    pub async fn get_html(&self, url: &Url) -> Result<String, FetchError> {
        let network = |source| FetchError::Network {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url.clone()).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(network)?;
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }

    /// Downloads one wiki page and extracts its title and main text.
    pub async fn fetch(&self, url: &Url) -> Result<WikiPage, FetchError> {
        let html = self.get_html(url).await?;
        parse_page(url, &html)
    }
}

/// Extracts title and body text from a rendered MediaWiki article.
pub fn parse_page(url: &Url, html: &str) -> Result<WikiPage, FetchError> {
    let document = Html::parse_document(html);
    let id = page_id_from_url(url);

    let content = document
        .select(&CONTENT_SELECTOR)
        .next()
        .ok_or_else(|| FetchError::MissingRegion {
            url: url.to_string(),
            region: "#mw-content-text",
        })?;

    let title = document
        .select(&HEADING_SELECTOR)
        .next()
        .map(|heading| collapse_whitespace(&heading.text().collect::<String>()))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| id.clone());

    let mut raw = String::new();
    collect_text(content, &mut raw);

    Ok(WikiPage {
        id,
        title,
        url: url.to_string(),
        text: normalize_text(&raw),
    })
}

/// Derives the page id from a wiki URL: `/wiki/Main_Page` and
/// `/index.php?title=Main_Page` both give `Main Page`.
pub fn page_id_from_url(url: &Url) -> String {
    let raw = url
        .query_pairs()
        .find(|(key, _)| key == "title")
        .map(|(_, value)| value.into_owned())
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    urlencoding::decode(segment)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| segment.to_string())
                })
        })
        .unwrap_or_else(|| "index".to_string());

    raw.replace('_', " ").trim().to_string()
}

fn is_stripped(element: &ElementRef) -> bool {
    let value = element.value();
    match value.name() {
        "script" | "style" => true,
        name if STRIPPED_TAGS.contains(&name) => {
            value.classes().any(|class| STRIPPED_CLASSES.contains(&class))
        }
        _ => false,
    }
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_inline(out, text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_stripped(&child) {
                    continue;
                }
                let name = child.value().name();
                let breaks = if PARAGRAPH_TAGS.contains(&name) {
                    2
                } else if LINE_TAGS.contains(&name) {
                    1
                } else {
                    0
                };
                ensure_break(out, breaks);
                collect_text(child, out);
                ensure_break(out, breaks);
            }
            _ => {}
        }
    }
}

/// Appends HTML text with its whitespace folded the way a browser would.
fn push_inline(out: &mut String, text: &str) {
    let mut folded = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                folded.push(' ');
            }
            in_space = true;
        } else {
            folded.push(c);
            in_space = false;
        }
    }

    let at_line_start = out.is_empty() || out.ends_with('\n');
    let folded = if at_line_start {
        folded.trim_start()
    } else {
        folded.as_str()
    };
    out.push_str(folded);
}

/// Makes `out` end with at least `count` newlines, dropping trailing spaces.
fn ensure_break(out: &mut String, count: usize) {
    if count == 0 {
        return;
    }
    while out.ends_with(' ') {
        out.pop();
    }
    if out.is_empty() {
        return;
    }
    let present = out.chars().rev().take_while(|&c| c == '\n').count();
    for _ in present..count {
        out.push('\n');
    }
}

/// Trims every line and squeezes runs of blank lines down to one, so
/// paragraphs end up separated by exactly one empty line.
fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = true;
    for line in raw.lines() {
        let line = collapse_whitespace(line);
        if line.is_empty() {
            if !blank_run {
                out.push('\n');
                blank_run = true;
            }
            continue;
        }
        out.push_str(&line);
        out.push('\n');
        blank_run = false;
    }
    out.trim_end().to_string()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
