use colored::*;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use slug::slugify;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::batcher::PageBatch;
use crate::cache::CacheStore;
use crate::error::PdfError;

// US Letter, in points.
const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const MARGIN: i64 = 72;

const MAX_SLUG_LEN: usize = 60;

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    font: &'static str,
    size: i64,
    leading: i64,
    /// Characters per line; Helvetica averages about half an em per glyph.
    wrap: usize,
}

const HEADING: TextStyle = TextStyle {
    font: "F2",
    size: 18,
    leading: 22,
    wrap: 50,
};

const BODY: TextStyle = TextStyle {
    font: "F1",
    size: 11,
    leading: 14,
    wrap: 85,
};

/// Lays lines out top to bottom, starting a new page when one fills up.
#[derive(Default)]
struct PageComposer {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: i64,
}

impl PageComposer {
    fn new() -> Self {
        Self {
            y: PAGE_HEIGHT - MARGIN,
            ..Default::default()
        }
    }

    /// Starts a fresh page and returns its position in the document.
    fn start_chapter(&mut self) -> usize {
        if self.current.is_empty() {
            self.y = PAGE_HEIGHT - MARGIN;
        } else {
            self.break_page();
        }
        self.pages.len()
    }

    fn break_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn line(&mut self, style: TextStyle, text: &str) {
        if self.y - style.leading < MARGIN {
            self.break_page();
        }
        self.y -= style.leading;
        self.current.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![style.font.into(), style.size.into()]),
            Operation::new("Td", vec![MARGIN.into(), self.y.into()]),
            Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn gap(&mut self, points: i64) {
        // a gap never carries over onto the next page
        self.y = (self.y - points).max(MARGIN);
    }

    fn paragraph(&mut self, style: TextStyle, text: &str) {
        for line in wrap(text, style.wrap) {
            self.line(style, &line);
        }
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

struct Chapter {
    title: String,
    first_page: usize,
}

/// Renders batches of cached pages into PDFs, one chapter per page.
pub struct PdfBuilder<'a> {
    store: &'a CacheStore,
    titles: HashMap<String, String>,
}

impl<'a> PdfBuilder<'a> {
    pub async fn new(store: &'a CacheStore) -> Result<Self, PdfError> {
        let titles = store.titles().await?;
        Ok(Self { store, titles })
    }

    fn title_of<'b>(&'b self, id: &'b str) -> &'b str {
        self.titles.get(id).map(String::as_str).unwrap_or(id)
    }

    /// `007_first-page_to_last-page.pdf`
    pub fn file_name(batch: &PageBatch) -> String {
        let part = |id: Option<&str>| {
            let mut slug = slugify(id.unwrap_or_default());
            slug.truncate(MAX_SLUG_LEN);
            let slug = slug.trim_end_matches('-').to_string();
            if slug.is_empty() {
                "page".to_string()
            } else {
                slug
            }
        };
        format!(
            "{:03}_{}_to_{}.pdf",
            batch.index,
            part(batch.first()),
            part(batch.last())
        )
    }

    /// Writes one PDF for `batch` at `output`.
    pub async fn build(&self, batch: &PageBatch, output: &Path) -> Result<(), PdfError> {
        let mut composer = PageComposer::new();
        let mut chapters = Vec::with_capacity(batch.ids.len());

        for id in &batch.ids {
            let text = self.store.read(id).await?;
            let title = self.title_of(id).to_string();

            let first_page = composer.start_chapter();
            composer.paragraph(HEADING, &title);
            composer.gap(18);
            for paragraph in text.split("\n\n") {
                let paragraph = paragraph.trim();
                if paragraph.is_empty() {
                    continue;
                }
                composer.paragraph(BODY, paragraph);
                composer.gap(8);
            }

            chapters.push(Chapter { title, first_page });
        }

        let mut doc = assemble(composer.finish(), &chapters)?;
        doc.compress();

        let mut data = Vec::new();
        doc.save_to(&mut data)
            .map_err(|e| PdfError::Serialize(e.to_string()))?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await.map_err(|source| PdfError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(output, data).await.map_err(|source| PdfError::Io {
            path: output.to_path_buf(),
            source,
        })?;

        debug!("Wrote {} chapters to {}", chapters.len(), output.display());
        Ok(())
    }

    /// Builds every batch into `out_dir`, one file per batch, in order.
    ///
    /// PDFs left in `out_dir` by earlier runs that this run does not produce
    /// are deleted first, so the folder only ever holds the current batches.
    pub async fn build_all(
        &self,
        batches: &[PageBatch],
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, PdfError> {
        let names: Vec<String> = batches.iter().map(Self::file_name).collect();
        remove_stale_pdfs(out_dir, &names).await?;

        let mut written = Vec::with_capacity(batches.len());
        for (batch, name) in batches.iter().zip(&names) {
            let path = out_dir.join(name);
            info!(
                "Creating PDF {}/{}: {}",
                batch.index,
                batches.len(),
                path.display().to_string().blue()
            );
            self.build(batch, &path).await?;
            written.push(path);
        }
        Ok(written)
    }
}

async fn remove_stale_pdfs(out_dir: &Path, keep: &[String]) -> Result<(), PdfError> {
    let io = |source: std::io::Error| PdfError::Io {
        path: out_dir.to_path_buf(),
        source,
    };
    let mut entries = match fs::read_dir(out_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io(e)),
    };

    while let Some(entry) = entries.next_entry().await.map_err(io)? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("pdf") {
            continue;
        }
        let name = entry.file_name();
        if keep.iter().any(|k| name.to_str() == Some(k.as_str())) {
            continue;
        }
        info!("Removing outdated PDF {}", path.display().to_string().yellow());
        fs::remove_file(&path).await.map_err(|source| PdfError::Io {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

fn assemble(pages: Vec<Vec<Operation>>, chapters: &[Chapter]) -> Result<Document, PdfError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let body_font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let heading_font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => body_font,
            "F2" => heading_font,
        },
    });

    let mut page_ids = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_ids.len() as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if let Some(outlines_id) = add_outline(&mut doc, chapters, &page_ids) {
        catalog.set("Outlines", outlines_id);
        catalog.set("PageMode", "UseOutlines");
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

/// One top-level bookmark per chapter, linked in chapter order.
fn add_outline(
    doc: &mut Document,
    chapters: &[Chapter],
    page_ids: &[ObjectId],
) -> Option<ObjectId> {
    if chapters.is_empty() || page_ids.is_empty() {
        return None;
    }

    let outlines_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = chapters.iter().map(|_| doc.new_object_id()).collect();

    for (i, chapter) in chapters.iter().enumerate() {
        // a chapter that drew nothing at the very end points at the last page
        let page = page_ids[chapter.first_page.min(page_ids.len() - 1)];
        let mut item = dictionary! {
            "Title" => text_string(&chapter.title),
            "Parent" => outlines_id,
            "Dest" => vec![page.into(), "Fit".into()],
        };
        if i > 0 {
            item.set("Prev", item_ids[i - 1]);
        }
        if let Some(&next) = item_ids.get(i + 1) {
            item.set("Next", next);
        }
        doc.objects.insert(item_ids[i], Object::Dictionary(item));
    }

    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => item_ids[0],
            "Last" => item_ids[item_ids.len() - 1],
            "Count" => item_ids.len() as i64,
        }),
    );
    Some(outlines_id)
}

/// Reads back the chapter headings of a PDF produced by [`PdfBuilder`], in
/// document order.
pub async fn chapter_titles(path: &Path) -> Result<Vec<String>, PdfError> {
    let data = fs::read(path).await.map_err(|source| PdfError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = Document::load_mem(&data)?;

    let mut titles = Vec::new();
    let Ok(outlines) = doc
        .catalog()?
        .get(b"Outlines")
        .and_then(Object::as_reference)
    else {
        return Ok(titles);
    };

    let mut cursor = doc
        .get_dictionary(outlines)?
        .get(b"First")
        .and_then(Object::as_reference)
        .ok();
    while let Some(id) = cursor {
        let item = doc.get_dictionary(id)?;
        titles.push(decode_text_string(item.get(b"Title")?.as_str()?));
        cursor = item.get(b"Next").and_then(Object::as_reference).ok();
    }
    Ok(titles)
}

/// PDF text string: plain bytes for ASCII, UTF-16BE with a BOM otherwise.
fn text_string(s: &str) -> Object {
    if s.is_ascii() {
        return Object::string_literal(s);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Encodes text for the standard fonts' WinAnsiEncoding. Characters the
/// encoding lacks become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7E}' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            '\t' => b' ',
            _ => b'?',
        })
        .collect()
}

/// Greedy word wrap at `width` characters; overlong words are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for source_line in text.lines() {
        let mut line = String::new();
        let mut len = 0;
        for word in source_line.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if len > 0 {
                    lines.push(std::mem::take(&mut line));
                    len = 0;
                }
                lines.push(word.drain(..width).collect());
            }
            if word.is_empty() {
                continue;
            }
            if len > 0 && len + 1 + word.len() > width {
                lines.push(std::mem::take(&mut line));
                len = 0;
            }
            if len > 0 {
                line.push(' ');
                len += 1;
            }
            len += word.len();
            line.extend(word);
        }
        if len > 0 {
            lines.push(line);
        }
    }
    lines
}
