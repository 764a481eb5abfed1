use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::fetcher::WikiPage;

const ENTRY_EXTENSION: &str = "txt";
const JOURNAL_FILE: &str = "journal.jsonl";

/// One completed cache write, appended to the journal after the entry file
/// is in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Text cache for one wiki: one `<sanitized id>.txt` file per page plus an
/// append-only journal recording the order pages were written in.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Opens (creating if needed) the cache rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize_filename(id), ENTRY_EXTENSION))
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// True iff a completed entry exists for `id`.
    pub async fn has(&self, id: &str) -> bool {
        fs::metadata(self.entry_path(id))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn read(&self, id: &str) -> Result<String, CacheError> {
        let path = self.entry_path(id);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CacheError::NotFound(id.to_string()))
            }
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Stores `page`, replacing any previous entry.
    ///
    /// The text is written to a `.part` sibling and renamed into place, so
    /// `has` never sees a half-written entry. The journal record is appended
    /// only after the rename succeeded.
    pub async fn write(&self, page: &WikiPage) -> Result<(), CacheError> {
        let path = self.entry_path(&page.id);
        let part = path.with_extension(format!("{ENTRY_EXTENSION}.part"));

        fs::write(&part, page.text.as_bytes())
            .await
            .map_err(|e| CacheError::io(&part, e))?;
        fs::rename(&part, &path)
            .await
            .map_err(|e| CacheError::io(&path, e))?;

        let record = JournalRecord {
            id: page.id.clone(),
            title: page.title.clone(),
            url: page.url.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let journal = self.journal_path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal)
            .await
            .map_err(|e| CacheError::io(&journal, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CacheError::io(&journal, e))?;
        file.flush()
            .await
            .map_err(|e| CacheError::io(&journal, e))?;

        debug!("Cached \"{}\" at {}", page.id, path.display());
        Ok(())
    }

    /// The most recently completed write, if any.
    pub async fn last_written(&self) -> Result<Option<JournalRecord>, CacheError> {
        Ok(self.journal().await?.pop())
    }

    /// Latest known title for every journaled id.
    pub async fn titles(&self) -> Result<HashMap<String, String>, CacheError> {
        Ok(self
            .journal()
            .await?
            .into_iter()
            .map(|record| (record.id, record.title))
            .collect())
    }

    /// Every cached id: journal order first (first write wins), then any
    /// other entry files in name order.
    pub async fn ids(&self) -> Result<Vec<String>, CacheError> {
        let mut ids = Vec::new();
        let mut owners: HashMap<PathBuf, String> = HashMap::new();

        for record in self.journal().await? {
            let path = self.entry_path(&record.id);
            if let Some(owner) = owners.get(&path) {
                if *owner != record.id {
                    warn!(
                        "Pages \"{}\" and \"{}\" share cache file {}; only \"{}\" is kept",
                        owner,
                        record.id,
                        path.display(),
                        owner
                    );
                }
                continue;
            }
            if !self.has(&record.id).await {
                continue;
            }
            owners.insert(path, record.id.clone());
            ids.push(record.id);
        }

        let mut strays = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if owners.contains_key(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                strays.push(stem.to_string());
            }
        }
        strays.sort();
        ids.extend(strays);

        Ok(ids)
    }

    async fn journal(&self) -> Result<Vec<JournalRecord>, CacheError> {
        let path = self.journal_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        let mut records = Vec::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => records.push(record),
                // an interrupted append leaves a torn last line
                Err(e) => warn!("Ignoring unreadable journal line in {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

/// Makes a page id safe to use as a file name.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
