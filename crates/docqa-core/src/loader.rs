use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{Document, PageMap};

/// Page break in extracted text (what `pdftotext` emits between pages).
pub const PAGE_BREAK: char = '\u{000C}';

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md"];

/// Loads already-extracted document text from disk.
#[derive(Debug, Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a single file or every supported file under a directory.
    pub fn load_path(&self, path: &Path) -> Result<Vec<Document>> {
        if path.is_file() {
            let root = path.parent().unwrap_or_else(|| Path::new(""));
            return Ok(vec![self.load_file(path, root)?]);
        }
        self.load_directory(path)
    }

    pub fn load_directory(&self, data_dir: &Path) -> Result<Vec<Document>> {
        if !data_dir.is_dir() {
            return Err(Error::Document(format!("not a directory: {}", data_dir.display())));
        }
        let files = self.list_files(data_dir);
        if files.is_empty() {
            tracing::warn!(dir = %data_dir.display(), "no supported files found");
            return Ok(vec![]);
        }
        let mut documents = Vec::with_capacity(files.len());
        for (file_index, file_path) in files.iter().enumerate() {
            tracing::debug!(file = %file_path.display(), n = file_index + 1, of = files.len(), "loading");
            documents.push(self.load_file(file_path, data_dir)?);
        }
        tracing::info!(files = documents.len(), dir = %data_dir.display(), "loaded documents");
        Ok(documents)
    }

    /// The document id is the path relative to `root`, with `/` separators.
    pub fn load_file(&self, file_path: &Path, root: &Path) -> Result<Document> {
        if !is_supported(file_path) {
            return Err(Error::Document(format!(
                "unsupported file type: {} (supported: {})",
                file_path.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
        let raw = self.read_file_content(file_path)?;
        let (text, pages) = join_pages(&raw);
        let filename = file_path.file_name().map_or_else(|| file_path.display().to_string(), |n| n.to_string_lossy().to_string());
        Ok(Document::new(document_id(file_path, root), filename, text).with_pages(pages))
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file() && is_supported(e.path()))
            .map(walkdir::DirEntry::into_path)
            .collect();
        files.sort();
        files
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

fn document_id(file_path: &Path, root: &Path) -> String {
    let relative = file_path.strip_prefix(root).unwrap_or(file_path);
    relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

/// Join non-empty pages with a blank line and record where each page starts.
pub fn join_pages(raw: &str) -> (String, PageMap) {
    let mut text = String::with_capacity(raw.len());
    let mut starts = Vec::new();
    let mut offset = 0;
    for page in raw.split(PAGE_BREAK) {
        let page = page.trim_end();
        if page.trim().is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
            offset += 2;
        }
        starts.push(offset);
        text.push_str(page);
        offset += page.chars().count();
    }
    if starts.is_empty() {
        starts.push(0);
    }
    (text, PageMap::new(starts))
}
