//! Document host backed by files on disk
//!
//! Documents are read once on open and edited in memory; `save` writes the
//! buffer back atomically (temp file, then rename).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tracing::debug;

use super::{DocumentHost, TextBuffer, TextEdit};
use crate::error::DocumentError;

struct OpenDocument {
    buffer: TextBuffer,
    saved_version: u64,
}

/// Files under a workspace root, edited in memory until saved
pub struct WorkspaceDocuments {
    root: PathBuf,
    documents: DashMap<PathBuf, OpenDocument>,
}

impl WorkspaceDocuments {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            documents: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths resolve against the workspace root
    ///
    /// `.` components are dropped so `./a.rs` and `a.rs` name the same document.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.components().collect()
        } else {
            self.root.join(path).components().collect()
        }
    }

    /// Sibling temp file used while saving `path`
    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(
            ".{}.{}.streamwright.tmp",
            name,
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Whether the document has edits not yet saved
    pub fn is_dirty(&self, path: &Path) -> bool {
        self.documents
            .get(&self.resolve(path))
            .map(|doc| doc.buffer.version() != doc.saved_version)
            .unwrap_or(false)
    }

    /// Number of documents currently open
    pub fn open_count(&self) -> usize {
        self.documents.len()
    }
}

#[async_trait]
impl DocumentHost for WorkspaceDocuments {
    async fn open(&self, path: &Path) -> Result<String, DocumentError> {
        let resolved = self.resolve(path);
        if let Some(doc) = self.documents.get(&resolved) {
            return Ok(doc.buffer.text().to_string());
        }

        let text = match fs::read_to_string(&resolved).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocumentError::NotFound(resolved));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Opened document {:?} ({} bytes)", resolved, text.len());

        // A concurrent open may have raced us; keep whichever buffer landed first
        let doc = self
            .documents
            .entry(resolved)
            .or_insert_with(|| OpenDocument {
                buffer: TextBuffer::new(text),
                saved_version: 0,
            });
        Ok(doc.buffer.text().to_string())
    }

    async fn text(&self, path: &Path) -> Result<String, DocumentError> {
        let resolved = self.resolve(path);
        self.documents
            .get(&resolved)
            .map(|doc| doc.buffer.text().to_string())
            .ok_or(DocumentError::NotOpen(resolved))
    }

    async fn apply_edits(&self, path: &Path, edits: Vec<TextEdit>) -> Result<(), DocumentError> {
        let resolved = self.resolve(path);
        let mut doc = self
            .documents
            .get_mut(&resolved)
            .ok_or_else(|| DocumentError::NotOpen(resolved.clone()))?;
        doc.buffer.apply(&edits)
    }

    async fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let resolved = self.resolve(path);
        let (text, version) = {
            let doc = self
                .documents
                .get(&resolved)
                .ok_or_else(|| DocumentError::NotOpen(resolved.clone()))?;
            (doc.buffer.text().to_string(), doc.buffer.version())
        };

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = Self::temp_path(&resolved);
        fs::write(&temp_path, &text).await?;
        if let Err(e) = fs::rename(&temp_path, &resolved).await {
            fs::remove_file(&temp_path).await.ok();
            return Err(e.into());
        }

        if let Some(mut doc) = self.documents.get_mut(&resolved) {
            doc.saved_version = version;
        }
        debug!("Saved document {:?} at version {}", resolved, version);
        Ok(())
    }

    fn canonical(&self, path: &Path) -> PathBuf {
        self.resolve(path)
    }
}
