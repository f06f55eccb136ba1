//! Document sessions: the resource-owning record of an opened document.
//!
//! A session owns the document bytes (spilled to a named temp file so pdfium
//! can open them by path) and a per-page cache of rendered images. The cache
//! is an arena of `tokio::sync::OnceCell` slots, one per page, which gives
//! render collapsing for free: concurrent `get_page` calls for the same
//! uncached page race into the same cell, exactly one render runs, and every
//! caller gets the same `Arc<PageImage>`. A failed render initialises
//! nothing, so the next call retries from scratch.
//!
//! Deleting a session drops the `Arc` held by the store; the temp file and
//! cached images are released when the last in-flight reference is gone.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tempfile::NamedTempFile;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PagelensError;
use crate::pipeline::render::{DocumentRenderer, PageImage};

/// One opened document: temp-file backing, page count, render cache.
#[derive(Debug)]
pub struct DocumentSession {
    pub id: Uuid,
    pub page_count: usize,
    pub created_at: Instant,
    /// Keeps the backing file alive; deleted on drop.
    file: NamedTempFile,
    /// One slot per page. `OnceCell` collapses concurrent renders.
    pages: Vec<OnceCell<Arc<PageImage>>>,
}

/// Registry of live document sessions, keyed by session id.
///
/// Shared across tasks behind an `Arc`; the inner `DashMap` makes lookups
/// lock-free for readers.
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<DocumentSession>>,
    renderer: Arc<dyn DocumentRenderer>,
    scale_factor: f32,
}

impl SessionStore {
    pub fn new(renderer: Arc<dyn DocumentRenderer>, scale_factor: f32) -> Self {
        Self {
            sessions: DashMap::new(),
            renderer,
            scale_factor,
        }
    }

    /// Open a document from raw bytes and register a session for it.
    ///
    /// The bytes are spilled to a temp file (the rendering backend opens
    /// documents by path) and the document is validated by opening it once
    /// to count pages. Invalid bytes fail here and register nothing.
    pub async fn open(&self, bytes: Vec<u8>) -> Result<Uuid, PagelensError> {
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut file = NamedTempFile::new()?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| PagelensError::Internal(format!("temp spill task panicked: {e}")))?
        .map_err(|e| PagelensError::Internal(format!("failed to spill document to disk: {e}")))?;

        let page_count = self.renderer.open(file.path()).await?;

        let id = Uuid::new_v4();
        let session = DocumentSession {
            id,
            page_count,
            created_at: Instant::now(),
            file,
            pages: (0..page_count).map(|_| OnceCell::new()).collect(),
        };
        self.sessions.insert(id, Arc::new(session));
        info!(session = %id, pages = page_count, "session opened");
        Ok(id)
    }

    /// Look up a live session.
    pub fn get(&self, id: Uuid) -> Result<Arc<DocumentSession>, PagelensError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(PagelensError::SessionNotFound { id })
    }

    /// Rendered image for one page, from cache or by rendering now.
    ///
    /// Concurrent calls for the same uncached page collapse into a single
    /// render. A render failure is returned to every waiting caller and
    /// cached nowhere, so a later call gets a fresh attempt.
    pub async fn get_page(
        &self,
        id: Uuid,
        index: usize,
    ) -> Result<Arc<PageImage>, PagelensError> {
        let session = self.get(id)?;
        if index >= session.page_count {
            return Err(PagelensError::PageOutOfRange {
                page: index,
                total: session.page_count,
            });
        }

        let image = session.pages[index]
            .get_or_try_init(|| async {
                debug!(session = %id, page = index, "rendering page");
                self.renderer
                    .render_page(session.file.path(), index, self.scale_factor)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(image))
    }

    /// Delete a session, releasing its temp file and cached images.
    ///
    /// Idempotent: deleting an unknown or already-deleted id is a no-op.
    pub fn delete(&self, id: Uuid) {
        if self.sessions.remove(&id).is_some() {
            info!(session = %id, "session deleted");
        }
    }

    /// Number of live sessions. Diagnostic only.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
