//! The top-level service facade wiring the store, gate, and orchestrator
//! together behind one handle.
//!
//! Construction performs the startup safety validation: a
//! [`DocumentService`] cannot exist with placeholder data enabled in
//! production, so every request path downstream is safe by construction.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::error::PagelensError;
use crate::orchestrator::{ExtractionStatus, Orchestrator, StartedExtraction};
use crate::pipeline::infer::{FieldSpec, HttpInferenceClient, InferenceClient};
use crate::pipeline::render::{DocumentRenderer, PageImage, PdfiumRenderer};
use crate::policy::FallbackGate;
use crate::session::SessionStore;

/// Result of opening a document.
#[derive(Debug, Clone, Copy)]
pub struct OpenedDocument {
    pub session_id: Uuid,
    pub page_count: usize,
}

/// One handle for the whole pipeline: open documents, fetch page images,
/// run extractions, poll, clean up.
pub struct DocumentService {
    store: Arc<SessionStore>,
    orchestrator: Orchestrator,
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService").finish_non_exhaustive()
    }
}

impl DocumentService {
    /// Build the service with the production collaborators (pdfium renderer,
    /// HTTP inference client).
    ///
    /// Fails fast with [`PagelensError::ProductionSafetyViolation`] when the
    /// configuration is unsafe; callers must not serve requests after that.
    pub fn new(config: ExtractionConfig) -> Result<Self, PagelensError> {
        let renderer: Arc<dyn DocumentRenderer> = Arc::new(PdfiumRenderer);
        let client: Arc<dyn InferenceClient> =
            Arc::new(HttpInferenceClient::new(config.inference_url.clone()));
        Self::with_collaborators(config, renderer, client)
    }

    /// Build the service with explicit collaborators. This is the seam tests
    /// use to script renders and inference outcomes.
    pub fn with_collaborators(
        config: ExtractionConfig,
        renderer: Arc<dyn DocumentRenderer>,
        client: Arc<dyn InferenceClient>,
    ) -> Result<Self, PagelensError> {
        let gate = FallbackGate::new(&config)?;
        let store = Arc::new(SessionStore::new(renderer, config.scale_factor));
        let orchestrator = Orchestrator::new(Arc::clone(&store), client, gate, config);
        info!("document service ready");
        Ok(Self {
            store,
            orchestrator,
        })
    }

    /// Open a document from raw bytes.
    pub async fn open_document(&self, bytes: Vec<u8>) -> Result<OpenedDocument, PagelensError> {
        let session_id = self.store.open(bytes).await?;
        let page_count = self.store.get(session_id)?.page_count;
        Ok(OpenedDocument {
            session_id,
            page_count,
        })
    }

    /// Page count of a live session.
    pub fn page_count(&self, session_id: Uuid) -> Result<usize, PagelensError> {
        Ok(self.store.get(session_id)?.page_count)
    }

    /// Rendered image for one page, cached after the first render.
    pub async fn get_page(
        &self,
        session_id: Uuid,
        index: usize,
    ) -> Result<Arc<PageImage>, PagelensError> {
        self.store.get_page(session_id, index).await
    }

    /// Delete a session and cancel any extraction runs still using it.
    /// Idempotent.
    pub fn delete_session(&self, session_id: Uuid) {
        self.orchestrator.cancel_for_session(session_id);
        self.store.delete(session_id);
    }

    /// Start an extraction run over every page of a session.
    pub async fn start_extraction(
        &self,
        session_id: Uuid,
        fields: Vec<FieldSpec>,
    ) -> Result<StartedExtraction, PagelensError> {
        self.orchestrator.start(session_id, fields).await
    }

    /// Poll an extraction run.
    pub fn extraction_status(&self, processing_id: Uuid) -> Result<ExtractionStatus, PagelensError> {
        self.orchestrator.status(processing_id)
    }

    /// Poll a single page of an extraction run.
    pub fn extraction_page_status(
        &self,
        processing_id: Uuid,
        page_index: usize,
    ) -> Result<crate::orchestrator::PageExtraction, PagelensError> {
        self.orchestrator.page_status(processing_id, page_index)
    }

    /// Discard an extraction run, cancelling it if still active. Idempotent.
    pub fn cleanup_extraction(&self, processing_id: Uuid) {
        self.orchestrator.cleanup(processing_id)
    }
}
