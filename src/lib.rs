//! # pagelens
//!
//! Rasterise document pages and extract structured fields from them with a
//! vision model.
//!
//! ## Why this crate?
//!
//! Engineering documents (drawings, title blocks, revision tables) carry
//! their key metadata as pixels, not text. This crate rasterises each page
//! at high magnification, sends the image to a vision inference service,
//! and manages the messy reality around that call: caching renders,
//! classifying failures, retrying with backoff, and deciding when synthetic
//! placeholder data may stand in for a failed extraction.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document bytes
//!  │
//!  ├─ 1. Open      spill to temp file, count pages, register a session
//!  ├─ 2. Render    rasterise pages at 4x via pdfium (spawn_blocking),
//!  │               cached per page, concurrent requests collapsed
//!  ├─ 3. Encode    fast-profile PNG
//!  ├─ 4. Infer     one vision call per page, outcomes classified four ways
//!  ├─ 5. Retry     exponential backoff, per-class attempt budgets
//!  └─ 6. Fallback  policy-gated placeholder substitution, or Errored
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagelens::{DocumentService, ExtractionConfig, FieldSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = DocumentService::new(ExtractionConfig::from_env()?)?;
//!
//!     let bytes = std::fs::read("drawing.pdf")?;
//!     let opened = service.open_document(bytes).await?;
//!     println!("{} pages", opened.page_count);
//!
//!     let fields = vec![
//!         FieldSpec::new("drawing_title", "The title of the drawing"),
//!         FieldSpec::new("drawing_number", "The drawing sheet number"),
//!     ];
//!     let started = service.start_extraction(opened.session_id, fields).await?;
//!     if let Some(first) = &started.first_page {
//!         println!("page 0: {:?}", first.result);
//!     }
//!
//!     // Poll the rest, then release everything.
//!     let status = service.extraction_status(started.processing_id)?;
//!     println!("complete: {}", status.is_complete());
//!     service.cleanup_extraction(started.processing_id);
//!     service.delete_session(opened.session_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rasterize` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pagelens = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backoff;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod service;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backoff::BackoffPolicy;
pub use config::{Environment, ExtractionConfig, ExtractionConfigBuilder};
pub use error::{PageError, PagelensError};
pub use orchestrator::{
    ExtractionStatus, Orchestrator, PageExtraction, PageStatus, StartedExtraction,
};
pub use pipeline::infer::{
    FailureClass, FieldSpec, HttpInferenceClient, InferenceClient, InferenceOutcome,
};
pub use pipeline::render::{DocumentRenderer, PageImage, PdfiumRenderer};
pub use policy::{FallbackDecision, FallbackGate};
pub use service::{DocumentService, OpenedDocument};
pub use session::SessionStore;
