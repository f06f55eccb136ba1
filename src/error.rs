//! Error types for the pagelens library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PagelensError`] — **Fatal or caller-level**: the operation cannot
//!   proceed at all (document won't parse, unknown session, unsafe
//!   production configuration). Returned as `Err(PagelensError)` from the
//!   service entry points.
//!
//! * [`PageError`] — **Page-level**: one page of an extraction run failed
//!   (render glitch, inference budget exhausted) but all other pages are
//!   fine. Stored inside the per-page [`crate::orchestrator::PageExtraction`]
//!   so callers see partial success rather than losing the whole document to
//!   one bad page.
//!
//! Retryable inference outcomes never appear here — the orchestrator absorbs
//! them until the retry budget is exhausted.

use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::infer::FailureClass;

/// Fatal and caller-level errors returned by the pagelens library.
///
/// Page-level failures use [`PageError`] and are stored in the per-page
/// extraction state rather than propagated here.
#[derive(Debug, Error)]
pub enum PagelensError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The uploaded bytes could not be opened or parsed as a document.
    /// Fatal to session creation; no session is registered.
    #[error("document could not be loaded: {detail}")]
    DocumentLoad { detail: String },

    /// Requested page index is outside `[0, page_count)`.
    /// Caller error; no state is corrupted.
    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// The referenced document session does not exist (never opened, or
    /// already deleted).
    #[error("session {id} not found")]
    SessionNotFound { id: Uuid },

    /// The referenced processing session does not exist.
    #[error("processing session {id} not found")]
    ProcessingNotFound { id: Uuid },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Placeholder data is enabled in a production environment. Raised at
    /// startup, before any request can be served.
    #[error(
        "PRODUCTION SAFETY ERROR: placeholder data is enabled in production.\n\
         Set ALLOW_DUMMY_DATA=false or change ENVIRONMENT."
    )]
    ProductionSafetyViolation,

    /// Builder or environment-variable validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Page-level passthrough ────────────────────────────────────────────
    /// A page-level failure surfaced through a caller-facing entry point
    /// (`get_page` on a page that fails to rasterise).
    #[error(transparent)]
    Page(#[from] PageError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, I/O on the temp store).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A page-level error within one extraction run.
///
/// Stored alongside the page's extraction state when the page ends
/// `Errored`; the run continues with the remaining pages.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The page rendered but PNG encoding failed.
    #[error("page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The inference call failed terminally (model error, or retry budget
    /// exhausted for a retryable class).
    #[error("page {page}: inference failed after {attempts} attempts ({class:?}): {detail}")]
    InferenceFailed {
        page: usize,
        attempts: u32,
        class: FailureClass,
        detail: String,
    },

    /// Extraction failed and policy forbids placeholder substitution.
    #[error("page {page}: extraction failed and fallback data is disallowed: {detail}")]
    FallbackDisallowed { page: usize, detail: String },

    /// The owning document session was deleted while the run was active.
    #[error("page {page}: document session was deleted during extraction")]
    SessionGone { page: usize },
}
