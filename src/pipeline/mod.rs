//! Pipeline stages for page rasterisation and field extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. mock the renderer or the inference service
//! in tests) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ infer
//! (pdfium)   (fast PNG) (vision endpoint)
//! ```
//!
//! 1. [`render`] — rasterise one page at a fixed scale; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`] — PNG-encode the raster with the fast compression profile
//! 3. [`infer`]  — send the page image to the vision endpoint and classify
//!    the outcome; the only stage with network I/O

pub mod encode;
pub mod infer;
pub mod render;
