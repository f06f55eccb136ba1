//! Extraction orchestration: drive inference over a session's pages.
//!
//! One processing session is one background task walking the document's
//! pages in order. Page 0 is processed first and [`Orchestrator::start`]
//! waits a bounded time for it, so interactive callers get an immediate
//! first result when the service is healthy. Everything after page 0 is
//! strictly poll-driven via [`Orchestrator::status`].
//!
//! ## Concurrency model
//!
//! The background task is the only writer of page extraction state; pollers
//! only read snapshots. Pages advance `Pending → InFlight → (Retrying)* →
//! Ready | FallbackReady | Errored` and never leave a terminal state. At
//! most one inference call is in flight per processing session at any time,
//! and a fixed delay separates pages, so a struggling inference service is
//! never hit with a burst.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::error::{PageError, PagelensError};
use crate::pipeline::infer::{FailureClass, FieldSpec, InferenceClient, InferenceOutcome};
use crate::policy::{placeholder_result, FallbackDecision, FallbackGate};
use crate::session::SessionStore;

/// Lifecycle of one page within a processing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Not reached by the page loop yet.
    Pending,
    /// An inference call (or render) is in flight.
    InFlight,
    /// Waiting out a backoff delay before retry number `attempt`.
    Retrying { attempt: u32 },
    /// Real extracted data is available.
    Ready,
    /// Placeholder data was substituted under the fallback policy.
    FallbackReady,
    /// The page failed and no placeholder was permitted.
    Errored,
}

impl PageStatus {
    /// Terminal states are never left once entered.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::FallbackReady | Self::Errored)
    }
}

/// Per-page extraction state. Snapshots of this are what pollers see.
#[derive(Debug, Clone)]
pub struct PageExtraction {
    pub status: PageStatus,
    /// Field map, present for `Ready` and `FallbackReady`.
    pub result: Option<Map<String, Value>>,
    /// False when `result` is placeholder data.
    pub ai_generated: bool,
    /// Inference calls made for this page so far.
    pub attempts: u32,
    /// Class of the most recent failure, if any attempt failed.
    pub last_failure: Option<FailureClass>,
    /// Terminal error, present only for `Errored`.
    pub error: Option<PageError>,
}

impl PageExtraction {
    fn pending() -> Self {
        Self {
            status: PageStatus::Pending,
            result: None,
            ai_generated: false,
            attempts: 0,
            last_failure: None,
            error: None,
        }
    }
}

/// Returned by [`Orchestrator::start`].
#[derive(Debug)]
pub struct StartedExtraction {
    pub processing_id: Uuid,
    pub page_count: usize,
    /// Snapshot of page 0 if it reached a terminal state within the
    /// first-page wait window; `None` means poll for it.
    pub first_page: Option<PageExtraction>,
}

/// Full status snapshot of a processing session.
#[derive(Debug)]
pub struct ExtractionStatus {
    pub processing_id: Uuid,
    pub session_id: Uuid,
    pub pages: Vec<PageExtraction>,
}

impl ExtractionStatus {
    /// True once every page is in a terminal state.
    pub fn is_complete(&self) -> bool {
        self.pages.iter().all(|p| p.status.is_terminal())
    }
}

/// Live record of one extraction run.
struct ProcessingSession {
    id: Uuid,
    session_id: Uuid,
    fields: Vec<FieldSpec>,
    pages: Vec<Mutex<PageExtraction>>,
    /// Signalled when page 0 reaches a terminal state.
    first_page_done: Notify,
    /// Handle of the page-loop task, taken on cleanup to abort it.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessingSession {
    fn lock_page(&self, index: usize) -> MutexGuard<'_, PageExtraction> {
        // A poisoned page lock means a panic mid-update; the state is a
        // plain value, safe to keep reading.
        self.pages[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self, index: usize) -> PageExtraction {
        self.lock_page(index).clone()
    }

    /// Apply one state update, refusing to leave a terminal state.
    fn update_page(&self, index: usize, f: impl FnOnce(&mut PageExtraction)) {
        let mut page = self.lock_page(index);
        if page.status.is_terminal() {
            warn!(
                run = %self.id,
                page = index,
                "ignoring state update on terminal page"
            );
            return;
        }
        f(&mut page);
        drop(page);
        if index == 0 && self.snapshot(0).status.is_terminal() {
            self.first_page_done.notify_waiters();
        }
    }
}

/// Drives extraction runs and tracks them by processing id.
pub struct Orchestrator {
    store: Arc<SessionStore>,
    client: Arc<dyn InferenceClient>,
    gate: FallbackGate,
    config: ExtractionConfig,
    runs: DashMap<Uuid, Arc<ProcessingSession>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        client: Arc<dyn InferenceClient>,
        gate: FallbackGate,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            store,
            client,
            gate,
            config,
            runs: DashMap::new(),
        }
    }

    /// Start an extraction run over all pages of a session.
    ///
    /// Spawns the page loop, then waits up to `first_page_timeout` for
    /// page 0 to reach a terminal state so the caller can show an immediate
    /// result. On timeout the run keeps going and `first_page` is `None`.
    pub async fn start(
        &self,
        session_id: Uuid,
        fields: Vec<FieldSpec>,
    ) -> Result<StartedExtraction, PagelensError> {
        let session = self.store.get(session_id)?;
        let page_count = session.page_count;
        drop(session);

        let run = Arc::new(ProcessingSession {
            id: Uuid::new_v4(),
            session_id,
            fields,
            pages: (0..page_count)
                .map(|_| Mutex::new(PageExtraction::pending()))
                .collect(),
            first_page_done: Notify::new(),
            handle: Mutex::new(None),
        });
        let processing_id = run.id;
        info!(run = %processing_id, session = %session_id, pages = page_count, "extraction started");

        let worker = PageLoop {
            store: Arc::clone(&self.store),
            client: Arc::clone(&self.client),
            gate: self.gate.clone(),
            config: self.config.clone(),
            run: Arc::clone(&run),
        };
        let handle = tokio::spawn(worker.run());
        *run.handle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        self.runs.insert(processing_id, Arc::clone(&run));

        let first_page = if page_count > 0 {
            self.wait_first_page(&run).await
        } else {
            None
        };

        Ok(StartedExtraction {
            processing_id,
            page_count,
            first_page,
        })
    }

    async fn wait_first_page(&self, run: &ProcessingSession) -> Option<PageExtraction> {
        let wait = async {
            loop {
                // Register before checking so a notify between check and
                // await is not lost.
                let notified = run.first_page_done.notified();
                let snapshot = run.snapshot(0);
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(self.config.first_page_timeout, wait).await {
            Ok(snapshot) => Some(snapshot),
            Err(_) => {
                debug!("first page not terminal within wait window; caller will poll");
                None
            }
        }
    }

    /// Poll the status of a run.
    pub fn status(&self, processing_id: Uuid) -> Result<ExtractionStatus, PagelensError> {
        let run = self
            .runs
            .get(&processing_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(PagelensError::ProcessingNotFound { id: processing_id })?;
        Ok(ExtractionStatus {
            processing_id,
            session_id: run.session_id,
            pages: (0..run.pages.len()).map(|i| run.snapshot(i)).collect(),
        })
    }

    /// Poll the status of a single page of a run.
    pub fn page_status(
        &self,
        processing_id: Uuid,
        page_index: usize,
    ) -> Result<PageExtraction, PagelensError> {
        let run = self
            .runs
            .get(&processing_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(PagelensError::ProcessingNotFound { id: processing_id })?;
        if page_index >= run.pages.len() {
            return Err(PagelensError::PageOutOfRange {
                page: page_index,
                total: run.pages.len(),
            });
        }
        Ok(run.snapshot(page_index))
    }

    /// Discard a run, cancelling its page loop if still active.
    ///
    /// Idempotent: unknown ids are a no-op.
    pub fn cleanup(&self, processing_id: Uuid) {
        if let Some((_, run)) = self.runs.remove(&processing_id) {
            if let Some(handle) = run
                .handle
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take()
            {
                handle.abort();
            }
            info!(run = %processing_id, "extraction run cleaned up");
        }
    }

    /// Cancel and discard every run tied to a document session. Called when
    /// the session itself is deleted.
    pub fn cancel_for_session(&self, session_id: Uuid) {
        let doomed: Vec<Uuid> = self
            .runs
            .iter()
            .filter(|e| e.value().session_id == session_id)
            .map(|e| *e.key())
            .collect();
        for id in doomed {
            self.cleanup(id);
        }
    }
}

/// The background page loop for one run. Owns every write to page state.
struct PageLoop {
    store: Arc<SessionStore>,
    client: Arc<dyn InferenceClient>,
    gate: FallbackGate,
    config: ExtractionConfig,
    run: Arc<ProcessingSession>,
}

impl PageLoop {
    async fn run(self) {
        let page_count = self.run.pages.len();
        for index in 0..page_count {
            let keep_going = self.process_page(index).await;
            if !keep_going {
                // The owning session is gone; mark the rest and stop.
                for rest in index + 1..page_count {
                    self.run.update_page(rest, |p| {
                        p.status = PageStatus::Errored;
                        p.error = Some(PageError::SessionGone { page: rest });
                    });
                }
                return;
            }
            if index + 1 < page_count {
                tokio::time::sleep(self.config.inter_page_delay).await;
            }
        }
        info!(run = %self.run.id, "extraction run complete");
    }

    /// Process one page to a terminal state. Returns false if the owning
    /// session disappeared and the run should stop.
    async fn process_page(&self, index: usize) -> bool {
        if self.gate.force_dummy() {
            // Never touch the renderer or the inference service.
            let result = placeholder_result(&self.run.fields, index);
            self.run.update_page(index, |p| {
                p.status = PageStatus::FallbackReady;
                p.result = Some(result);
                p.ai_generated = false;
            });
            return true;
        }

        self.run
            .update_page(index, |p| p.status = PageStatus::InFlight);

        let image = match self.store.get_page(self.run.session_id, index).await {
            Ok(image) => image,
            Err(PagelensError::SessionNotFound { .. }) => {
                self.run.update_page(index, |p| {
                    p.status = PageStatus::Errored;
                    p.error = Some(PageError::SessionGone { page: index });
                });
                return false;
            }
            Err(e) => {
                let error = match e {
                    PagelensError::Page(page_err) => page_err,
                    other => PageError::RenderFailed {
                        page: index,
                        detail: other.to_string(),
                    },
                };
                self.fail_page(index, error);
                return true;
            }
        };

        // Inference with per-class retry budgets. `class_attempts` indexes
        // by FailureClass discriminant.
        let mut total_attempts: u32 = 0;
        let mut class_attempts = [0u32; 4];

        loop {
            // The deadline is enforced here as well as inside the client, so
            // a collaborator that ignores its timeout argument cannot stall
            // the whole run.
            let call = self
                .client
                .infer(&image, &self.run.fields, self.config.infer_timeout);
            let outcome = match tokio::time::timeout(self.config.infer_timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => InferenceOutcome::Timeout,
            };
            total_attempts += 1;

            let class = match outcome {
                InferenceOutcome::Success(result) => {
                    debug!(run = %self.run.id, page = index, attempts = total_attempts, "page extracted");
                    self.run.update_page(index, |p| {
                        p.status = PageStatus::Ready;
                        p.result = Some(result);
                        p.ai_generated = true;
                        p.attempts = total_attempts;
                    });
                    return true;
                }
                InferenceOutcome::NotReadyYet => FailureClass::NotReadyYet,
                InferenceOutcome::ServiceUnavailable => FailureClass::ServiceUnavailable,
                InferenceOutcome::Timeout => FailureClass::Timeout,
                InferenceOutcome::ModelError(ref detail) => {
                    let detail = detail.clone();
                    return self.exhausted(index, total_attempts, FailureClass::ModelError, detail);
                }
            };

            let slot = class as usize;
            class_attempts[slot] += 1;
            if class_attempts[slot] >= self.config.backoff.budget(class) {
                let detail = format!("retry budget exhausted for {:?}", class);
                return self.exhausted(index, total_attempts, class, detail);
            }

            let delay = self.config.backoff.next_delay(total_attempts - 1);
            debug!(
                run = %self.run.id,
                page = index,
                attempt = total_attempts,
                ?class,
                ?delay,
                "inference attempt failed, backing off"
            );
            self.run.update_page(index, |p| {
                p.status = PageStatus::Retrying {
                    attempt: total_attempts,
                };
                p.attempts = total_attempts;
                p.last_failure = Some(class);
            });
            tokio::time::sleep(delay).await;
        }
    }

    /// Inference for a page has terminally failed; consult the gate.
    fn exhausted(
        &self,
        index: usize,
        attempts: u32,
        class: FailureClass,
        detail: String,
    ) -> bool {
        let error = PageError::InferenceFailed {
            page: index,
            attempts,
            class,
            detail,
        };
        match self.gate.decide() {
            FallbackDecision::Placeholder => {
                warn!(run = %self.run.id, page = index, ?class, "substituting placeholder data");
                let result = placeholder_result(&self.run.fields, index);
                self.run.update_page(index, |p| {
                    p.status = PageStatus::FallbackReady;
                    p.result = Some(result);
                    p.ai_generated = false;
                    p.attempts = attempts;
                    p.last_failure = Some(class);
                });
            }
            FallbackDecision::Fail => {
                warn!(run = %self.run.id, page = index, ?class, "page errored, fallback disallowed");
                self.run.update_page(index, |p| {
                    p.status = PageStatus::Errored;
                    p.attempts = attempts;
                    p.last_failure = Some(class);
                    p.error = Some(PageError::FallbackDisallowed {
                        page: index,
                        detail: error.to_string(),
                    });
                });
            }
        }
        true
    }

    /// Render or encode failure: terminal for the page, gated like any
    /// other ultimate failure.
    fn fail_page(&self, index: usize, error: PageError) {
        match self.gate.decide() {
            FallbackDecision::Placeholder => {
                warn!(run = %self.run.id, page = index, %error, "render failed, substituting placeholder");
                let result = placeholder_result(&self.run.fields, index);
                self.run.update_page(index, |p| {
                    p.status = PageStatus::FallbackReady;
                    p.result = Some(result);
                    p.ai_generated = false;
                });
            }
            FallbackDecision::Fail => {
                warn!(run = %self.run.id, page = index, %error, "render failed, page errored");
                self.run.update_page(index, |p| {
                    p.status = PageStatus::Errored;
                    p.error = Some(error);
                });
            }
        }
    }
}
