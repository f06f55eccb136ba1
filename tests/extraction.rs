//! Integration tests for the extraction pipeline.
//!
//! The renderer and the inference service are replaced by scripted mocks,
//! so every test runs hermetically: no pdfium install, no network. Each
//! scenario drives the public `DocumentService` surface the way an HTTP
//! layer would.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use pagelens::{
    BackoffPolicy, DocumentRenderer, DocumentService, Environment, ExtractionConfig, FailureClass,
    FieldSpec, InferenceClient, PageError, PageImage, PageStatus, PagelensError,
};
use pagelens::pipeline::infer::InferenceOutcome;

// ── Mock renderer ────────────────────────────────────────────────────────

/// Renderer returning synthetic rasters, counting every render call.
struct MockRenderer {
    pages: usize,
    renders: AtomicUsize,
}

impl MockRenderer {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            renders: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DocumentRenderer for MockRenderer {
    async fn open(&self, _path: &Path) -> Result<usize, PagelensError> {
        Ok(self.pages)
    }

    async fn render_page(
        &self,
        _path: &Path,
        index: usize,
        scale: f32,
    ) -> Result<PageImage, PageError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(PageImage {
            index,
            width: (200.0 * scale) as u32,
            height: (300.0 * scale) as u32,
            scale,
            png: vec![index as u8; 8],
        })
    }
}

// ── Scripted inference client ────────────────────────────────────────────

/// Per-page scripts of outcomes. Each call pops the next entry; the last
/// entry repeats once the script is exhausted. Call instants are recorded
/// per page so tests can assert on backoff spacing.
struct ScriptedClient {
    scripts: Mutex<HashMap<usize, Vec<InferenceOutcome>>>,
    calls: AtomicUsize,
    call_times: Mutex<HashMap<usize, Vec<Instant>>>,
    response_delay: Duration,
}

impl ScriptedClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(HashMap::new()),
            response_delay: Duration::ZERO,
        })
    }

    fn delayed(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(HashMap::new()),
            response_delay: delay,
        })
    }

    fn script(self: &Arc<Self>, page: usize, outcomes: Vec<InferenceOutcome>) -> Arc<Self> {
        self.scripts.lock().unwrap().insert(page, outcomes);
        Arc::clone(self)
    }

    fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn times_for(&self, page: usize) -> Vec<Instant> {
        self.call_times
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .unwrap_or_default()
    }
}

fn success(title: &str) -> InferenceOutcome {
    let mut map = Map::new();
    map.insert("drawing_title".into(), Value::String(title.into()));
    map.insert("drawing_number".into(), Value::String("A-101".into()));
    InferenceOutcome::Success(map)
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn infer(
        &self,
        image: &PageImage,
        _fields: &[FieldSpec],
        _timeout: Duration,
    ) -> InferenceOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times
            .lock()
            .unwrap()
            .entry(image.index)
            .or_default()
            .push(Instant::now());
        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&image.index) {
            Some(outcomes) if outcomes.len() > 1 => outcomes.remove(0),
            Some(outcomes) => outcomes
                .first()
                .cloned()
                .unwrap_or_else(|| success("default")),
            None => success("default"),
        }
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("drawing_title", "The title of the drawing"),
        FieldSpec::new("drawing_number", "The drawing sheet number"),
    ]
}

/// Fast-config variant for tests: millisecond backoff, tiny page delay.
fn test_config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .inter_page_delay(Duration::from_millis(1))
        .first_page_timeout(Duration::from_secs(2))
        .infer_timeout(Duration::from_secs(1))
        .backoff(BackoffPolicy {
            base_delay: Duration::from_millis(40),
            cap_delay: Duration::from_millis(500),
            not_ready_attempts: 8,
            transient_attempts: 3,
        })
        .build()
        .expect("valid test config")
}

fn service(
    config: ExtractionConfig,
    renderer: Arc<MockRenderer>,
    client: Arc<ScriptedClient>,
) -> DocumentService {
    DocumentService::with_collaborators(config, renderer, client).expect("service builds")
}

/// Poll until every page is terminal, panicking after 5 seconds.
async fn wait_complete(service: &DocumentService, processing_id: Uuid) -> Vec<pagelens::PageExtraction> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = service.extraction_status(processing_id).expect("run exists");
        if status.is_complete() {
            return status.pages;
        }
        assert!(Instant::now() < deadline, "extraction did not complete in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn all_pages_succeed_first_attempt() {
    let client = ScriptedClient::new();
    let svc = service(test_config(), MockRenderer::new(3), Arc::clone(&client));

    let opened = svc.open_document(b"doc".to_vec()).await.unwrap();
    assert_eq!(opened.page_count, 3);
    let session = opened.session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    assert_eq!(started.page_count, 3);

    let pages = wait_complete(&svc, started.processing_id).await;
    for page in &pages {
        assert_eq!(page.status, PageStatus::Ready);
        assert!(page.ai_generated);
        assert_eq!(page.attempts, 1, "no retries when every call succeeds");
        assert_eq!(
            page.result.as_ref().unwrap()["drawing_number"],
            Value::String("A-101".into())
        );
    }
    // One call per page, nothing more.
    assert_eq!(client.total_calls(), 3);

    // Single-page polling agrees with the full snapshot.
    let single = svc.extraction_page_status(started.processing_id, 2).unwrap();
    assert_eq!(single.status, PageStatus::Ready);
    assert!(matches!(
        svc.extraction_page_status(started.processing_id, 9),
        Err(PagelensError::PageOutOfRange { page: 9, total: 3 })
    ));
}

#[tokio::test]
async fn model_error_skips_retries_and_falls_back() {
    let client = ScriptedClient::new().script(
        1,
        vec![InferenceOutcome::ModelError("unparseable reply".into())],
    );
    let svc = service(test_config(), MockRenderer::new(3), Arc::clone(&client));

    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    let pages = wait_complete(&svc, started.processing_id).await;

    // Middle page fell back after exactly one attempt.
    assert_eq!(pages[1].status, PageStatus::FallbackReady);
    assert!(!pages[1].ai_generated);
    assert_eq!(pages[1].attempts, 1, "model errors are never retried");
    assert_eq!(pages[1].last_failure, Some(FailureClass::ModelError));

    // Neighbouring pages are untouched by the failure.
    assert_eq!(pages[0].status, PageStatus::Ready);
    assert_eq!(pages[2].status, PageStatus::Ready);
}

#[tokio::test]
async fn transient_failures_retry_with_doubling_backoff() {
    let client = ScriptedClient::new().script(
        0,
        vec![
            InferenceOutcome::ServiceUnavailable,
            InferenceOutcome::ServiceUnavailable,
            success("Floor Plan"),
        ],
    );
    let svc = service(test_config(), MockRenderer::new(1), Arc::clone(&client));

    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    let pages = wait_complete(&svc, started.processing_id).await;

    assert_eq!(pages[0].status, PageStatus::Ready);
    assert_eq!(pages[0].attempts, 3);

    // Two backoff gaps, the second at least double the base delay.
    let times = client.times_for(0);
    assert_eq!(times.len(), 3);
    let gap1 = times[1] - times[0];
    let gap2 = times[2] - times[1];
    assert!(gap1 >= Duration::from_millis(40), "first gap {gap1:?}");
    assert!(gap2 >= Duration::from_millis(80), "second gap {gap2:?}");
}

#[tokio::test]
async fn disallowed_fallback_errors_every_page() {
    let client = ScriptedClient::new()
        .script(0, vec![InferenceOutcome::Timeout])
        .script(1, vec![InferenceOutcome::Timeout]);
    let config = ExtractionConfig::builder()
        .inter_page_delay(Duration::from_millis(1))
        .first_page_timeout(Duration::from_secs(2))
        .allow_dummy_data(false)
        .backoff(BackoffPolicy {
            base_delay: Duration::from_millis(10),
            cap_delay: Duration::from_millis(100),
            not_ready_attempts: 8,
            transient_attempts: 3,
        })
        .build()
        .unwrap();
    let svc = service(config, MockRenderer::new(2), Arc::clone(&client));

    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    let pages = wait_complete(&svc, started.processing_id).await;

    for page in &pages {
        assert_eq!(page.status, PageStatus::Errored);
        assert!(page.result.is_none());
        assert!(matches!(
            page.error,
            Some(PageError::FallbackDisallowed { .. })
        ));
        // Timeout budget is the transient budget.
        assert_eq!(page.attempts, 3);
    }
}

#[tokio::test]
async fn concurrent_page_fetches_share_one_render() {
    let renderer = MockRenderer::new(1);
    let svc = service(test_config(), Arc::clone(&renderer), ScriptedClient::new());

    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let (a, b) = tokio::join!(svc.get_page(session, 0), svc.get_page(session, 0));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&a, &b), "both callers see the same cached image");
    assert_eq!(a.width, 800);
    assert_eq!(a.height, 1200);
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_budget_is_a_ceiling() {
    // Service never becomes ready; the long not-ready budget applies.
    let client = ScriptedClient::new().script(0, vec![InferenceOutcome::NotReadyYet]);
    let config = ExtractionConfig::builder()
        .inter_page_delay(Duration::from_millis(1))
        .first_page_timeout(Duration::from_secs(5))
        .backoff(BackoffPolicy {
            base_delay: Duration::from_millis(5),
            cap_delay: Duration::from_millis(20),
            not_ready_attempts: 4,
            transient_attempts: 2,
        })
        .build()
        .unwrap();
    let svc = service(config, MockRenderer::new(1), Arc::clone(&client));

    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    let pages = wait_complete(&svc, started.processing_id).await;

    assert_eq!(pages[0].status, PageStatus::FallbackReady);
    assert_eq!(pages[0].attempts, 4);
    assert_eq!(client.total_calls(), 4);
}

#[tokio::test]
async fn force_dummy_never_invokes_inference() {
    let client = ScriptedClient::new();
    let renderer = MockRenderer::new(3);
    let config = ExtractionConfig::builder()
        .inter_page_delay(Duration::from_millis(1))
        .force_dummy_data(true)
        .build()
        .unwrap();
    let svc = service(config, Arc::clone(&renderer), Arc::clone(&client));

    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    let pages = wait_complete(&svc, started.processing_id).await;

    for page in &pages {
        assert_eq!(page.status, PageStatus::FallbackReady);
        assert!(!page.ai_generated);
        let result = page.result.as_ref().unwrap();
        assert_eq!(result["ai_generated"], Value::Bool(false));
        assert_eq!(result["source"], "placeholder");
    }
    assert_eq!(client.total_calls(), 0, "inference must never run");
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn production_with_dummy_data_refuses_to_start() {
    let config = ExtractionConfig::builder()
        .environment(Environment::Production)
        .allow_dummy_data(true)
        .build()
        .unwrap();
    let err = DocumentService::with_collaborators(config, MockRenderer::new(1), ScriptedClient::new())
        .unwrap_err();
    assert!(matches!(err, PagelensError::ProductionSafetyViolation));
}

#[tokio::test]
async fn deleted_session_rejects_all_references() {
    let svc = service(test_config(), MockRenderer::new(2), ScriptedClient::new());
    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    wait_complete(&svc, started.processing_id).await;

    svc.delete_session(session);
    svc.delete_session(session); // idempotent

    let err = svc.get_page(session, 0).await.unwrap_err();
    assert!(matches!(err, PagelensError::SessionNotFound { .. }));
    let err = svc.page_count(session).unwrap_err();
    assert!(matches!(err, PagelensError::SessionNotFound { .. }));

    // Runs tied to the session are cancelled and discarded with it.
    let err = svc.extraction_status(started.processing_id).unwrap_err();
    assert!(matches!(err, PagelensError::ProcessingNotFound { .. }));
}

#[tokio::test]
async fn terminal_states_never_regress() {
    let svc = service(test_config(), MockRenderer::new(2), ScriptedClient::new());
    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    wait_complete(&svc, started.processing_id).await;

    // Repeated polling after completion observes only terminal states.
    for _ in 0..10 {
        let status = svc.extraction_status(started.processing_id).unwrap();
        for page in &status.pages {
            assert!(page.status.is_terminal(), "regressed to {:?}", page.status);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

// ── First-page eagerness ─────────────────────────────────────────────────

#[tokio::test]
async fn start_returns_first_page_when_fast() {
    let svc = service(test_config(), MockRenderer::new(3), ScriptedClient::new());
    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();

    let first = started.first_page.expect("page 0 within the wait window");
    assert_eq!(first.status, PageStatus::Ready);
    assert!(first.result.is_some());
}

#[tokio::test]
async fn start_returns_without_first_page_when_slow() {
    // Inference takes far longer than the first-page window.
    let client = ScriptedClient::delayed(Duration::from_millis(300));
    let config = ExtractionConfig::builder()
        .inter_page_delay(Duration::from_millis(1))
        .first_page_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let svc = service(config, MockRenderer::new(1), Arc::clone(&client));

    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();
    assert!(started.first_page.is_none(), "caller is told to poll");

    // The run still finishes in the background.
    let pages = wait_complete(&svc, started.processing_id).await;
    assert_eq!(pages[0].status, PageStatus::Ready);
}

#[tokio::test]
async fn cleanup_is_idempotent_and_forgets_the_run() {
    let svc = service(test_config(), MockRenderer::new(1), ScriptedClient::new());
    let session = svc.open_document(b"doc".to_vec()).await.unwrap().session_id;
    let started = svc.start_extraction(session, fields()).await.unwrap();

    svc.cleanup_extraction(started.processing_id);
    svc.cleanup_extraction(started.processing_id);
    let err = svc.extraction_status(started.processing_id).unwrap_err();
    assert!(matches!(err, PagelensError::ProcessingNotFound { .. }));
}

#[tokio::test]
async fn unknown_ids_are_rejected() {
    let svc = service(test_config(), MockRenderer::new(1), ScriptedClient::new());
    let err = svc
        .start_extraction(Uuid::new_v4(), fields())
        .await
        .unwrap_err();
    assert!(matches!(err, PagelensError::SessionNotFound { .. }));
    let err = svc.extraction_status(Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, PagelensError::ProcessingNotFound { .. }));
}
