//! Inference collaborator: trait, outcome classification, and the HTTP client.
//!
//! The orchestrator never sees HTTP status codes. Every call resolves to an
//! [`InferenceOutcome`], a four-way classification that drives the retry and
//! fallback machinery:
//!
//! * `NotReadyYet`   — accepted but still processing; retry patiently
//! * `ServiceUnavailable` / `Timeout` — the service is struggling; retry
//!   briefly, then give up
//! * `ModelError`    — the model ran and produced garbage; retrying the same
//!   image is pointless, go straight to the fallback gate
//! * `Success`       — parsed field map, done
//!
//! The mapping from transport responses to these classes is a convention of
//! the service we talk to, not a protocol, and lives entirely in
//! [`HttpInferenceClient`] so tests can script outcomes directly.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::pipeline::render::PageImage;

/// One requested extraction field: the key the caller wants and a prose
/// description the model uses to find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Failure classification for a completed inference attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// The service accepted the work but the result is not ready.
    NotReadyYet,
    /// The service could not be reached or refused the request.
    ServiceUnavailable,
    /// The per-call deadline elapsed.
    Timeout,
    /// The model processed the request but failed to produce valid output.
    ModelError,
}

/// Classified result of one inference call.
#[derive(Debug, Clone)]
pub enum InferenceOutcome {
    /// Field name → extracted value (or `Null` where nothing was found).
    Success(Map<String, Value>),
    NotReadyYet,
    ModelError(String),
    ServiceUnavailable,
    Timeout,
}

impl InferenceOutcome {
    /// The failure class of a non-success outcome.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            InferenceOutcome::Success(_) => None,
            InferenceOutcome::NotReadyYet => Some(FailureClass::NotReadyYet),
            InferenceOutcome::ModelError(_) => Some(FailureClass::ModelError),
            InferenceOutcome::ServiceUnavailable => Some(FailureClass::ServiceUnavailable),
            InferenceOutcome::Timeout => Some(FailureClass::Timeout),
        }
    }
}

/// The inference collaborator the orchestrator drives, one call per page.
///
/// Implementations must classify every failure into an outcome — an `Err`
/// channel would tempt callers to collapse the four-way distinction that
/// the retry budgets depend on.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(
        &self,
        image: &PageImage,
        fields: &[FieldSpec],
        timeout: Duration,
    ) -> InferenceOutcome;
}

// ── HTTP implementation ──────────────────────────────────────────────────

/// Client for an OpenAI-compatible vision endpoint (vLLM, Ollama, etc.).
pub struct HttpInferenceClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: "vision-model".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(
        &self,
        image: &PageImage,
        fields: &[FieldSpec],
        timeout: Duration,
    ) -> InferenceOutcome {
        let prompt = build_extraction_prompt(fields);
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(&image.png));

        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
            "max_tokens": 4000,
            "temperature": 0.1,
        });

        let response = match self
            .http
            .post(self.chat_url())
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!("inference call timed out after {:?}", timeout);
                return InferenceOutcome::Timeout;
            }
            Err(e) if e.is_connect() => {
                warn!("inference service unreachable: {e}");
                return InferenceOutcome::ServiceUnavailable;
            }
            Err(e) => {
                warn!("inference request failed: {e}");
                return InferenceOutcome::ServiceUnavailable;
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Service convention: the page result does not exist yet.
            return InferenceOutcome::NotReadyYet;
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return InferenceOutcome::ServiceUnavailable;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return InferenceOutcome::ModelError(format!("HTTP {status}: {body}"));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return InferenceOutcome::ModelError(format!("invalid response body: {e}")),
        };

        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str);
        let Some(content) = content else {
            return InferenceOutcome::ModelError("response missing message content".into());
        };

        debug!("inference returned {} chars", content.len());
        match parse_extraction(content, fields) {
            Some(map) => InferenceOutcome::Success(map),
            None => InferenceOutcome::ModelError(format!(
                "model returned non-JSON content: {}",
                truncate(content, 120)
            )),
        }
    }
}

// ── Prompt & response handling ───────────────────────────────────────────

/// Build the structured extraction prompt from the requested fields.
///
/// The model is told to answer with a JSON object only, using `null` for
/// fields it cannot find — anything else is a model error.
pub fn build_extraction_prompt(fields: &[FieldSpec]) -> String {
    let mut listing = String::new();
    for field in fields {
        listing.push_str(&format!("- {}: {}\n", field.name, field.description));
    }

    format!(
        "You are an expert document analyzer. Extract the following information \
         from the provided document image:\n\n{listing}\n\
         Instructions:\n\
         1. Analyze the document image carefully\n\
         2. Extract the requested information accurately\n\
         3. Return the results in valid JSON format only\n\
         4. Use null for fields that cannot be found or are unclear\n\
         5. Be precise and conservative - only extract information you are confident about\n\n\
         Do not include any explanatory text, only return the JSON object."
    )
}

/// Parse the model's reply into a field→value map.
///
/// Tolerates a fenced code block around the JSON. Fields the model omitted
/// are filled with `null`; extra keys the model invented are dropped.
pub fn parse_extraction(content: &str, fields: &[FieldSpec]) -> Option<Map<String, Value>> {
    let trimmed = strip_code_fence(content.trim());
    let parsed: Value = serde_json::from_str(trimmed).ok()?;
    let object = parsed.as_object()?;

    let mut result = Map::with_capacity(fields.len());
    for field in fields {
        let value = object.get(&field.name).cloned().unwrap_or(Value::Null);
        result.insert(field.name.clone(), value);
    }
    Some(result)
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("drawing_title", "The title of the drawing"),
            FieldSpec::new("drawing_number", "The drawing sheet number"),
        ]
    }

    #[test]
    fn prompt_lists_every_field() {
        let prompt = build_extraction_prompt(&fields());
        assert!(prompt.contains("- drawing_title: The title of the drawing"));
        assert!(prompt.contains("- drawing_number:"));
        assert!(prompt.contains("null"));
    }

    #[test]
    fn parse_plain_json() {
        let map = parse_extraction(
            r#"{"drawing_title": "Floor Plan", "drawing_number": "A-101"}"#,
            &fields(),
        )
        .unwrap();
        assert_eq!(map["drawing_title"], "Floor Plan");
        assert_eq!(map["drawing_number"], "A-101");
    }

    #[test]
    fn parse_fenced_json() {
        let content = "```json\n{\"drawing_title\": \"Site Plan\"}\n```";
        let map = parse_extraction(content, &fields()).unwrap();
        assert_eq!(map["drawing_title"], "Site Plan");
        // Omitted field comes back null, not missing.
        assert_eq!(map["drawing_number"], Value::Null);
    }

    #[test]
    fn parse_drops_invented_keys() {
        let map = parse_extraction(
            r#"{"drawing_title": "X", "hallucinated": true}"#,
            &fields(),
        )
        .unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("hallucinated"));
    }

    #[test]
    fn parse_rejects_prose() {
        assert!(parse_extraction("The title is Floor Plan.", &fields()).is_none());
    }

    #[test]
    fn failure_class_mapping() {
        assert_eq!(
            InferenceOutcome::Timeout.failure_class(),
            Some(FailureClass::Timeout)
        );
        assert_eq!(
            InferenceOutcome::ModelError("x".into()).failure_class(),
            Some(FailureClass::ModelError)
        );
        assert_eq!(
            InferenceOutcome::Success(Map::new()).failure_class(),
            None
        );
    }
}
