//! Fallback policy gate: decides when placeholder data may stand in for a
//! failed extraction.
//!
//! Placeholder substitution is dangerous by construction, so the gate is the
//! only place in the crate allowed to make that call, and it is validated
//! once at startup. A production deployment with `allow_dummy_data = true`
//! refuses to start at all rather than risk serving synthetic results.

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::ExtractionConfig;
use crate::error::PagelensError;
use crate::pipeline::infer::FieldSpec;

/// Per-page decision for a failed extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Substitute a placeholder result and mark the page `FallbackReady`.
    Placeholder,
    /// Surface the failure; the page ends `Errored`.
    Fail,
}

/// Startup-validated view of the fallback configuration.
#[derive(Debug, Clone)]
pub struct FallbackGate {
    allow_dummy_data: bool,
    force_dummy_data: bool,
}

impl FallbackGate {
    /// Validate the configuration and build the gate.
    ///
    /// Fails with [`PagelensError::ProductionSafetyViolation`] when dummy
    /// data is enabled in a production environment. Callers must treat this
    /// as fatal at startup, before any request is served.
    pub fn new(config: &ExtractionConfig) -> Result<Self, PagelensError> {
        if config.environment.is_production() && config.allow_dummy_data {
            return Err(PagelensError::ProductionSafetyViolation);
        }
        if config.force_dummy_data {
            warn!("FORCE_DUMMY_DATA is set: inference will never be invoked");
        }
        info!(
            environment = %config.environment,
            allow_dummy_data = config.allow_dummy_data,
            force_dummy_data = config.force_dummy_data,
            "fallback gate validated"
        );
        Ok(Self {
            allow_dummy_data: config.allow_dummy_data,
            force_dummy_data: config.force_dummy_data,
        })
    }

    /// Whether every page should be synthesized without invoking inference.
    pub fn force_dummy(&self) -> bool {
        self.force_dummy_data
    }

    /// Decide what happens to a page whose inference ultimately failed.
    pub fn decide(&self) -> FallbackDecision {
        if self.allow_dummy_data || self.force_dummy_data {
            FallbackDecision::Placeholder
        } else {
            FallbackDecision::Fail
        }
    }
}

/// Synthesize a deterministic placeholder result for the requested fields.
///
/// Every value is clearly synthetic and the map carries an `ai_generated:
/// false` marker so downstream consumers can always tell placeholder output
/// from a real extraction.
pub fn placeholder_result(fields: &[FieldSpec], page: usize) -> Map<String, Value> {
    let mut result = Map::with_capacity(fields.len() + 2);
    for field in fields {
        result.insert(
            field.name.clone(),
            Value::String(format!("placeholder {} (page {})", field.name, page + 1)),
        );
    }
    result.insert("ai_generated".to_string(), Value::Bool(false));
    result.insert("source".to_string(), Value::String("placeholder".to_string()));
    result
}
