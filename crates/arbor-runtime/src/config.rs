//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// How queued events are turned into render passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
  /// One render pass (and one emitted rendering) per applied event.
  #[default]
  PerAction,
  /// Apply every event already queued, then render once. Draining stops early when the root
  /// emits an output so that each output is paired with the rendering that produced it.
  DrainQueue,
}

/// Configuration for a [`WorkflowRuntime`](crate::WorkflowRuntime).
///
/// ```json
/// { "batching": "drain_queue", "render_only_when_state_changes": true }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  pub batching: BatchPolicy,
  /// Skip the render pass after events whose actions all reported unchanged state. Outputs
  /// are still delivered.
  pub render_only_when_state_changes: bool,
}

impl RuntimeConfig {
  /// Parse a JSON configuration document. Missing fields take their defaults.
  pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
    serde_json::from_str(json).map_err(|e| RuntimeError::Config {
      message: e.to_string(),
    })
  }
}
