//! Runtime error types.
//!
//! Every variant is fatal to the runtime loop: it stops the loop and is returned to whatever
//! drives it. Failures inside worker and side-effect tasks never show up here.

use std::fmt::Display;

use arbor_core::CoreError;

/// Errors that stop the workflow runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// Two children with the same identifier and key were rendered in one pass.
  #[error("duplicate child {identifier} with key \"{key}\" in a single render pass")]
  DuplicateChild { identifier: String, key: String },

  /// Two workers of the same type and key were requested in one pass.
  #[error("duplicate worker {worker} with key \"{key}\" in a single render pass")]
  DuplicateWorker { worker: String, key: String },

  /// Two side effects with the same key were requested in one pass.
  #[error("duplicate side effect with key \"{key}\" in a single render pass")]
  DuplicateSideEffect { key: String },

  /// Persisted state could not be decoded.
  #[error("invalid snapshot: {0}")]
  Snapshot(#[from] CoreError),

  /// A workflow's own logic failed in `initial_state`, `on_props_changed` or `render`.
  #[error("workflow {identifier} failed: {message}")]
  Workflow { identifier: String, message: String },

  /// A type-erased value did not have the type the node expected. Raised when an interceptor
  /// substitutes a value of the wrong type, or when two Rust types share an identifier.
  #[error("type mismatch while {context}: expected {expected}")]
  TypeMismatch {
    expected: &'static str,
    context: &'static str,
  },

  /// A node's state was lost to an earlier failure.
  #[error("state of {identifier} is unavailable after an earlier failure")]
  StatePoisoned { identifier: String },

  /// Workers or side effects were requested outside a tokio runtime.
  #[error("no tokio runtime available to start workers and side effects")]
  NoAsyncRuntime,

  /// Runtime configuration could not be read.
  #[error("invalid runtime config: {message}")]
  Config { message: String },
}

impl RuntimeError {
  /// Create a workflow logic error.
  pub fn workflow(identifier: impl Display, message: impl Into<String>) -> Self {
    Self::Workflow {
      identifier: identifier.to_string(),
      message: message.into(),
    }
  }

  pub(crate) fn type_mismatch<T>(context: &'static str) -> Self {
    Self::TypeMismatch {
      expected: std::any::type_name::<T>(),
      context,
    }
  }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;
