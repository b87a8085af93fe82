use thiserror::Error;

/// Errors produced while decoding persisted workflow state.
///
/// A malformed blob means the bytes came from an incompatible build or were corrupted in
/// storage. Callers treat these as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
  #[error("malformed snapshot: {message}")]
  MalformedSnapshot { message: String },
}

impl CoreError {
  /// Create a malformed snapshot error.
  pub fn malformed(message: impl Into<String>) -> Self {
    Self::MalformedSnapshot {
      message: message.into(),
    }
  }
}
