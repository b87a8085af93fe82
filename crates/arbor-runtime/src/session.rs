//! Workflow sessions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_core::{WorkflowIdentifier, WorkflowNodeId};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique id. Ids are never reused.
pub(crate) fn next_session_id() -> u64 {
  NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One continuous run of a workflow node.
///
/// A session begins when the node is created and ends for good when it is torn down. If the
/// same identifier and key are rendered again later, that is a new session with a new id.
/// The session id is also the node's address for actions.
#[derive(Debug)]
pub struct WorkflowSession {
  pub identifier: WorkflowIdentifier,
  pub render_key: String,
  pub session_id: u64,
  pub parent: Option<Arc<WorkflowSession>>,
}

impl WorkflowSession {
  pub(crate) fn root(identifier: WorkflowIdentifier) -> Arc<Self> {
    Arc::new(Self {
      identifier,
      render_key: String::new(),
      session_id: next_session_id(),
      parent: None,
    })
  }

  pub(crate) fn child(parent: &Arc<WorkflowSession>, id: &WorkflowNodeId) -> Arc<Self> {
    Arc::new(Self {
      identifier: id.identifier.clone(),
      render_key: id.name.clone(),
      session_id: next_session_id(),
      parent: Some(parent.clone()),
    })
  }

  pub fn is_root(&self) -> bool {
    self.parent.is_none()
  }

  /// Number of ancestors.
  pub fn depth(&self) -> usize {
    std::iter::successors(self.parent.as_deref(), |s| s.parent.as_deref()).count()
  }
}

impl fmt::Display for WorkflowSession {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.identifier, self.session_id)?;
    if !self.render_key.is_empty() {
      write!(f, "[{}]", self.render_key)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ids_are_unique_and_parents_tracked() {
    let root = WorkflowSession::root(WorkflowIdentifier::from_type_name("Root"));
    let id = WorkflowNodeId::new(WorkflowIdentifier::from_type_name("Child"), "a");
    let first = WorkflowSession::child(&root, &id);
    let second = WorkflowSession::child(&root, &id);

    assert!(root.is_root());
    assert_eq!(first.depth(), 1);
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(first.to_string(), format!("Child#{}[a]", first.session_id));
  }
}
