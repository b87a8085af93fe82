//! Hooks around every workflow in a tree.
//!
//! Interceptors see type-erased values because one interceptor observes workflows of many
//! types. Hooks that wrap a call receive a `proceed` callback running the rest of the chain
//! and finally the workflow itself. An interceptor may skip `proceed` or substitute its own
//! value, but a substituted value of the wrong type stops the runtime with
//! [`RuntimeError::TypeMismatch`](crate::RuntimeError::TypeMismatch).

use std::any::Any;
use std::sync::Arc;

use arbor_core::Snapshot;
use tracing::{debug, trace};

use crate::error::Result;
use crate::session::WorkflowSession;

/// A workflow's state with its type erased.
pub type ErasedState = Box<dyn Any + Send>;

/// A workflow's rendering with its type erased.
pub type ErasedRendering = Box<dyn Any>;

/// Observes or wraps the lifecycle of every workflow node.
///
/// All methods default to pass-through.
pub trait WorkflowInterceptor: Send + Sync {
  fn on_session_started(&self, _session: &WorkflowSession) {}

  fn on_initial_state(
    &self,
    _props: &dyn Any,
    _snapshot: Option<&Snapshot>,
    _session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Result<ErasedState>,
  ) -> Result<ErasedState> {
    proceed()
  }

  fn on_props_changed(
    &self,
    _old: &dyn Any,
    _new: &dyn Any,
    state: ErasedState,
    _session: &WorkflowSession,
    proceed: &mut dyn FnMut(ErasedState) -> Result<ErasedState>,
  ) -> Result<ErasedState> {
    proceed(state)
  }

  fn on_render(
    &self,
    _props: &dyn Any,
    _state: &dyn Any,
    _session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Result<ErasedRendering>,
  ) -> Result<ErasedRendering> {
    proceed()
  }

  fn on_snapshot_state(
    &self,
    _state: &dyn Any,
    _session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Option<Snapshot>,
  ) -> Option<Snapshot> {
    proceed()
  }

  /// Called after an action has been applied to the node's state.
  fn on_action_applied(&self, _action: &str, _emitted_output: bool, _session: &WorkflowSession) {}

  fn on_session_ended(&self, _session: &WorkflowSession) {}
}

/// Interceptors composed in order: the first one listed is outermost.
#[derive(Clone, Default)]
pub struct InterceptorChain {
  interceptors: Arc<[Arc<dyn WorkflowInterceptor>]>,
}

impl InterceptorChain {
  pub fn new(interceptors: Vec<Arc<dyn WorkflowInterceptor>>) -> Self {
    Self {
      interceptors: interceptors.into(),
    }
  }

  pub fn len(&self) -> usize {
    self.interceptors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.interceptors.is_empty()
  }

  fn initial_state_at(
    &self,
    index: usize,
    props: &dyn Any,
    snapshot: Option<&Snapshot>,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Result<ErasedState>,
  ) -> Result<ErasedState> {
    match self.interceptors.get(index) {
      None => proceed(),
      Some(interceptor) => interceptor.on_initial_state(props, snapshot, session, &mut || {
        self.initial_state_at(index + 1, props, snapshot, session, proceed)
      }),
    }
  }

  fn props_changed_at(
    &self,
    index: usize,
    old: &dyn Any,
    new: &dyn Any,
    state: ErasedState,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut(ErasedState) -> Result<ErasedState>,
  ) -> Result<ErasedState> {
    match self.interceptors.get(index) {
      None => proceed(state),
      Some(interceptor) => {
        interceptor.on_props_changed(old, new, state, session, &mut |state: ErasedState| {
          self.props_changed_at(index + 1, old, new, state, session, proceed)
        })
      }
    }
  }

  fn render_at(
    &self,
    index: usize,
    props: &dyn Any,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Result<ErasedRendering>,
  ) -> Result<ErasedRendering> {
    match self.interceptors.get(index) {
      None => proceed(),
      Some(interceptor) => interceptor.on_render(props, state, session, &mut || {
        self.render_at(index + 1, props, state, session, proceed)
      }),
    }
  }

  fn snapshot_state_at(
    &self,
    index: usize,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Option<Snapshot>,
  ) -> Option<Snapshot> {
    match self.interceptors.get(index) {
      None => proceed(),
      Some(interceptor) => interceptor.on_snapshot_state(state, session, &mut || {
        self.snapshot_state_at(index + 1, state, session, proceed)
      }),
    }
  }
}

impl WorkflowInterceptor for InterceptorChain {
  fn on_session_started(&self, session: &WorkflowSession) {
    for interceptor in self.interceptors.iter() {
      interceptor.on_session_started(session);
    }
  }

  fn on_initial_state(
    &self,
    props: &dyn Any,
    snapshot: Option<&Snapshot>,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Result<ErasedState>,
  ) -> Result<ErasedState> {
    self.initial_state_at(0, props, snapshot, session, proceed)
  }

  fn on_props_changed(
    &self,
    old: &dyn Any,
    new: &dyn Any,
    state: ErasedState,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut(ErasedState) -> Result<ErasedState>,
  ) -> Result<ErasedState> {
    self.props_changed_at(0, old, new, state, session, proceed)
  }

  fn on_render(
    &self,
    props: &dyn Any,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Result<ErasedRendering>,
  ) -> Result<ErasedRendering> {
    self.render_at(0, props, state, session, proceed)
  }

  fn on_snapshot_state(
    &self,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Option<Snapshot>,
  ) -> Option<Snapshot> {
    self.snapshot_state_at(0, state, session, proceed)
  }

  fn on_action_applied(&self, action: &str, emitted_output: bool, session: &WorkflowSession) {
    for interceptor in self.interceptors.iter() {
      interceptor.on_action_applied(action, emitted_output, session);
    }
  }

  fn on_session_ended(&self, session: &WorkflowSession) {
    for interceptor in self.interceptors.iter() {
      interceptor.on_session_ended(session);
    }
  }
}

/// Logs every lifecycle step with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

impl WorkflowInterceptor for TracingInterceptor {
  fn on_session_started(&self, session: &WorkflowSession) {
    debug!(
      session_id = session.session_id,
      workflow = %session.identifier,
      key = %session.render_key,
      parent = session.parent.as_ref().map(|p| p.session_id),
      "session_started"
    );
  }

  fn on_render(
    &self,
    _props: &dyn Any,
    _state: &dyn Any,
    session: &WorkflowSession,
    proceed: &mut dyn FnMut() -> Result<ErasedRendering>,
  ) -> Result<ErasedRendering> {
    trace!(session_id = session.session_id, workflow = %session.identifier, "render_started");
    let result = proceed();
    trace!(
      session_id = session.session_id,
      success = result.is_ok(),
      "render_finished"
    );
    result
  }

  fn on_action_applied(&self, action: &str, emitted_output: bool, session: &WorkflowSession) {
    debug!(
      session_id = session.session_id,
      workflow = %session.identifier,
      action,
      emitted_output,
      "action_applied"
    );
  }

  fn on_session_ended(&self, session: &WorkflowSession) {
    debug!(
      session_id = session.session_id,
      workflow = %session.identifier,
      "session_ended"
    );
  }
}
