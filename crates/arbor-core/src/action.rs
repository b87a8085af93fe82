//! State transitions.

use std::borrow::Cow;
use std::fmt;

/// Result of applying a [`WorkflowAction`]: the replacement state and an optional output.
///
/// `output: None` means nothing was emitted. When `O` is itself an `Option`, emitting an
/// explicit empty value is `Some(None)`, which the runtime delivers like any other output.
///
/// `state_changed` tells a runtime configured to render only on state changes whether this
/// update needs a new render pass.
pub struct Update<S, O> {
  pub state: S,
  pub output: Option<O>,
  pub state_changed: bool,
}

impl<S, O> Update<S, O> {
  /// New state, no output.
  pub fn state(state: S) -> Self {
    Self {
      state,
      output: None,
      state_changed: true,
    }
  }

  /// New state and an output for the parent (or the runtime's consumer at the root).
  pub fn with_output(state: S, output: O) -> Self {
    Self {
      state,
      output: Some(output),
      state_changed: true,
    }
  }

  /// The state handed back as it was.
  pub fn unchanged(state: S) -> Self {
    Self {
      state,
      output: None,
      state_changed: false,
    }
  }

  /// The state handed back as it was, plus an output.
  pub fn unchanged_with_output(state: S, output: O) -> Self {
    Self {
      state,
      output: Some(output),
      state_changed: false,
    }
  }

  /// New state, marked changed only when it differs from `previous`.
  pub fn compared(previous: &S, state: S) -> Self
  where
    S: PartialEq,
  {
    Self {
      state_changed: *previous != state,
      state,
      output: None,
    }
  }
}

type ApplyFn<P, S, O> = Box<dyn FnOnce(&P, S) -> Update<S, O> + Send>;

/// A named, atomic state transition for a workflow with props `P`, state `S` and output `O`.
///
/// Applying an action takes the current state by value and returns the state that replaces
/// it, so partial updates are never observable.
pub struct WorkflowAction<P, S, O> {
  name: Cow<'static, str>,
  apply: ApplyFn<P, S, O>,
}

impl<P, S, O> WorkflowAction<P, S, O> {
  pub fn new(
    name: impl Into<Cow<'static, str>>,
    apply: impl FnOnce(&P, S) -> Update<S, O> + Send + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      apply: Box::new(apply),
    }
  }

  /// Action that only replaces the state.
  pub fn update_state(
    name: impl Into<Cow<'static, str>>,
    update: impl FnOnce(&P, S) -> S + Send + 'static,
  ) -> Self {
    Self::new(name, move |props, state| Update::state(update(props, state)))
  }

  /// Action that keeps the state and emits `output`.
  pub fn emit_output(name: impl Into<Cow<'static, str>>, output: O) -> Self
  where
    O: Send + 'static,
  {
    Self::new(name, move |_, state| Update::unchanged_with_output(state, output))
  }

  /// Action that changes nothing.
  pub fn no_op() -> Self {
    Self::new("noAction", |_, state| Update::unchanged(state))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Apply the transition.
  pub fn apply(self, props: &P, state: S) -> Update<S, O> {
    (self.apply)(props, state)
  }
}

impl<P, S, O> fmt::Debug for WorkflowAction<P, S, O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "WorkflowAction({})", self.name)
  }
}
