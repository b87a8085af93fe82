//! The workflow trait.

use arbor_core::{Snapshot, WorkflowAction, WorkflowIdentifier};

use crate::context::RenderContext;
use crate::error::Result;

/// A state machine that renders a view of itself and may emit outputs to its parent.
///
/// A workflow value is a description: the runtime owns its state and keeps one node per
/// running instance. The workflow value passed on each render pass replaces the previous one,
/// so it should carry configuration only.
pub trait Workflow: Sized + Send + 'static {
  /// Input from the parent. A render whose props differ from the previous ones triggers
  /// [`Workflow::on_props_changed`] first.
  type Props: Clone + PartialEq + Send + 'static;
  type State: Send + 'static;
  /// Values bubbled up to the parent's output handler.
  type Output: Send + 'static;
  type Rendering: 'static;

  /// Identity used to match this workflow across render passes and in snapshots.
  fn identifier(&self) -> WorkflowIdentifier {
    WorkflowIdentifier::of::<Self>()
  }

  /// Create the state for a new node, restoring from `snapshot` when one was persisted.
  fn initial_state(&self, props: &Self::Props, snapshot: Option<&Snapshot>) -> Result<Self::State>;

  /// Called before a render when the parent passes props unequal to the previous ones.
  fn on_props_changed(
    &self,
    _old: &Self::Props,
    _new: &Self::Props,
    state: Self::State,
  ) -> Result<Self::State> {
    Ok(state)
  }

  /// Produce the rendering. Must not change state directly: send actions through
  /// [`RenderContext::action_sink`] or return them from output handlers instead.
  fn render(
    &self,
    props: &Self::Props,
    state: &Self::State,
    context: &mut RenderContext<'_, Self>,
  ) -> Result<Self::Rendering>;

  /// Persist `state`. `None` means the workflow keeps nothing.
  fn snapshot_state(&self, _state: &Self::State) -> Option<Snapshot> {
    None
  }
}

/// The action type a workflow `W` accepts.
pub type ActionOf<W> =
  WorkflowAction<<W as Workflow>::Props, <W as Workflow>::State, <W as Workflow>::Output>;
