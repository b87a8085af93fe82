//! What a workflow can do while rendering.

use std::future::Future;
use std::sync::Arc;

use arbor_core::Worker;

use crate::error::Result;
use crate::pass::RenderPass;
use crate::session::WorkflowSession;
use crate::sink::Sink;
use crate::subtree::SubtreeManager;
use crate::tasks::TaskManager;
use crate::workflow::{ActionOf, Workflow};

/// A callback for UI events that turns each event into an action for the rendering workflow.
pub type EventHandler<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Handed to [`Workflow::render`]. Everything requested through it is reconciled against the
/// previous render pass once `render` returns.
pub struct RenderContext<'a, W: Workflow> {
  session: &'a Arc<WorkflowSession>,
  subtree: &'a mut SubtreeManager<W>,
  tasks: &'a mut TaskManager<W>,
  pass: &'a mut RenderPass,
}

impl<'a, W: Workflow> RenderContext<'a, W> {
  pub(crate) fn new(
    session: &'a Arc<WorkflowSession>,
    subtree: &'a mut SubtreeManager<W>,
    tasks: &'a mut TaskManager<W>,
    pass: &'a mut RenderPass,
  ) -> Self {
    Self {
      session,
      subtree,
      tasks,
      pass,
    }
  }

  pub fn session(&self) -> &WorkflowSession {
    self.session
  }

  /// Render `child` under `key` and return its rendering.
  ///
  /// The child keeps its state across passes as long as each pass renders a child with the
  /// same identifier and key. Outputs the child emits are turned into actions for this
  /// workflow by `handler`. Rendering the same identifier and key twice in one pass fails.
  pub fn render_child<C, H>(
    &mut self,
    child: C,
    props: C::Props,
    key: &str,
    handler: H,
  ) -> Result<C::Rendering>
  where
    C: Workflow,
    H: Fn(C::Output) -> ActionOf<W> + Send + 'static,
  {
    self
      .subtree
      .render_child(self.session, child, props, key, handler, self.pass)
  }

  /// Keep `worker` running under `key`. Each output becomes an action for this workflow.
  ///
  /// A worker requested again in the next pass keeps running if
  /// [`Worker::does_same_work_as`] holds for the new value, and is restarted otherwise. A
  /// worker that is not requested again is cancelled. Work starts only after the whole pass
  /// completes.
  pub fn run_worker<K, H>(&mut self, worker: K, key: &str, handler: H) -> Result<()>
  where
    K: Worker,
    H: Fn(K::Output) -> ActionOf<W> + Send + 'static,
  {
    self
      .tasks
      .run_worker(self.session.session_id, worker, key, handler, self.pass)
  }

  /// Keep `effect` running under `key` while passes keep requesting the key.
  pub fn run_side_effect<F>(&mut self, key: &str, effect: F) -> Result<()>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self
      .tasks
      .run_side_effect(self.session.session_id, key, effect, self.pass)
  }

  /// A sink for sending actions to this workflow from outside the render pass.
  pub fn action_sink(&self) -> Sink<W> {
    Sink::new(self.session.session_id, self.pass.events.clone())
  }

  /// Wrap `to_action` into a callback that sends the resulting action to this workflow.
  pub fn event_handler<E: 'static>(
    &self,
    to_action: impl Fn(E) -> ActionOf<W> + Send + Sync + 'static,
  ) -> EventHandler<E> {
    let sink = self.action_sink();
    Arc::new(move |event| sink.send(to_action(event)))
  }
}
