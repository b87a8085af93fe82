//! Workflow nodes: the runtime's record of one running workflow instance.

use std::any::Any;
use std::sync::Arc;

use arbor_core::{TreeSnapshot, Update};
use tracing::debug;

use crate::context::RenderContext;
use crate::error::{Result, RuntimeError};
use crate::interceptor::{ErasedRendering, ErasedState, InterceptorChain, WorkflowInterceptor};
use crate::pass::RenderPass;
use crate::session::WorkflowSession;
use crate::sink::{EventPayload, NodeEvent};
use crate::subtree::SubtreeManager;
use crate::tasks::TaskManager;
use crate::workflow::{ActionOf, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
  Created,
  Rendering,
  Idle,
  TornDown,
}

/// Result of routing an event into a subtree.
pub(crate) enum Routed<O> {
  /// No node in the subtree has the event's target session.
  NotFound(NodeEvent),
  /// The target was found but the event no longer applies to it.
  Ignored,
  /// An action was applied. Carries the output of the subtree's root, if any, and whether any
  /// state along the way changed.
  Applied {
    output: Option<O>,
    state_changed: bool,
  },
}

/// What applying one action to a node did.
struct Applied<O> {
  output: Option<O>,
  state_changed: bool,
}

impl<O> Applied<O> {
  fn routed(self) -> Routed<O> {
    Routed::Applied {
      output: self.output,
      state_changed: self.state_changed,
    }
  }
}

/// Node operations that do not depend on the workflow type, so a parent can own children of
/// any type.
pub(crate) trait ErasedNode: Send {
  fn session(&self) -> &Arc<WorkflowSession>;
  fn as_any_mut(&mut self) -> &mut dyn Any;
  fn deliver(
    &mut self,
    event: NodeEvent,
    interceptors: &InterceptorChain,
  ) -> Result<Routed<Box<dyn Any + Send>>>;
  fn snapshot(&self, interceptors: &InterceptorChain) -> TreeSnapshot;
  fn teardown(&mut self, interceptors: &InterceptorChain);
  fn running_task_count(&self) -> usize;
  fn node_count(&self) -> usize;
}

pub(crate) struct WorkflowNode<W: Workflow> {
  session: Arc<WorkflowSession>,
  workflow: W,
  props: W::Props,
  /// `None` only while the state is moved out for a transition.
  state: Option<W::State>,
  lifecycle: Lifecycle,
  subtree: SubtreeManager<W>,
  tasks: TaskManager<W>,
}

fn downcast_state<W: Workflow>(state: ErasedState, context: &'static str) -> Result<W::State> {
  state
    .downcast::<W::State>()
    .map(|state| *state)
    .map_err(|_| RuntimeError::type_mismatch::<W::State>(context))
}

impl<W: Workflow> WorkflowNode<W> {
  /// Create the node and its initial state, restoring from `snapshot` if one was persisted
  /// for this position in the tree.
  pub fn new(
    workflow: W,
    props: W::Props,
    snapshot: Option<TreeSnapshot>,
    session: Arc<WorkflowSession>,
    pass: &mut RenderPass,
  ) -> Result<Self> {
    let (own_snapshot, child_snapshots) = match snapshot {
      Some(snapshot) => {
        let (own, children) = snapshot.into_parts()?;
        (own, Some(children))
      }
      None => (None, None),
    };

    debug!(
      session_id = session.session_id,
      workflow = %session.identifier,
      key = %session.render_key,
      restored = own_snapshot.is_some(),
      "session_started"
    );
    let interceptors = &pass.interceptors;
    interceptors.on_session_started(&session);
    let state = interceptors.on_initial_state(
      &props,
      own_snapshot.as_ref(),
      &session,
      &mut || {
        workflow
          .initial_state(&props, own_snapshot.as_ref())
          .map(|state| Box::new(state) as ErasedState)
      },
    )?;
    let state = downcast_state::<W>(state, "creating initial state")?;

    Ok(Self {
      session,
      workflow,
      props,
      state: Some(state),
      lifecycle: Lifecycle::Created,
      subtree: SubtreeManager::new(child_snapshots),
      tasks: TaskManager::new(),
    })
  }

  fn poisoned(&self) -> RuntimeError {
    RuntimeError::StatePoisoned {
      identifier: self.session.identifier.to_string(),
    }
  }

  fn take_state(&mut self) -> Result<W::State> {
    match self.state.take() {
      Some(state) => Ok(state),
      None => Err(self.poisoned()),
    }
  }

  /// Run one render pass over this node and its subtree.
  ///
  /// `replacement` is the workflow value from the parent's latest render; the node keeps its
  /// previous value when it is `None`.
  pub fn render(
    &mut self,
    replacement: Option<W>,
    props: W::Props,
    pass: &mut RenderPass,
  ) -> Result<W::Rendering> {
    // A node left mid-render by a failed pass has a half-reconciled subtree.
    if self.lifecycle == Lifecycle::Rendering {
      return Err(self.poisoned());
    }
    if let Some(workflow) = replacement {
      self.workflow = workflow;
    }
    if self.lifecycle != Lifecycle::Created && props != self.props {
      self.change_props(props, &pass.interceptors)?;
    } else {
      self.props = props;
    }

    self.lifecycle = Lifecycle::Rendering;
    let interceptors = pass.interceptors.clone();
    let Self {
      session,
      workflow,
      props,
      state,
      subtree,
      tasks,
      ..
    } = self;
    let session: &Arc<WorkflowSession> = session;
    let workflow: &W = workflow;
    let props: &W::Props = props;
    let state = state.as_ref().ok_or_else(|| RuntimeError::StatePoisoned {
      identifier: session.identifier.to_string(),
    })?;

    let mut context = RenderContext::new(session, subtree, tasks, pass);
    let rendering = interceptors.on_render(props, state, session, &mut || {
      workflow
        .render(props, state, &mut context)
        .map(|rendering| Box::new(rendering) as ErasedRendering)
    })?;
    let rendering = rendering
      .downcast::<W::Rendering>()
      .map_err(|_| RuntimeError::type_mismatch::<W::Rendering>("rendering"))?;

    self.subtree.commit(&interceptors);
    self.tasks.commit(self.session.session_id);
    self.lifecycle = Lifecycle::Idle;
    Ok(*rendering)
  }

  fn change_props(&mut self, props: W::Props, interceptors: &InterceptorChain) -> Result<()> {
    let state = self.take_state()?;
    let old = std::mem::replace(&mut self.props, props);
    let workflow = &self.workflow;
    let new = &self.props;
    let state = interceptors.on_props_changed(
      &old,
      new,
      Box::new(state),
      &self.session,
      &mut |state: ErasedState| {
        let state = downcast_state::<W>(state, "changing props")?;
        workflow
          .on_props_changed(&old, new, state)
          .map(|state| Box::new(state) as ErasedState)
      },
    )?;
    self.state = Some(downcast_state::<W>(state, "changing props")?);
    Ok(())
  }

  fn apply(
    &mut self,
    action: ActionOf<W>,
    interceptors: &InterceptorChain,
  ) -> Result<Applied<W::Output>> {
    let name = action.name().to_string();
    let state = self.take_state()?;
    let Update {
      state,
      output,
      state_changed,
    } = action.apply(&self.props, state);
    self.state = Some(state);
    interceptors.on_action_applied(&name, output.is_some(), &self.session);
    Ok(Applied {
      output,
      state_changed,
    })
  }

  /// Route `event` to its target in this subtree and apply it. Outputs of children are passed
  /// through their handlers and applied to this node in the same step.
  pub fn deliver_typed(
    &mut self,
    event: NodeEvent,
    interceptors: &InterceptorChain,
  ) -> Result<Routed<W::Output>> {
    if event.target == self.session.session_id {
      match self.lifecycle {
        Lifecycle::TornDown => return Ok(Routed::Ignored),
        Lifecycle::Rendering => return Err(self.poisoned()),
        Lifecycle::Created | Lifecycle::Idle => {}
      }
      let action = match event.payload {
        EventPayload::Action(action) => *action
          .downcast::<ActionOf<W>>()
          .map_err(|_| RuntimeError::type_mismatch::<ActionOf<W>>("applying action"))?,
        EventPayload::WorkerOutput { instance, value } => {
          match self.tasks.handle_output(instance, value)? {
            Some(action) => action,
            None => {
              debug!(
                session_id = self.session.session_id,
                instance, "dropping output of a worker that is no longer running"
              );
              return Ok(Routed::Ignored);
            }
          }
        }
      };
      return Ok(self.apply(action, interceptors)?.routed());
    }

    let mut event = event;
    for index in 0..self.subtree.active.len() {
      let slot = &mut self.subtree.active[index];
      match slot.node.deliver(event, interceptors)? {
        Routed::NotFound(returned) => event = returned,
        Routed::Ignored => return Ok(Routed::Ignored),
        Routed::Applied {
          output: None,
          state_changed,
        } => {
          return Ok(Routed::Applied {
            output: None,
            state_changed,
          });
        }
        Routed::Applied {
          output: Some(output),
          state_changed: child_changed,
        } => {
          let action = (slot.handler)(output)?;
          let mut applied = self.apply(action, interceptors)?;
          applied.state_changed |= child_changed;
          return Ok(applied.routed());
        }
      }
    }
    Ok(Routed::NotFound(event))
  }

  pub fn snapshot_typed(&self, interceptors: &InterceptorChain) -> TreeSnapshot {
    let own = self.state.as_ref().and_then(|state| {
      interceptors.on_snapshot_state(state, &self.session, &mut || {
        self.workflow.snapshot_state(state)
      })
    });
    TreeSnapshot::new(own, self.subtree.snapshots(interceptors))
  }
}

impl<W: Workflow> ErasedNode for WorkflowNode<W> {
  fn session(&self) -> &Arc<WorkflowSession> {
    &self.session
  }

  fn as_any_mut(&mut self) -> &mut dyn Any {
    self
  }

  fn deliver(
    &mut self,
    event: NodeEvent,
    interceptors: &InterceptorChain,
  ) -> Result<Routed<Box<dyn Any + Send>>> {
    Ok(match self.deliver_typed(event, interceptors)? {
      Routed::NotFound(event) => Routed::NotFound(event),
      Routed::Ignored => Routed::Ignored,
      Routed::Applied {
        output,
        state_changed,
      } => Routed::Applied {
        output: output.map(|output| Box::new(output) as Box<dyn Any + Send>),
        state_changed,
      },
    })
  }

  fn snapshot(&self, interceptors: &InterceptorChain) -> TreeSnapshot {
    self.snapshot_typed(interceptors)
  }

  /// Tear down children first, then cancel this node's tasks. Safe to call twice.
  fn teardown(&mut self, interceptors: &InterceptorChain) {
    if self.lifecycle == Lifecycle::TornDown {
      return;
    }
    self.subtree.teardown(interceptors);
    self.tasks.cancel_all();
    self.lifecycle = Lifecycle::TornDown;
    interceptors.on_session_ended(&self.session);
    debug!(
      session_id = self.session.session_id,
      workflow = %self.session.identifier,
      "session_ended"
    );
  }

  fn running_task_count(&self) -> usize {
    self.tasks.len()
      + self
        .subtree
        .active
        .iter()
        .map(|slot| slot.node.running_task_count())
        .sum::<usize>()
  }

  fn node_count(&self) -> usize {
    1 + self
      .subtree
      .active
      .iter()
      .map(|slot| slot.node.node_count())
      .sum::<usize>()
  }
}
