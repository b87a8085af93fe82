//! Child reconciliation for one node.
//!
//! During a render pass every child the parent renders is moved from `active` into `staged`,
//! matched by identifier and key. Children still in `active` when the pass commits were not
//! rendered and are torn down.

use std::any::Any;
use std::sync::Arc;

use arbor_core::{ChildSnapshots, WorkflowNodeId};
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::interceptor::InterceptorChain;
use crate::node::{ErasedNode, WorkflowNode};
use crate::pass::RenderPass;
use crate::session::WorkflowSession;
use crate::workflow::{ActionOf, Workflow};

pub(crate) type OutputHandler<W> = Box<dyn Fn(Box<dyn Any + Send>) -> Result<ActionOf<W>> + Send>;

pub(crate) struct ChildSlot<W: Workflow> {
  pub id: WorkflowNodeId,
  pub node: Box<dyn ErasedNode>,
  pub handler: OutputHandler<W>,
}

pub(crate) struct SubtreeManager<W: Workflow> {
  pub active: Vec<ChildSlot<W>>,
  staged: Vec<ChildSlot<W>>,
  /// Child snapshots restored with the parent, consumed as children are first rendered and
  /// discarded after the first pass.
  restored: Option<ChildSnapshots>,
}

impl<W: Workflow> SubtreeManager<W> {
  pub fn new(restored: Option<ChildSnapshots>) -> Self {
    Self {
      active: Vec::new(),
      staged: Vec::new(),
      restored,
    }
  }

  pub fn render_child<C, H>(
    &mut self,
    parent: &Arc<WorkflowSession>,
    child: C,
    props: C::Props,
    key: &str,
    handler: H,
    pass: &mut RenderPass,
  ) -> Result<C::Rendering>
  where
    C: Workflow,
    H: Fn(C::Output) -> ActionOf<W> + Send + 'static,
  {
    let id = WorkflowNodeId::new(child.identifier(), key);
    if self.staged.iter().any(|slot| slot.id == id) {
      return Err(RuntimeError::DuplicateChild {
        identifier: id.identifier.to_string(),
        key: key.to_string(),
      });
    }

    let handler: OutputHandler<W> = Box::new(move |output| {
      let output = output
        .downcast::<C::Output>()
        .map_err(|_| RuntimeError::type_mismatch::<C::Output>("handling child output"))?;
      Ok(handler(*output))
    });

    let (slot, replacement) = match self.active.iter().position(|slot| slot.id == id) {
      Some(position) => {
        let mut slot = self.active.remove(position);
        slot.handler = handler;
        (slot, Some(child))
      }
      None => {
        let snapshot = self.restored.as_mut().and_then(|restored| restored.remove(&id));
        let session = WorkflowSession::child(parent, &id);
        let node = WorkflowNode::new(child, props.clone(), snapshot, session, pass)?;
        let slot = ChildSlot {
          id,
          node: Box::new(node),
          handler,
        };
        (slot, None)
      }
    };

    self.staged.push(slot);
    let node = self
      .staged
      .last_mut()
      .and_then(|slot| slot.node.as_any_mut().downcast_mut::<WorkflowNode<C>>())
      .ok_or_else(|| RuntimeError::type_mismatch::<C>("rendering child"))?;
    node.render(replacement, props, pass)
  }

  /// Tear down children the finished pass did not render and adopt the staged ones.
  pub fn commit(&mut self, interceptors: &InterceptorChain) {
    for mut orphan in self.active.drain(..) {
      debug!(
        session_id = orphan.node.session().session_id,
        child = %orphan.id,
        "child_not_rendered"
      );
      orphan.node.teardown(interceptors);
    }
    std::mem::swap(&mut self.active, &mut self.staged);
    self.restored = None;
  }

  pub fn snapshots(&self, interceptors: &InterceptorChain) -> ChildSnapshots {
    self
      .active
      .iter()
      .map(|slot| (slot.id.clone(), slot.node.snapshot(interceptors)))
      .collect()
  }

  pub fn teardown(&mut self, interceptors: &InterceptorChain) {
    for mut slot in self.active.drain(..).chain(self.staged.drain(..)) {
      slot.node.teardown(interceptors);
    }
  }
}
