//! Addressed events and the sink that produces them.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use tokio::sync::mpsc;
use tracing::debug;

use crate::workflow::{ActionOf, Workflow};

/// A queued event addressed to one node by its session id.
pub(crate) struct NodeEvent {
  pub target: u64,
  pub payload: EventPayload,
}

pub(crate) enum EventPayload {
  /// An action sent through a [`Sink`].
  Action(Box<dyn Any + Send>),
  /// A value emitted by a worker instance.
  WorkerOutput {
    instance: u64,
    value: Box<dyn Any + Send>,
  },
}

impl NodeEvent {
  pub fn worker_output<T: Send + 'static>(target: u64, instance: u64, value: T) -> Self {
    Self {
      target,
      payload: EventPayload::WorkerOutput {
        instance,
        value: Box::new(value),
      },
    }
  }
}

impl fmt::Debug for NodeEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match &self.payload {
      EventPayload::Action(_) => "action",
      EventPayload::WorkerOutput { .. } => "worker_output",
    };
    f.debug_struct("NodeEvent")
      .field("target", &self.target)
      .field("kind", &kind)
      .finish()
  }
}

/// Sends actions to one workflow node.
///
/// A sink outlives the render pass that created it and may be moved to other tasks. Actions
/// are queued in send order and applied one at a time by the runtime loop. Sending to a node
/// that has been torn down, or after the runtime is gone, does nothing.
pub struct Sink<W: Workflow> {
  target: u64,
  events: mpsc::UnboundedSender<NodeEvent>,
  _workflow: PhantomData<fn(W)>,
}

impl<W: Workflow> Sink<W> {
  pub(crate) fn new(target: u64, events: mpsc::UnboundedSender<NodeEvent>) -> Self {
    Self {
      target,
      events,
      _workflow: PhantomData,
    }
  }

  /// Queue `action` for the node.
  pub fn send(&self, action: ActionOf<W>) {
    let event = NodeEvent {
      target: self.target,
      payload: EventPayload::Action(Box::new(action)),
    };
    if self.events.send(event).is_err() {
      debug!(target_session = self.target, "runtime stopped, dropping action");
    }
  }

  /// Session id of the node this sink addresses.
  pub fn target(&self) -> u64 {
    self.target
  }
}

impl<W: Workflow> Clone for Sink<W> {
  fn clone(&self) -> Self {
    Self {
      target: self.target,
      events: self.events.clone(),
      _workflow: PhantomData,
    }
  }
}

impl<W: Workflow> fmt::Debug for Sink<W> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Sink").field("target", &self.target).finish()
  }
}
