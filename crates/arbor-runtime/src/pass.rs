//! State shared by all nodes during one render pass.

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{Result, RuntimeError};
use crate::interceptor::InterceptorChain;
use crate::sink::NodeEvent;

pub(crate) struct RenderPass {
  pub interceptors: InterceptorChain,
  pub events: mpsc::UnboundedSender<NodeEvent>,
  launches: Vec<BoxFuture<'static, ()>>,
}

impl RenderPass {
  pub fn new(interceptors: InterceptorChain, events: mpsc::UnboundedSender<NodeEvent>) -> Self {
    Self {
      interceptors,
      events,
      launches: Vec::new(),
    }
  }

  /// Queue a task. Nothing starts until [`RenderPass::launch_all`].
  pub fn launch(&mut self, task: BoxFuture<'static, ()>) {
    self.launches.push(task);
  }

  /// Spawn every queued task on the current tokio runtime.
  pub fn launch_all(self) -> Result<usize> {
    if self.launches.is_empty() {
      return Ok(0);
    }
    let handle = Handle::try_current().map_err(|_| RuntimeError::NoAsyncRuntime)?;
    let count = self.launches.len();
    for task in self.launches {
      handle.spawn(task);
    }
    Ok(count)
  }
}
