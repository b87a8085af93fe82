//! The runtime loop that owns a workflow tree.
//!
//! All tree mutation happens on the task that owns the [`WorkflowRuntime`]: events are
//! queued on one FIFO channel and applied one at a time, each followed by a render pass over
//! the whole tree. Workers and side effects run on their own tokio tasks and only talk back
//! through that channel.

use std::sync::Arc;

use arbor_core::TreeSnapshot;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::{BatchPolicy, RuntimeConfig};
use crate::error::Result;
use crate::interceptor::{InterceptorChain, WorkflowInterceptor};
use crate::node::{ErasedNode, Routed, WorkflowNode};
use crate::notifier::{RenderingAndSnapshot, RuntimeEvent, RuntimeNotifier};
use crate::pass::RenderPass;
use crate::session::WorkflowSession;
use crate::sink::{NodeEvent, Sink};
use crate::workflow::Workflow;

/// What processing one queued event did.
#[derive(Debug, PartialEq, Eq)]
pub enum Processed<O> {
  /// An action was applied somewhere in the tree. `output` is set when the root emitted.
  Applied { output: Option<O> },
  /// An action was applied but every state it reached was left as it was.
  Unchanged { output: Option<O> },
  /// The root received new props.
  PropsUpdated,
  /// The event no longer applied to anything and the tree is unchanged.
  Ignored,
}

impl<O> Processed<O> {
  /// Whether the event changed any state, so a render may differ from the last one.
  pub fn needs_render(&self) -> bool {
    matches!(self, Processed::Applied { .. } | Processed::PropsUpdated)
  }

  /// The root output, if the event produced one.
  pub fn output(self) -> Option<O> {
    match self {
      Processed::Applied { output } | Processed::Unchanged { output } => output,
      Processed::PropsUpdated | Processed::Ignored => None,
    }
  }
}

/// Builds a [`WorkflowRuntime`].
pub struct RuntimeBuilder<W: Workflow> {
  workflow: W,
  props: W::Props,
  snapshot: Option<TreeSnapshot>,
  interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
  config: RuntimeConfig,
}

impl<W: Workflow> RuntimeBuilder<W> {
  pub fn new(workflow: W, props: W::Props) -> Self {
    Self {
      workflow,
      props,
      snapshot: None,
      interceptors: Vec::new(),
      config: RuntimeConfig::default(),
    }
  }

  /// Restore the tree from a previous snapshot.
  pub fn snapshot(mut self, snapshot: TreeSnapshot) -> Self {
    self.snapshot = Some(snapshot);
    self
  }

  /// Restore the tree from serialized snapshot bytes. Empty bytes mean no snapshot. The bytes
  /// are decoded when the runtime is built.
  pub fn snapshot_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
    let bytes = bytes.into();
    self.snapshot = (!bytes.is_empty()).then(|| TreeSnapshot::deferred(bytes));
    self
  }

  /// Add an interceptor. Interceptors added first wrap the ones added later.
  pub fn interceptor(mut self, interceptor: Arc<dyn WorkflowInterceptor>) -> Self {
    self.interceptors.push(interceptor);
    self
  }

  pub fn config(mut self, config: RuntimeConfig) -> Self {
    self.config = config;
    self
  }

  /// Create the root node. The root's initial state is computed here; nothing is rendered
  /// and no worker starts until the first [`WorkflowRuntime::render`].
  pub fn build(self) -> Result<WorkflowRuntime<W>> {
    let interceptors = InterceptorChain::new(self.interceptors);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (props_tx, props_rx) = mpsc::unbounded_channel();

    let session = WorkflowSession::root(self.workflow.identifier());
    let mut pass = RenderPass::new(interceptors.clone(), events_tx.clone());
    let root = WorkflowNode::new(
      self.workflow,
      self.props.clone(),
      self.snapshot,
      session,
      &mut pass,
    )?;

    Ok(WorkflowRuntime {
      root,
      props: self.props,
      interceptors,
      config: self.config,
      events_tx,
      events_rx,
      props_tx,
      props_rx,
    })
  }
}

/// Owns a workflow tree and drives it.
///
/// Either call [`WorkflowRuntime::run`] to have the runtime loop report renderings and
/// outputs to a notifier, or drive it by hand with [`WorkflowRuntime::render`] and
/// [`WorkflowRuntime::process_event`]. Dropping the runtime tears the tree down and cancels
/// every worker and side effect.
pub struct WorkflowRuntime<W: Workflow> {
  root: WorkflowNode<W>,
  props: W::Props,
  interceptors: InterceptorChain,
  config: RuntimeConfig,
  events_tx: mpsc::UnboundedSender<NodeEvent>,
  events_rx: mpsc::UnboundedReceiver<NodeEvent>,
  props_tx: mpsc::UnboundedSender<W::Props>,
  props_rx: mpsc::UnboundedReceiver<W::Props>,
}

impl<W: Workflow> WorkflowRuntime<W> {
  pub fn builder(workflow: W, props: W::Props) -> RuntimeBuilder<W> {
    RuntimeBuilder::new(workflow, props)
  }

  /// Render the whole tree once, then start the workers and side effects the pass
  /// requested. Must be called within a tokio runtime if any are requested.
  pub fn render(&mut self) -> Result<RenderingAndSnapshot<W::Rendering>> {
    let mut pass = RenderPass::new(self.interceptors.clone(), self.events_tx.clone());
    let rendering = self.root.render(None, self.props.clone(), &mut pass)?;
    let snapshot = self.root.snapshot_typed(&self.interceptors);
    let launched = pass.launch_all()?;
    if launched > 0 {
      debug!(launched, "tasks_launched");
    }
    Ok(RenderingAndSnapshot {
      rendering,
      snapshot,
    })
  }

  /// Wait for the next queued event and apply it.
  pub async fn process_event(&mut self) -> Result<Processed<W::Output>> {
    // Both channels stay open while the runtime holds their senders.
    tokio::select! {
      Some(props) = self.props_rx.recv() => Ok(self.accept_props(props)),
      Some(event) = self.events_rx.recv() => self.dispatch(event),
    }
  }

  /// Apply the next queued event if there is one.
  pub fn try_process_event(&mut self) -> Result<Option<Processed<W::Output>>> {
    if let Ok(props) = self.props_rx.try_recv() {
      return Ok(Some(self.accept_props(props)));
    }
    match self.events_rx.try_recv() {
      Ok(event) => self.dispatch(event).map(Some),
      Err(_) => Ok(None),
    }
  }

  /// Replace the root props. Takes effect on the next render.
  pub fn update_props(&mut self, props: W::Props) -> Processed<W::Output> {
    self.accept_props(props)
  }

  /// A sender for new root props, for use from other tasks.
  pub fn props_sender(&self) -> mpsc::UnboundedSender<W::Props> {
    self.props_tx.clone()
  }

  /// A sink addressing the root workflow.
  pub fn root_sink(&self) -> Sink<W> {
    Sink::new(self.root.session().session_id, self.events_tx.clone())
  }

  pub fn root_session(&self) -> &Arc<WorkflowSession> {
    self.root.session()
  }

  /// Snapshot of the tree as of the last render.
  pub fn snapshot(&self) -> TreeSnapshot {
    self.root.snapshot_typed(&self.interceptors)
  }

  /// Workers and side effects currently owned by live nodes.
  pub fn running_task_count(&self) -> usize {
    self.root.running_task_count()
  }

  /// Live nodes in the tree, including the root.
  pub fn node_count(&self) -> usize {
    self.root.node_count()
  }

  pub fn config(&self) -> &RuntimeConfig {
    &self.config
  }

  fn accept_props(&mut self, props: W::Props) -> Processed<W::Output> {
    if props == self.props {
      return Processed::Ignored;
    }
    self.props = props;
    Processed::PropsUpdated
  }

  fn dispatch(&mut self, event: NodeEvent) -> Result<Processed<W::Output>> {
    Ok(match self.root.deliver_typed(event, &self.interceptors)? {
      Routed::NotFound(event) => {
        debug!(target_session = event.target, "dropping event for a node that is gone");
        Processed::Ignored
      }
      Routed::Ignored => Processed::Ignored,
      Routed::Applied {
        output,
        state_changed: true,
      } => Processed::Applied { output },
      Routed::Applied {
        output,
        state_changed: false,
      } => Processed::Unchanged { output },
    })
  }

  /// Run the loop until `cancel` fires or a fatal error occurs.
  ///
  /// Emits the first rendering right away, then one rendering per processed event (or per
  /// drained batch, see [`BatchPolicy`]), each followed by the root's output when there was
  /// one. With [`RuntimeConfig::render_only_when_state_changes`] set, events that changed no
  /// state emit only their output. The tree is torn down when the loop stops.
  #[instrument(
    name = "workflow_runtime",
    skip(self, notifier, cancel),
    fields(
      workflow = %self.root.session().identifier,
      batching = ?self.config.batching,
    )
  )]
  pub async fn run<N>(mut self, notifier: N, cancel: CancellationToken) -> Result<()>
  where
    N: RuntimeNotifier<W::Rendering, W::Output>,
  {
    info!("workflow runtime started");
    let result = self.run_loop(&notifier, &cancel).await;
    self.root.teardown(&self.interceptors);
    match &result {
      Ok(()) => info!("workflow runtime stopped"),
      Err(e) => error!(error = %e, "workflow runtime failed"),
    }
    result
  }

  async fn run_loop<N>(&mut self, notifier: &N, cancel: &CancellationToken) -> Result<()>
  where
    N: RuntimeNotifier<W::Rendering, W::Output>,
  {
    notifier.notify(RuntimeEvent::Rendered(self.render()?));

    loop {
      let processed = tokio::select! {
        _ = cancel.cancelled() => {
          info!("workflow runtime cancelled");
          return Ok(());
        }
        processed = self.process_event() => processed?,
      };

      if matches!(processed, Processed::Ignored) {
        continue;
      }
      let mut changed = processed.needs_render();
      let mut output = processed.output();

      if self.config.batching == BatchPolicy::DrainQueue {
        let mut drained = 0_usize;
        while output.is_none() {
          let Some(processed) = self.try_process_event()? else {
            break;
          };
          changed |= processed.needs_render();
          output = processed.output();
          drained += 1;
        }
        if drained > 0 {
          debug!(drained, "drained queued events into one render");
        }
      }

      if changed || !self.config.render_only_when_state_changes {
        notifier.notify(RuntimeEvent::Rendered(self.render()?));
      } else {
        debug!("no state changed, skipping render");
      }
      if let Some(output) = output {
        notifier.notify(RuntimeEvent::Output(output));
      }
    }
  }
}

impl<W: Workflow> Drop for WorkflowRuntime<W> {
  fn drop(&mut self) {
    self.root.teardown(&self.interceptors);
  }
}
