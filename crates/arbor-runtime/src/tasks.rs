//! Workers and side effects owned by one node.
//!
//! Like children, tasks are reconciled per render pass: whatever the pass requests is moved
//! (or started) into the staged list, and whatever is left in the active list at commit is
//! cancelled.

use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_core::Worker;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::pass::RenderPass;
use crate::sink::NodeEvent;
use crate::workflow::{ActionOf, Workflow};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

type WorkerHandler<W> = Box<dyn Fn(Box<dyn Any + Send>) -> Result<ActionOf<W>> + Send>;

enum TaskKind<W: Workflow> {
  Worker {
    type_id: TypeId,
    description: String,
    worker: Box<dyn Any + Send>,
    handler: WorkerHandler<W>,
  },
  SideEffect,
}

struct TaskSlot<W: Workflow> {
  key: String,
  kind: TaskKind<W>,
  instance: u64,
  cancel: CancellationToken,
}

impl<W: Workflow> TaskSlot<W> {
  fn is_worker(&self, type_id: TypeId, key: &str) -> bool {
    matches!(&self.kind, TaskKind::Worker { type_id: t, .. } if *t == type_id) && self.key == key
  }

  fn is_side_effect(&self, key: &str) -> bool {
    matches!(self.kind, TaskKind::SideEffect) && self.key == key
  }

  fn describe(&self) -> &str {
    match &self.kind {
      TaskKind::Worker { description, .. } => description,
      TaskKind::SideEffect => "side effect",
    }
  }
}

pub(crate) struct TaskManager<W: Workflow> {
  active: Vec<TaskSlot<W>>,
  staged: Vec<TaskSlot<W>>,
}

impl<W: Workflow> TaskManager<W> {
  pub fn new() -> Self {
    Self {
      active: Vec::new(),
      staged: Vec::new(),
    }
  }

  /// Keep `worker` running under `key`, starting it if no equivalent worker already runs.
  pub fn run_worker<K, H>(
    &mut self,
    node: u64,
    worker: K,
    key: &str,
    handler: H,
    pass: &mut RenderPass,
  ) -> Result<()>
  where
    K: Worker,
    H: Fn(K::Output) -> ActionOf<W> + Send + 'static,
  {
    let type_id = TypeId::of::<K>();
    if self.staged.iter().any(|slot| slot.is_worker(type_id, key)) {
      return Err(RuntimeError::DuplicateWorker {
        worker: worker.describe(),
        key: key.to_string(),
      });
    }

    let handler: WorkerHandler<W> = Box::new(move |value| {
      let value = value
        .downcast::<K::Output>()
        .map_err(|_| RuntimeError::type_mismatch::<K::Output>("handling worker output"))?;
      Ok(handler(*value))
    });

    if let Some(position) = self.active.iter().position(|slot| slot.is_worker(type_id, key)) {
      let mut slot = self.active.remove(position);
      let same = match &slot.kind {
        TaskKind::Worker { worker: running, .. } => running
          .downcast_ref::<Arc<K>>()
          .is_some_and(|running| running.does_same_work_as(&worker)),
        TaskKind::SideEffect => false,
      };
      if same {
        slot.kind = TaskKind::Worker {
          type_id,
          description: worker.describe(),
          worker: Box::new(Arc::new(worker)),
          handler,
        };
        self.staged.push(slot);
        return Ok(());
      }
      debug!(
        session_id = node,
        worker = slot.describe(),
        key,
        "replacing worker that no longer does the same work"
      );
      slot.cancel.cancel();
    }

    let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
    let cancel = CancellationToken::new();
    let description = worker.describe();
    debug!(session_id = node, worker = %description, key, instance, "worker_started");

    let worker = Arc::new(worker);
    pass.launch(Box::pin(drive_worker(
      node,
      instance,
      worker.clone(),
      pass.events.clone(),
      cancel.clone(),
    )));
    self.staged.push(TaskSlot {
      key: key.to_string(),
      kind: TaskKind::Worker {
        type_id,
        description,
        worker: Box::new(worker),
        handler,
      },
      instance,
      cancel,
    });
    Ok(())
  }

  /// Keep a side effect running under `key`. `effect` is only started the first pass that
  /// requests the key; later passes drop it unpolled.
  pub fn run_side_effect<F>(
    &mut self,
    node: u64,
    key: &str,
    effect: F,
    pass: &mut RenderPass,
  ) -> Result<()>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    if self.staged.iter().any(|slot| slot.is_side_effect(key)) {
      return Err(RuntimeError::DuplicateSideEffect {
        key: key.to_string(),
      });
    }

    if let Some(position) = self.active.iter().position(|slot| slot.is_side_effect(key)) {
      let slot = self.active.remove(position);
      self.staged.push(slot);
      return Ok(());
    }

    let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
    let cancel = CancellationToken::new();
    debug!(session_id = node, key, instance, "side_effect_started");

    let token = cancel.clone();
    pass.launch(Box::pin(async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = effect => {}
      }
    }));
    self.staged.push(TaskSlot {
      key: key.to_string(),
      kind: TaskKind::SideEffect,
      instance,
      cancel,
    });
    Ok(())
  }

  /// Cancel everything the finished pass did not request and make the staged tasks active.
  pub fn commit(&mut self, node: u64) {
    for slot in self.active.drain(..) {
      debug!(session_id = node, task = slot.describe(), key = %slot.key, "task_cancelled");
      slot.cancel.cancel();
    }
    std::mem::swap(&mut self.active, &mut self.staged);
  }

  /// Turn a worker emission into an action. `None` when the emitting instance is no longer
  /// active.
  pub fn handle_output(
    &self,
    instance: u64,
    value: Box<dyn Any + Send>,
  ) -> Result<Option<ActionOf<W>>> {
    let slot = self.active.iter().find(|slot| slot.instance == instance);
    match slot.map(|slot| &slot.kind) {
      Some(TaskKind::Worker { handler, .. }) => handler(value).map(Some),
      _ => Ok(None),
    }
  }

  pub fn cancel_all(&mut self) {
    for slot in self.active.drain(..).chain(self.staged.drain(..)) {
      slot.cancel.cancel();
    }
  }

  pub fn len(&self) -> usize {
    self.active.len()
  }
}

async fn drive_worker<K: Worker>(
  node: u64,
  instance: u64,
  worker: Arc<K>,
  events: mpsc::UnboundedSender<NodeEvent>,
  cancel: CancellationToken,
) {
  if cancel.is_cancelled() {
    return;
  }
  let mut stream = worker.run();
  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      next = stream.next() => match next {
        Some(value) => {
          if events.send(NodeEvent::worker_output(node, instance, value)).is_err() {
            break;
          }
        }
        None => break,
      },
    }
  }
}
