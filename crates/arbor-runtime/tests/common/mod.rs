//! Workflows shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arbor_runtime::{
  ActionOf, EventHandler, RenderContext, Result, Sink, Snapshot, Update, Worker, Workflow,
  WorkflowAction, WorkflowIdentifier,
};
use futures::StreamExt;
use futures::stream::{self, BoxStream};

// Counter: the smallest useful workflow.

pub struct Counter;

pub struct CounterRendering {
  pub count: i32,
  pub session_id: u64,
  pub sink: Sink<Counter>,
  pub on_increment: EventHandler<()>,
}

impl Workflow for Counter {
  type Props = ();
  type State = i32;
  type Output = i32;
  type Rendering = CounterRendering;

  fn initial_state(&self, _props: &(), snapshot: Option<&Snapshot>) -> Result<i32> {
    match snapshot {
      Some(snapshot) => Ok(snapshot.to_i32()?),
      None => Ok(0),
    }
  }

  fn render(
    &self,
    _props: &(),
    state: &i32,
    context: &mut RenderContext<'_, Self>,
  ) -> Result<CounterRendering> {
    Ok(CounterRendering {
      count: *state,
      session_id: context.session().session_id,
      sink: context.action_sink(),
      on_increment: context.event_handler(|()| increment()),
    })
  }

  fn snapshot_state(&self, state: &i32) -> Option<Snapshot> {
    Some(Snapshot::of_i32(*state))
  }
}

pub fn increment() -> ActionOf<Counter> {
  WorkflowAction::update_state("increment", |_, count| count + 1)
}

/// Emits the current count without changing it.
pub fn report() -> ActionOf<Counter> {
  WorkflowAction::new("report", |_, count| Update::unchanged_with_output(count, count))
}

// Parent: renders one counter per key and sums what they report.

#[derive(Debug, Clone, PartialEq)]
pub struct ParentProps {
  pub keys: Vec<String>,
}

impl ParentProps {
  pub fn of(keys: &[&str]) -> Self {
    Self {
      keys: keys.iter().map(|key| key.to_string()).collect(),
    }
  }
}

#[derive(Debug, Default)]
pub struct ParentState {
  pub total: i32,
  pub props_changes: u32,
}

pub struct Parent;

pub struct ParentRendering {
  pub total: i32,
  pub props_changes: u32,
  pub children: Vec<(String, CounterRendering)>,
}

impl ParentRendering {
  pub fn child(&self, key: &str) -> &CounterRendering {
    &self
      .children
      .iter()
      .find(|(k, _)| k == key)
      .unwrap_or_else(|| panic!("no child {key}"))
      .1
  }
}

impl Workflow for Parent {
  type Props = ParentProps;
  type State = ParentState;
  type Output = i32;
  type Rendering = ParentRendering;

  fn initial_state(&self, _props: &ParentProps, snapshot: Option<&Snapshot>) -> Result<ParentState> {
    let total = match snapshot {
      Some(snapshot) => snapshot.to_i32()?,
      None => 0,
    };
    Ok(ParentState {
      total,
      props_changes: 0,
    })
  }

  fn on_props_changed(
    &self,
    _old: &ParentProps,
    _new: &ParentProps,
    state: ParentState,
  ) -> Result<ParentState> {
    Ok(ParentState {
      props_changes: state.props_changes + 1,
      ..state
    })
  }

  fn render(
    &self,
    props: &ParentProps,
    state: &ParentState,
    context: &mut RenderContext<'_, Self>,
  ) -> Result<ParentRendering> {
    let mut children = Vec::new();
    for key in &props.keys {
      let rendering = context.render_child(Counter, (), key, child_reported)?;
      children.push((key.clone(), rendering));
    }
    Ok(ParentRendering {
      total: state.total,
      props_changes: state.props_changes,
      children,
    })
  }

  fn snapshot_state(&self, state: &ParentState) -> Option<Snapshot> {
    Some(Snapshot::of_i32(state.total))
  }
}

/// Adds a child's report to the total and emits the new total.
fn child_reported(value: i32) -> ActionOf<Parent> {
  WorkflowAction::new("child_reported", move |_, state: ParentState| {
    let total = state.total + value;
    Update::with_output(ParentState { total, ..state }, total)
  })
}

// Ephemeral: a workflow that never appears in snapshots.

pub struct Ephemeral;

impl Workflow for Ephemeral {
  type Props = ();
  type State = ();
  type Output = ();
  type Rendering = ();

  fn identifier(&self) -> WorkflowIdentifier {
    WorkflowIdentifier::unsnapshottable::<Self>()
  }

  fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> Result<()> {
    Ok(())
  }

  fn render(&self, _props: &(), _state: &(), _context: &mut RenderContext<'_, Self>) -> Result<()> {
    Ok(())
  }

  fn snapshot_state(&self, _state: &()) -> Option<Snapshot> {
    Some(Snapshot::of_utf8("never persisted"))
  }
}

/// Renders a counter and an ephemeral child side by side.
pub struct Mixed;

impl Workflow for Mixed {
  type Props = ();
  type State = ();
  type Output = ();
  type Rendering = i32;

  fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> Result<()> {
    Ok(())
  }

  fn render(&self, _props: &(), _state: &(), context: &mut RenderContext<'_, Self>) -> Result<i32> {
    let counter = context.render_child(Counter, (), "kept", |_| WorkflowAction::no_op())?;
    context.render_child(Ephemeral, (), "dropped", |_| WorkflowAction::no_op())?;
    Ok(counter.count)
  }
}

// Probes for observing task lifetimes.

/// Counts how often a task started and how many instances are still alive.
#[derive(Clone, Default)]
pub struct Probe {
  starts: Arc<AtomicUsize>,
  live: Arc<AtomicUsize>,
}

impl Probe {
  pub fn starts(&self) -> usize {
    self.starts.load(Ordering::SeqCst)
  }

  pub fn live(&self) -> usize {
    self.live.load(Ordering::SeqCst)
  }

  /// Record a start and return a guard that marks the instance dead when dropped.
  pub fn start(&self) -> ProbeGuard {
    self.starts.fetch_add(1, Ordering::SeqCst);
    self.live.fetch_add(1, Ordering::SeqCst);
    ProbeGuard {
      live: self.live.clone(),
    }
  }
}

pub struct ProbeGuard {
  live: Arc<AtomicUsize>,
}

impl Drop for ProbeGuard {
  fn drop(&mut self) {
    self.live.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Emits `values`, then stays alive until cancelled.
pub struct ProbeWorker {
  pub token: String,
  pub values: Vec<u32>,
  pub probe: Probe,
}

impl Worker for ProbeWorker {
  type Output = u32;

  fn run(&self) -> BoxStream<'static, u32> {
    let guard = self.probe.start();
    let tail = stream::once(async move {
      let _guard = guard;
      futures::future::pending::<u32>().await
    });
    stream::iter(self.values.clone()).chain(tail).boxed()
  }

  fn does_same_work_as(&self, other: &Self) -> bool {
    self.token == other.token
  }
}

// WorkerHost: runs a probe worker and a side effect depending on its props.

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HostProps {
  pub token: Option<String>,
  pub values: Vec<u32>,
  pub effect: bool,
  pub duplicate_worker: bool,
}

impl HostProps {
  pub fn worker(token: &str, values: &[u32]) -> Self {
    Self {
      token: Some(token.to_string()),
      values: values.to_vec(),
      ..Self::default()
    }
  }
}

pub struct WorkerHost {
  pub workers: Probe,
  pub effects: Probe,
}

impl WorkerHost {
  pub fn new() -> (Self, Probe, Probe) {
    let workers = Probe::default();
    let effects = Probe::default();
    let host = Self {
      workers: workers.clone(),
      effects: effects.clone(),
    };
    (host, workers, effects)
  }
}

impl Workflow for WorkerHost {
  type Props = HostProps;
  type State = Vec<u32>;
  type Output = u32;
  type Rendering = Vec<u32>;

  fn initial_state(&self, _props: &HostProps, _snapshot: Option<&Snapshot>) -> Result<Vec<u32>> {
    Ok(Vec::new())
  }

  fn render(
    &self,
    props: &HostProps,
    state: &Vec<u32>,
    context: &mut RenderContext<'_, Self>,
  ) -> Result<Vec<u32>> {
    if let Some(token) = &props.token {
      let runs = if props.duplicate_worker { 2 } else { 1 };
      for _ in 0..runs {
        let worker = ProbeWorker {
          token: token.clone(),
          values: props.values.clone(),
          probe: self.workers.clone(),
        };
        context.run_worker(worker, "probe", received)?;
      }
    }
    if props.effect {
      let probe = self.effects.clone();
      context.run_side_effect("effect", async move {
        let _guard = probe.start();
        futures::future::pending::<()>().await
      })?;
    }
    Ok(state.clone())
  }
}

fn received(value: u32) -> ActionOf<WorkerHost> {
  WorkflowAction::new("received", move |_, mut values: Vec<u32>| {
    values.push(value);
    Update::with_output(values, value)
  })
}

/// Poll `condition` until it holds, letting spawned tasks run in between.
pub async fn eventually(condition: impl Fn() -> bool) {
  for _ in 0..200 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("condition not reached in time");
}
