//! The bundled demo tree: a counter whose ticker child is driven by a worker.

use std::fmt;
use std::time::Duration;

use arbor_core::codec;
use arbor_runtime::{
  ActionOf, RenderContext, Snapshot, StreamWorker, Update, Workflow, WorkflowAction,
};
use bytes::BufMut;
use futures::StreamExt;

/// Delay between two ticks.
const TICK_INTERVAL: Duration = Duration::from_millis(20);

/// The root emits an output each time the count reaches a multiple of this.
const MILESTONE: i32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct DemoProps {
  pub ticks: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoState {
  pub count: i32,
  pub ticks: u32,
}

/// What the demo renders. Plain data so it can cross task boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoScreen {
  pub count: i32,
  pub ticks: u32,
  pub ticker_seen: u32,
}

impl fmt::Display for DemoScreen {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "count={} ticks={} (ticker saw {})",
      self.count, self.ticks, self.ticker_seen
    )
  }
}

pub struct DemoCounter;

impl Workflow for DemoCounter {
  type Props = DemoProps;
  type State = DemoState;
  type Output = i32;
  type Rendering = DemoScreen;

  fn initial_state(
    &self,
    _props: &DemoProps,
    snapshot: Option<&Snapshot>,
  ) -> arbor_runtime::Result<DemoState> {
    let Some(snapshot) = snapshot else {
      return Ok(DemoState::default());
    };
    let mut bytes = snapshot.bytes().clone();
    let count = codec::get_u32(&mut bytes)? as i32;
    let ticks = codec::get_u32(&mut bytes)?;
    Ok(DemoState { count, ticks })
  }

  fn render(
    &self,
    props: &DemoProps,
    state: &DemoState,
    context: &mut RenderContext<'_, Self>,
  ) -> arbor_runtime::Result<DemoScreen> {
    let ticker_seen = context.render_child(Ticker, props.ticks, "ticker", ticked)?;
    Ok(DemoScreen {
      count: state.count,
      ticks: state.ticks,
      ticker_seen,
    })
  }

  fn snapshot_state(&self, state: &DemoState) -> Option<Snapshot> {
    let DemoState { count, ticks } = *state;
    Some(Snapshot::write(move |buf| {
      buf.put_i32(count);
      buf.put_u32(ticks);
    }))
  }
}

/// Add one to the root count, emitting the count when it hits a milestone.
pub fn increment() -> ActionOf<DemoCounter> {
  WorkflowAction::new("increment", |_, state: DemoState| {
    let state = DemoState {
      count: state.count + 1,
      ..state
    };
    if state.count % MILESTONE == 0 {
      Update::with_output(state, state.count)
    } else {
      Update::state(state)
    }
  })
}

fn ticked(tick: u32) -> ActionOf<DemoCounter> {
  WorkflowAction::update_state("ticked", move |_, state: DemoState| DemoState {
    ticks: state.ticks.max(tick),
    ..state
  })
}

/// Counts up to its props with a worker and reports every new tick.
pub struct Ticker;

impl Workflow for Ticker {
  type Props = u32;
  type State = u32;
  type Output = u32;
  type Rendering = u32;

  fn initial_state(&self, _props: &u32, snapshot: Option<&Snapshot>) -> arbor_runtime::Result<u32> {
    match snapshot {
      Some(snapshot) => Ok(snapshot.to_i32()? as u32),
      None => Ok(0),
    }
  }

  fn render(
    &self,
    props: &u32,
    state: &u32,
    context: &mut RenderContext<'_, Self>,
  ) -> arbor_runtime::Result<u32> {
    let total = *props;
    let worker = StreamWorker::new(format!("ticks-{total}"), move || {
      futures::stream::iter(1..=total).then(|tick| async move {
        tokio::time::sleep(TICK_INTERVAL).await;
        tick
      })
    });
    context.run_worker(worker, "ticks", tick)?;
    Ok(*state)
  }

  fn snapshot_state(&self, state: &u32) -> Option<Snapshot> {
    Some(Snapshot::of_i32(*state as i32))
  }
}

/// Record `tick` unless it was already seen before a restore.
fn tick(tick: u32) -> ActionOf<Ticker> {
  WorkflowAction::new("tick", move |_, seen: u32| {
    if tick > seen {
      Update::with_output(tick, tick)
    } else {
      Update::unchanged(seen)
    }
  })
}
