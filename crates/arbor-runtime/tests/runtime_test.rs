//! Integration tests for the runtime loop.

mod common;

use arbor_runtime::{
  BatchPolicy, ChannelNotifier, NoopNotifier, RuntimeBuilder, RuntimeConfig, RuntimeError,
  RuntimeEvent, WorkflowAction, WorkflowRuntime,
};
use common::{
  Counter, CounterRendering, HostProps, Parent, ParentProps, WorkerHost, eventually, increment,
  report,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type CounterEvent = RuntimeEvent<CounterRendering, i32>;

/// Wait for the next event and describe it as the count rendered or the output emitted.
async fn next(receiver: &mut mpsc::UnboundedReceiver<CounterEvent>) -> (&'static str, i32) {
  match receiver.recv().await.expect("runtime stopped") {
    RuntimeEvent::Rendered(update) => ("rendered", update.rendering.count),
    RuntimeEvent::Output(output) => ("output", output),
  }
}

fn drain_config() -> RuntimeConfig {
  RuntimeConfig {
    batching: BatchPolicy::DrainQueue,
    ..RuntimeConfig::default()
  }
}

/// Sends a state change, a no-op, an unchanged report and another change.
fn send_mixed_changes(runtime: &WorkflowRuntime<Counter>) {
  let sink = runtime.root_sink();
  sink.send(increment());
  sink.send(WorkflowAction::no_op());
  sink.send(report());
  sink.send(increment());
}

#[tokio::test]
async fn test_run_emits_rendering_before_output() {
  let runtime = RuntimeBuilder::new(Counter, ()).build().unwrap();
  let sink = runtime.root_sink();
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(notifier, cancel.clone()));

  assert_eq!(next(&mut receiver).await, ("rendered", 0));
  sink.send(increment());
  assert_eq!(next(&mut receiver).await, ("rendered", 1));
  sink.send(report());
  assert_eq!(next(&mut receiver).await, ("rendered", 1));
  assert_eq!(next(&mut receiver).await, ("output", 1));

  cancel.cancel();
  handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_per_action_renders_every_event() {
  let runtime = RuntimeBuilder::new(Counter, ()).build().unwrap();
  let sink = runtime.root_sink();
  for _ in 0..3 {
    sink.send(increment());
  }
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(notifier, cancel.clone()));

  for expected in 0..=3 {
    assert_eq!(next(&mut receiver).await, ("rendered", expected));
  }

  cancel.cancel();
  handle.await.unwrap().unwrap();
  assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_drain_queue_renders_once_per_batch() {
  let runtime = RuntimeBuilder::new(Counter, ())
    .config(drain_config())
    .build()
    .unwrap();
  let sink = runtime.root_sink();
  for _ in 0..3 {
    sink.send(increment());
  }
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(notifier, cancel.clone()));

  assert_eq!(next(&mut receiver).await, ("rendered", 0));
  assert_eq!(next(&mut receiver).await, ("rendered", 3));

  cancel.cancel();
  handle.await.unwrap().unwrap();
  assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_drain_queue_stops_at_output() {
  let runtime = RuntimeBuilder::new(Counter, ())
    .config(drain_config())
    .build()
    .unwrap();
  let sink = runtime.root_sink();
  sink.send(increment());
  sink.send(report());
  sink.send(increment());
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(notifier, cancel.clone()));

  assert_eq!(next(&mut receiver).await, ("rendered", 0));
  assert_eq!(next(&mut receiver).await, ("rendered", 1));
  assert_eq!(next(&mut receiver).await, ("output", 1));
  assert_eq!(next(&mut receiver).await, ("rendered", 2));

  cancel.cancel();
  handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unchanged_state_still_renders_by_default() {
  let runtime = RuntimeBuilder::new(Counter, ()).build().unwrap();
  send_mixed_changes(&runtime);
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(notifier, cancel.clone()));

  for expected in [
    ("rendered", 0),
    ("rendered", 1),
    ("rendered", 1),
    ("rendered", 1),
    ("output", 1),
    ("rendered", 2),
  ] {
    assert_eq!(next(&mut receiver).await, expected);
  }

  cancel.cancel();
  handle.await.unwrap().unwrap();
  assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_render_only_when_state_changes_skips_unchanged() {
  let runtime = RuntimeBuilder::new(Counter, ())
    .config(RuntimeConfig {
      render_only_when_state_changes: true,
      ..RuntimeConfig::default()
    })
    .build()
    .unwrap();
  send_mixed_changes(&runtime);
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(notifier, cancel.clone()));

  for expected in [
    ("rendered", 0),
    ("rendered", 1),
    ("output", 1),
    ("rendered", 2),
  ] {
    assert_eq!(next(&mut receiver).await, expected);
  }

  cancel.cancel();
  handle.await.unwrap().unwrap();
  assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_cancel_tears_down_tree() {
  let (host, workers, _) = WorkerHost::new();
  let runtime = RuntimeBuilder::new(host, HostProps::worker("w", &[]))
    .build()
    .unwrap();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(NoopNotifier, cancel.clone()));
  eventually(|| workers.live() == 1).await;

  cancel.cancel();
  handle.await.unwrap().unwrap();

  eventually(|| workers.live() == 0).await;
}

#[tokio::test]
async fn test_fatal_error_stops_loop() {
  let runtime = RuntimeBuilder::new(Parent, ParentProps::of(&["a", "a"]))
    .build()
    .unwrap();

  let result = runtime.run(NoopNotifier, CancellationToken::new()).await;
  assert!(matches!(result, Err(RuntimeError::DuplicateChild { .. })));
}
