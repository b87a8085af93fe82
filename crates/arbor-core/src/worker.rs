//! Asynchronous units of work owned by a workflow.
//!
//! A [`Worker`] produces a stream of outputs over time. The runtime starts it the first render
//! pass that asks for it, keeps it running while later passes keep asking for an equivalent
//! worker under the same key, and cancels it otherwise.

use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};

/// A long-running producer of outputs.
pub trait Worker: Send + Sync + 'static {
  type Output: Send + 'static;

  /// Start the work. Called on the worker's own runtime task, which polls the stream until
  /// it ends or the worker is cancelled.
  fn run(&self) -> BoxStream<'static, Self::Output>;

  /// Whether `other`, requested in a later render pass, is the same ongoing work as `self`.
  ///
  /// When this returns `false` the running worker is cancelled and `other` started in its
  /// place.
  fn does_same_work_as(&self, _other: &Self) -> bool {
    true
  }

  /// Name used in logs.
  fn describe(&self) -> String {
    type_name::<Self>().to_string()
  }
}

type StreamFactory<T> = Arc<dyn Fn() -> BoxStream<'static, T> + Send + Sync>;

/// Worker built from a stream factory.
///
/// Two stream workers do the same work when their equivalence tokens are equal.
pub struct StreamWorker<T> {
  token: String,
  factory: StreamFactory<T>,
}

impl<T: Send + 'static> StreamWorker<T> {
  pub fn new<S>(token: impl Into<String>, factory: impl Fn() -> S + Send + Sync + 'static) -> Self
  where
    S: futures::Stream<Item = T> + Send + 'static,
  {
    Self {
      token: token.into(),
      factory: Arc::new(move || factory().boxed()),
    }
  }

  /// Worker that emits `values` in order and finishes.
  pub fn from_values(token: impl Into<String>, values: Vec<T>) -> Self
  where
    T: Clone + Sync,
  {
    Self::new(token, move || stream::iter(values.clone()))
  }

  pub fn token(&self) -> &str {
    &self.token
  }
}

impl<T: Send + 'static> Worker for StreamWorker<T> {
  type Output = T;

  fn run(&self) -> BoxStream<'static, T> {
    (self.factory)()
  }

  fn does_same_work_as(&self, other: &Self) -> bool {
    self.token == other.token
  }

  fn describe(&self) -> String {
    format!("StreamWorker({})", self.token)
  }
}

/// Emits `()` once after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerWorker {
  pub delay: Duration,
}

impl TimerWorker {
  pub fn new(delay: Duration) -> Self {
    Self { delay }
  }
}

impl Worker for TimerWorker {
  type Output = ();

  fn run(&self) -> BoxStream<'static, ()> {
    stream::once(tokio::time::sleep(self.delay)).boxed()
  }

  fn does_same_work_as(&self, other: &Self) -> bool {
    self.delay == other.delay
  }

  fn describe(&self) -> String {
    format!("TimerWorker({:?})", self.delay)
  }
}

/// Finishes immediately without emitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinishedWorker;

impl Worker for FinishedWorker {
  type Output = ();

  fn run(&self) -> BoxStream<'static, ()> {
    stream::empty().boxed()
  }
}
