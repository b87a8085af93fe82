//! Runtime events and notifiers.
//!
//! The runtime loop reports each rendering and each root output through a
//! [`RuntimeNotifier`]. Consumers decide what to do with them (display, persist, forward).

use arbor_core::TreeSnapshot;
use tokio::sync::mpsc;

/// A root rendering paired with the snapshot of the tree that produced it.
#[derive(Debug)]
pub struct RenderingAndSnapshot<R> {
  pub rendering: R,
  pub snapshot: TreeSnapshot,
}

/// Events emitted by [`WorkflowRuntime::run`](crate::WorkflowRuntime::run).
///
/// When an event both changes the tree and makes the root emit, `Rendered` is sent before
/// `Output`.
#[derive(Debug)]
pub enum RuntimeEvent<R, O> {
  Rendered(RenderingAndSnapshot<R>),
  Output(O),
}

/// Receives runtime events.
pub trait RuntimeNotifier<R, O>: Send + Sync {
  fn notify(&self, event: RuntimeEvent<R, O>);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl<R, O> RuntimeNotifier<R, O> for NoopNotifier {
  fn notify(&self, _event: RuntimeEvent<R, O>) {}
}

/// Forwards events to an unbounded channel.
///
/// The runtime never waits on a slow consumer. Events sent after the receiver is dropped are
/// discarded.
#[derive(Debug)]
pub struct ChannelNotifier<R, O> {
  sender: mpsc::UnboundedSender<RuntimeEvent<R, O>>,
}

impl<R, O> ChannelNotifier<R, O> {
  pub fn new(sender: mpsc::UnboundedSender<RuntimeEvent<R, O>>) -> Self {
    Self { sender }
  }

  /// Create a notifier and the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<RuntimeEvent<R, O>>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self { sender }, receiver)
  }
}

impl<R, O> Clone for ChannelNotifier<R, O> {
  fn clone(&self) -> Self {
    Self {
      sender: self.sender.clone(),
    }
  }
}

impl<R: Send, O: Send> RuntimeNotifier<R, O> for ChannelNotifier<R, O> {
  fn notify(&self, event: RuntimeEvent<R, O>) {
    // Receiver gone means nobody is listening anymore.
    let _ = self.sender.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_channel_notifier_forwards_in_order() {
    let (notifier, mut receiver) = ChannelNotifier::<&str, u32>::channel();
    notifier.notify(RuntimeEvent::Rendered(RenderingAndSnapshot {
      rendering: "first",
      snapshot: TreeSnapshot::for_root_only(None),
    }));
    notifier.notify(RuntimeEvent::Output(3));

    assert!(matches!(
      receiver.try_recv(),
      Ok(RuntimeEvent::Rendered(RenderingAndSnapshot { rendering: "first", .. }))
    ));
    assert!(matches!(receiver.try_recv(), Ok(RuntimeEvent::Output(3))));
  }

  #[test]
  fn test_channel_notifier_ignores_closed_receiver() {
    let (notifier, receiver) = ChannelNotifier::<(), ()>::channel();
    drop(receiver);
    notifier.notify(RuntimeEvent::Output(()));
  }
}
