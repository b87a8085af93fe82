//! Arbor Runtime
//!
//! Runs a tree of [`Workflow`]s. Each workflow owns private state, renders a view of itself,
//! and may render child workflows, run [`Worker`]s and side effects, and emit outputs to its
//! parent. After every event the runtime re-renders the tree, reconciles children and tasks
//! against the previous pass, and reports the root rendering with a [`TreeSnapshot`] that
//! can restore the tree later.
//!
//! ```ignore
//! let mut runtime = RuntimeBuilder::new(Counter, ()).build()?;
//! let first = runtime.render()?;
//! runtime.root_sink().send(increment());
//! runtime.process_event().await?;
//! let second = runtime.render()?;
//! ```

mod config;
mod context;
mod error;
mod interceptor;
mod node;
mod notifier;
mod pass;
mod runtime;
mod session;
mod sink;
mod subtree;
mod tasks;
mod workflow;

pub use arbor_core::{
  ChildSnapshots, CoreError, FinishedWorker, Snapshot, StreamWorker, TimerWorker, TreeSnapshot,
  Update, Worker, WorkflowAction, WorkflowIdentifier, WorkflowNodeId,
};
pub use config::{BatchPolicy, RuntimeConfig};
pub use context::{EventHandler, RenderContext};
pub use error::{Result, RuntimeError};
pub use interceptor::{
  ErasedRendering, ErasedState, InterceptorChain, TracingInterceptor, WorkflowInterceptor,
};
pub use notifier::{
  ChannelNotifier, NoopNotifier, RenderingAndSnapshot, RuntimeEvent, RuntimeNotifier,
};
pub use runtime::{Processed, RuntimeBuilder, WorkflowRuntime};
pub use session::WorkflowSession;
pub use sink::Sink;
pub use workflow::{ActionOf, Workflow};
