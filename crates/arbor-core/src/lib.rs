//! Arbor Core
//!
//! Building blocks shared by the workflow tree runtime and by workflow authors:
//!
//! - [`WorkflowIdentifier`]: the comparable, optionally serializable identity of a workflow
//!   kind, with impostor wrapping.
//! - [`WorkflowAction`]: an atomic `(props, state) -> (state, output?)` transition.
//! - [`Worker`]: a stream of outputs run on a runtime task.
//! - [`Snapshot`] and [`TreeSnapshot`]: persisted state of one workflow and of a whole tree,
//!   with the length-prefixed wire format in [`codec`].

mod action;
pub mod codec;
mod error;
mod identifier;
mod snapshot;
mod worker;

pub use action::{Update, WorkflowAction};
pub use error::CoreError;
pub use identifier::WorkflowIdentifier;
pub use snapshot::{ChildSnapshots, Snapshot, TreeSnapshot, WorkflowNodeId};
pub use worker::{FinishedWorker, StreamWorker, TimerWorker, Worker};
