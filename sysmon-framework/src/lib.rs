//! The sysmon engine.
//!
//! A process-wide [`PolicyStore`] is read on every intercepted call by the
//! [`HookManager`], which records matching calls in the [`EventSink`]. The
//! [`control`] module mutates the store on behalf of an operator, and the
//! [`Orchestrator`] drives the store through a cycle of operations, advancing
//! whenever the sink shows the targeted operation happened.

pub mod control;
pub mod error;
pub mod event_sink;
pub mod hooks;
pub mod intercept;
pub mod kernel;
pub mod orchestrator;
pub mod policy_store;

pub use control::{Ack, ControlChannel, ControlRequest, LocalChannel, PolicyMirror, RawRequest};
pub use error::{ChannelError, FrameworkError, FsmError, OrchestratorError, ValidationError};
pub use event_sink::{Epoch, EventQuery, EventSink, EventSource};
pub use hooks::{HookManager, HookStats};
pub use intercept::MonitoredFile;
pub use kernel::KernelController;
pub use orchestrator::{Detection, Fsm, Orchestrator, OrchestratorConfig};
pub use policy_store::{PolicySnapshot, PolicyStore};
