pub mod error;
pub mod syscall;

pub use error::ProbeError;
pub use syscall::{symbol_candidates, EventRing, PolicyMap, SyscallProbes};
