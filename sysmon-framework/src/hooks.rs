//! In-process interception hooks.
//!
//! One hook per [`OperationKind`] is installed when the manager is built.
//! `on_intercept` runs synchronously before the operation's effect and
//! never fails: anything it cannot decide resolves to `Proceed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sysmon_common::{decide, Decision, InterceptionEvent, OperationKind, ProcessId, Verdict};

use crate::{EventSink, PolicyStore};

/// Checkpoint for a single operation kind.
#[derive(Debug)]
pub struct InterceptHook {
    kind: OperationKind,
    observed: AtomicU64,
    denied: AtomicU64,
}

impl InterceptHook {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            observed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn stats(&self) -> HookStats {
        HookStats {
            kind: self.kind,
            observed: self.observed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookStats {
    pub kind: OperationKind,
    pub observed: u64,
    pub denied: u64,
}

pub struct HookManager {
    policy: Arc<PolicyStore>,
    sink: Arc<EventSink>,
    hooks: [InterceptHook; 3],
}

impl HookManager {
    /// Install the open, read and write hooks against `policy`.
    pub fn install(policy: Arc<PolicyStore>, sink: Arc<EventSink>) -> Self {
        Self {
            policy,
            sink,
            hooks: OperationKind::ALL.map(InterceptHook::new),
        }
    }

    pub fn hook(&self, kind: OperationKind) -> &InterceptHook {
        &self.hooks[kind.index()]
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    pub fn sink(&self) -> &Arc<EventSink> {
        &self.sink
    }

    /// Decide whether `caller` may perform `kind` right now.
    ///
    /// OFF costs one atomic load and a compare. A `Deny` is a policy
    /// outcome, not an error, and is always accompanied by a `Denied` event.
    #[inline]
    pub fn on_intercept(&self, kind: OperationKind, caller: ProcessId) -> Decision {
        let verdict = decide(&self.policy.config(), kind, caller);
        match verdict {
            Verdict::Pass => {}
            Verdict::Observe => {
                self.sink.append(InterceptionEvent::observed(kind, caller));
                self.hook(kind).observed.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Deny => {
                self.sink.append(InterceptionEvent::denied(kind, caller));
                self.hook(kind).denied.fetch_add(1, Ordering::Relaxed);
            }
        }
        verdict.decision()
    }

    pub fn stats(&self) -> Vec<HookStats> {
        self.hooks.iter().map(InterceptHook::stats).collect()
    }
}
