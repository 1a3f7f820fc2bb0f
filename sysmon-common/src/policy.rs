//! The interception decision, shared verbatim by the kernel probes and the
//! in-process hook manager.

use crate::ebpf::PolicyConfig;
use crate::event::Outcome;
use crate::operation::{Decision, EnforcementMode, OperationKind};

/// Raw process filter value meaning "every process".
pub const ANY_PROCESS: i32 = -1;

/// Restricts BLOCK enforcement to a single calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "user", serde(from = "i32", into = "i32"))]
pub enum ProcessFilter {
    #[default]
    Any,
    Pid(i32),
}

impl ProcessFilter {
    /// `-1` is the "any" sentinel; every other value, including other
    /// negatives, names exactly one process id.
    pub const fn from_raw(raw: i32) -> Self {
        if raw == ANY_PROCESS {
            ProcessFilter::Any
        } else {
            ProcessFilter::Pid(raw)
        }
    }

    pub const fn raw(self) -> i32 {
        match self {
            ProcessFilter::Any => ANY_PROCESS,
            ProcessFilter::Pid(pid) => pid,
        }
    }

    #[inline(always)]
    pub const fn matches(self, caller: i32) -> bool {
        match self {
            ProcessFilter::Any => true,
            ProcessFilter::Pid(pid) => pid == caller,
        }
    }
}

impl From<i32> for ProcessFilter {
    fn from(raw: i32) -> Self {
        ProcessFilter::from_raw(raw)
    }
}

impl From<ProcessFilter> for i32 {
    fn from(filter: ProcessFilter) -> Self {
        filter.raw()
    }
}

/// What a hook should do with one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let it through, record nothing.
    Pass,
    /// Let it through and record an `Observed` event.
    Observe,
    /// Refuse it and record a `Denied` event.
    Deny,
}

impl Verdict {
    #[inline(always)]
    pub const fn decision(self) -> Decision {
        match self {
            Verdict::Deny => Decision::Deny,
            Verdict::Pass | Verdict::Observe => Decision::Proceed,
        }
    }

    #[inline(always)]
    pub const fn outcome(self) -> Option<Outcome> {
        match self {
            Verdict::Pass => None,
            Verdict::Observe => Some(Outcome::Observed),
            Verdict::Deny => Some(Outcome::Denied),
        }
    }
}

/// Decide what to do with `kind` invoked by `caller` under `policy`.
///
/// Any byte outside the known encodings resolves to [`Verdict::Pass`]: the
/// monitor never denies because of its own malformed state.
#[inline(always)]
pub fn decide(policy: &PolicyConfig, kind: OperationKind, caller: i32) -> Verdict {
    if policy.mode == EnforcementMode::Off as u8 {
        return Verdict::Pass;
    }
    if policy.target != kind as u8 {
        return Verdict::Pass;
    }
    match EnforcementMode::from_raw(policy.mode) {
        Some(EnforcementMode::Log) => Verdict::Observe,
        Some(EnforcementMode::Block)
            if ProcessFilter::from_raw(policy.target_pid).matches(caller) =>
        {
            Verdict::Deny
        }
        _ => Verdict::Pass,
    }
}

/// Exempt-slot value meaning "nobody is exempt".
pub const NO_EXEMPTION: u32 = 0;

/// [`decide`], except that `exempt` always passes unrecorded.
///
/// The agent exempts itself so that serving control traffic and event polls
/// never produces events of its own.
#[inline(always)]
pub fn decide_unless_exempt(
    policy: &PolicyConfig,
    exempt: u32,
    kind: OperationKind,
    caller: u32,
) -> Verdict {
    if exempt != NO_EXEMPTION && caller == exempt {
        return Verdict::Pass;
    }
    decide(policy, kind, caller as i32)
}

#[cfg(all(test, feature = "user"))]
mod tests {
    use super::*;

    fn policy(mode: EnforcementMode, target: OperationKind, filter: ProcessFilter) -> PolicyConfig {
        PolicyConfig::new(mode, target, filter)
    }

    #[test]
    fn off_never_records() {
        let p = policy(EnforcementMode::Off, OperationKind::Open, ProcessFilter::Any);
        for kind in OperationKind::ALL {
            assert_eq!(decide(&p, kind, 42), Verdict::Pass);
        }
    }

    #[test]
    fn log_only_matches_target() {
        let p = policy(EnforcementMode::Log, OperationKind::Read, ProcessFilter::Pid(7));
        assert_eq!(decide(&p, OperationKind::Open, 42), Verdict::Pass);
        assert_eq!(decide(&p, OperationKind::Write, 42), Verdict::Pass);
        // LOG ignores the process filter.
        assert_eq!(decide(&p, OperationKind::Read, 42), Verdict::Observe);
    }

    #[test]
    fn block_respects_process_filter() {
        let any = policy(EnforcementMode::Block, OperationKind::Open, ProcessFilter::Any);
        assert_eq!(decide(&any, OperationKind::Open, 42), Verdict::Deny);

        let other = policy(EnforcementMode::Block, OperationKind::Open, ProcessFilter::Pid(43));
        assert_eq!(decide(&other, OperationKind::Open, 42), Verdict::Pass);
        assert_eq!(decide(&other, OperationKind::Open, 43), Verdict::Deny);
    }

    #[test]
    fn block_applies_to_every_kind() {
        for kind in OperationKind::ALL {
            let p = policy(EnforcementMode::Block, kind, ProcessFilter::Any);
            assert_eq!(decide(&p, kind, 1).decision(), Decision::Deny);
        }
    }

    #[test]
    fn malformed_policy_fails_open() {
        let mut p = PolicyConfig::default();
        p.mode = 9;
        p.target = OperationKind::Open as u8;
        assert_eq!(decide(&p, OperationKind::Open, 1), Verdict::Pass);

        let mut p = policy(EnforcementMode::Block, OperationKind::Open, ProcessFilter::Any);
        p.target = 200;
        for kind in OperationKind::ALL {
            assert_eq!(decide(&p, kind, 1), Verdict::Pass);
        }
    }

    #[test]
    fn exempt_caller_always_passes() {
        let p = policy(EnforcementMode::Block, OperationKind::Write, ProcessFilter::Any);
        assert_eq!(decide_unless_exempt(&p, 900, OperationKind::Write, 900), Verdict::Pass);
        assert_eq!(decide_unless_exempt(&p, 900, OperationKind::Write, 901), Verdict::Deny);

        let p = policy(EnforcementMode::Log, OperationKind::Read, ProcessFilter::Any);
        assert_eq!(decide_unless_exempt(&p, 900, OperationKind::Read, 900), Verdict::Pass);
        assert_eq!(
            decide_unless_exempt(&p, NO_EXEMPTION, OperationKind::Read, 900),
            Verdict::Observe
        );
    }

    #[test]
    fn other_negative_pids_match_nobody_but_themselves() {
        let filter = ProcessFilter::from_raw(-5);
        assert_eq!(filter, ProcessFilter::Pid(-5));
        assert!(!filter.matches(1));
        assert!(ProcessFilter::from_raw(-1).matches(1));
    }
}
