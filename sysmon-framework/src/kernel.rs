//! Kernel enforcement: the kprobes decide in-kernel from a copy of the
//! policy, and report what they did through a ring buffer.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};
use sysmon_common::{InterceptionEvent, OperationKind, SyscallEvent};
use sysmon_probes::{EventRing, PolicyMap, SyscallProbes};

use crate::{ChannelError, EventSink, FrameworkError, PolicyMirror, PolicySnapshot};

/// Keeps the kernel's policy slot in step with the [`crate::PolicyStore`].
pub struct KernelPolicyMirror {
    map: Mutex<PolicyMap>,
}

impl PolicyMirror for KernelPolicyMirror {
    fn publish(&self, snapshot: &PolicySnapshot) -> Result<(), ChannelError> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(snapshot.to_config())
            .map_err(|e| ChannelError::Transport(format!("failed to update kernel policy: {}", e)))
    }
}

/// Record one kernel event in `sink`. Returns false for a record that does
/// not decode.
pub fn forward(sink: &EventSink, raw: &SyscallEvent) -> bool {
    match InterceptionEvent::try_from(raw) {
        Ok(event) => {
            sink.append(event);
            true
        }
        Err(byte) => {
            warn!("Dropping kernel event with invalid field value {}", byte);
            false
        }
    }
}

/// Loaded and attached probes plus the userspace ends of their maps.
/// The calling process is exempt from interception. Dropping it detaches
/// everything.
pub struct KernelController {
    _probes: SyscallProbes,
    attached: Vec<OperationKind>,
    mirror: Arc<KernelPolicyMirror>,
    ring: EventRing,
    sink: Arc<EventSink>,
}

impl KernelController {
    pub fn start<P: AsRef<Path>>(bpf_obj_path: P, sink: Arc<EventSink>) -> Result<Self, FrameworkError> {
        let mut probes = SyscallProbes::load(bpf_obj_path)?;
        probes.set_exempt(std::process::id())?;
        let attached = probes.attach()?.to_vec();
        let mirror = Arc::new(KernelPolicyMirror {
            map: Mutex::new(probes.policy_map()?),
        });
        let ring = probes.event_ring()?;
        info!(
            "Kernel probes active for: {}",
            attached
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            _probes: probes,
            attached,
            mirror,
            ring,
            sink,
        })
    }

    pub fn mirror(&self) -> Arc<dyn PolicyMirror> {
        self.mirror.clone()
    }

    pub fn attached(&self) -> &[OperationKind] {
        &self.attached
    }

    /// Move pending kernel events into the sink.
    pub fn pump_events(&mut self) -> usize {
        let sink = &self.sink;
        let mut forwarded = 0;
        self.ring.drain(|raw| {
            if forward(sink, &raw) {
                forwarded += 1;
            }
        });
        forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysmon_common::Outcome;

    #[test]
    fn forwards_decoded_kernel_events() {
        let sink = EventSink::new();
        let raw = SyscallEvent::new(OperationKind::Write, Outcome::Denied, 314, 315);
        assert!(forward(&sink, &raw));
        let events = sink.recent(1);
        assert_eq!(events[0].event, InterceptionEvent::denied(OperationKind::Write, 314));
    }

    #[test]
    fn drops_undecodable_kernel_events() {
        let sink = EventSink::new();
        let mut raw = SyscallEvent::new(OperationKind::Open, Outcome::Observed, 1, 1);
        raw.operation = 9;
        assert!(!forward(&sink, &raw));
        assert!(sink.is_empty());
    }

    #[test]
    fn missing_object_fails_to_start() {
        let result = KernelController::start("/nonexistent/sysmon-ebpf", Arc::new(EventSink::new()));
        assert!(matches!(result, Err(FrameworkError::Probe(_))));
    }
}
