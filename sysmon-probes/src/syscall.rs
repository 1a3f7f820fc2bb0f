use std::path::Path;

use aya::maps::{Array, MapData, RingBuf};
use aya::programs::KProbe;
use aya::{Ebpf, EbpfLoader};
use log::{error, info, warn};
use sysmon_common::ebpf::{EVENTS_MAP, EXEMPT_MAP, POLICY_MAP, PROGRAM_NAMES};
use sysmon_common::{OperationKind, PolicyConfig, SyscallEvent};

use crate::ProbeError;

/// Kernel symbols tried, in order, when attaching the probe for `kind`.
///
/// Only syscall wrappers are listed because denial relies on error
/// injection, which the kernel allows on those entry points.
pub fn symbol_candidates(kind: OperationKind) -> &'static [&'static str] {
    match kind {
        OperationKind::Open => &["__x64_sys_openat", "__arm64_sys_openat"],
        OperationKind::Read => &["__x64_sys_read", "__arm64_sys_read"],
        OperationKind::Write => &["__x64_sys_write", "__arm64_sys_write"],
    }
}

/// The loaded sysmon BPF object and its kprobes.
///
/// Programs stay attached for as long as this value lives; dropping it
/// detaches every probe.
pub struct SyscallProbes {
    bpf: Ebpf,
    attached: Vec<OperationKind>,
}

impl SyscallProbes {
    /// Load the compiled probe object without attaching anything.
    pub fn load<P: AsRef<Path>>(bpf_obj_path: P) -> Result<Self, ProbeError> {
        let path = bpf_obj_path.as_ref();
        let bpf = EbpfLoader::new()
            .load_file(path)
            .map_err(|e| ProbeError::Load(format!("Failed to load BPF object {}: {}", path.display(), e)))?;
        info!("Loaded BPF object: {}", path.display());
        Ok(Self {
            bpf,
            attached: Vec::new(),
        })
    }

    /// Attach one kprobe per operation kind.
    ///
    /// A kind whose symbols are all missing is logged and skipped, matching
    /// how a partially supported kernel still gets the probes it can carry.
    /// Fails only if nothing could be attached.
    pub fn attach(&mut self) -> Result<&[OperationKind], ProbeError> {
        for kind in OperationKind::ALL {
            let name = PROGRAM_NAMES[kind.index()];
            let program: &mut KProbe = self
                .bpf
                .program_mut(name)
                .ok_or_else(|| ProbeError::Load(format!("program {} not found", name)))?
                .try_into()
                .map_err(|e| ProbeError::Load(format!("Failed to convert {} to kprobe: {}", name, e)))?;
            program
                .load()
                .map_err(|e| ProbeError::Load(format!("Failed to load {}: {}", name, e)))?;

            let mut attached = false;
            for symbol in symbol_candidates(kind) {
                match program.attach(*symbol, 0) {
                    Ok(_) => {
                        info!("Attached kprobe {} -> {}", name, symbol);
                        attached = true;
                        break;
                    }
                    Err(e) => warn!("Trying alternative {} symbol ({} failed: {})", kind, symbol, e),
                }
            }
            if attached {
                self.attached.push(kind);
            } else {
                error!("Failed to register kprobe for {}", kind);
            }
        }

        if self.attached.is_empty() {
            return Err(ProbeError::Attach("no kprobe could be attached".to_string()));
        }
        Ok(&self.attached)
    }

    pub fn attached(&self) -> &[OperationKind] {
        &self.attached
    }

    /// Exempt thread-group `tgid` from every decision. The agent calls this
    /// with its own pid before attaching.
    pub fn set_exempt(&mut self, tgid: u32) -> Result<(), ProbeError> {
        let map = self
            .bpf
            .map_mut(EXEMPT_MAP)
            .ok_or_else(|| ProbeError::Map(format!("{} map not found", EXEMPT_MAP)))?;
        let mut exempt: Array<_, u32> = Array::try_from(map)?;
        exempt.set(0, tgid, 0)?;
        info!("Exempted pid {} from interception", tgid);
        Ok(())
    }

    /// Take ownership of the policy slot. Can only be taken once.
    pub fn policy_map(&mut self) -> Result<PolicyMap, ProbeError> {
        let map = self
            .bpf
            .take_map(POLICY_MAP)
            .ok_or_else(|| ProbeError::Map(format!("{} map not found", POLICY_MAP)))?;
        Ok(PolicyMap {
            map: Array::try_from(map)?,
        })
    }

    /// Take ownership of the event ring buffer. Can only be taken once.
    pub fn event_ring(&mut self) -> Result<EventRing, ProbeError> {
        let map = self
            .bpf
            .take_map(EVENTS_MAP)
            .ok_or_else(|| ProbeError::Map(format!("{} map not found", EVENTS_MAP)))?;
        Ok(EventRing {
            ring: RingBuf::try_from(map)?,
        })
    }
}

/// Writable handle on the kernel policy slot.
pub struct PolicyMap {
    map: Array<MapData, PolicyConfig>,
}

impl PolicyMap {
    pub fn write(&mut self, policy: PolicyConfig) -> Result<(), ProbeError> {
        self.map.set(0, policy, 0)?;
        Ok(())
    }

    pub fn read(&self) -> Result<PolicyConfig, ProbeError> {
        Ok(self.map.get(&0, 0)?)
    }
}

/// Consumer side of the kernel event ring buffer.
pub struct EventRing {
    ring: RingBuf<MapData>,
}

impl EventRing {
    /// Hand every pending record to `f`; returns how many were read.
    /// Truncated records are skipped.
    pub fn drain<F: FnMut(SyscallEvent)>(&mut self, mut f: F) -> usize {
        let mut count = 0;
        while let Some(item) = self.ring.next() {
            if item.len() < std::mem::size_of::<SyscallEvent>() {
                warn!("Dropping short ring buffer record ({} bytes)", item.len());
                continue;
            }
            let event: SyscallEvent =
                unsafe { std::ptr::read_unaligned(item.as_ptr() as *const SyscallEvent) };
            f(event);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_wrapper_symbols() {
        for kind in OperationKind::ALL {
            let symbols = symbol_candidates(kind);
            assert!(!symbols.is_empty());
            assert!(symbols.iter().all(|s| s.contains(kind.name())));
        }
    }

    #[test]
    fn missing_object_is_a_load_error() {
        let err = SyscallProbes::load("/nonexistent/sysmon.bpf.o").err().unwrap();
        assert!(matches!(err, ProbeError::Load(_)));
    }
}
