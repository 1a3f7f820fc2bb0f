//! File handle whose open, read and write pass through the hooks first.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use sysmon_common::{Decision, OperationKind, ProcessId};

use crate::HookManager;

pub struct MonitoredFile {
    file: File,
    hooks: Arc<HookManager>,
    caller: ProcessId,
}

impl MonitoredFile {
    /// Open `path` on behalf of the current process.
    pub fn open<P: AsRef<Path>>(
        hooks: &Arc<HookManager>,
        path: P,
        options: &OpenOptions,
    ) -> io::Result<Self> {
        Self::open_as(hooks, path, options, current_pid())
    }

    /// Open `path` attributing every operation to `caller`.
    pub fn open_as<P: AsRef<Path>>(
        hooks: &Arc<HookManager>,
        path: P,
        options: &OpenOptions,
        caller: ProcessId,
    ) -> io::Result<Self> {
        check(hooks, OperationKind::Open, caller)?;
        let file = options.open(path)?;
        Ok(Self {
            file,
            hooks: Arc::clone(hooks),
            caller,
        })
    }

    pub fn caller(&self) -> ProcessId {
        self.caller
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

impl Read for MonitoredFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        check(&self.hooks, OperationKind::Read, self.caller)?;
        self.file.read(buf)
    }
}

impl Write for MonitoredFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        check(&self.hooks, OperationKind::Write, self.caller)?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

pub fn current_pid() -> ProcessId {
    std::process::id() as ProcessId
}

fn check(hooks: &HookManager, kind: OperationKind, caller: ProcessId) -> io::Result<()> {
    match hooks.on_intercept(kind, caller) {
        Decision::Proceed => Ok(()),
        Decision::Deny => Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{}() blocked by policy for PID={}", kind, caller),
        )),
    }
}
