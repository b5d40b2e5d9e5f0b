//! Hosted platform
//!
//! Collaborators for running the kernel inside an ordinary process: every
//! user process is a host thread, blocking is `thread::park`, the console
//! is stdio or an in-memory capture.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};

use spin::Mutex;

use crate::kernel::{Kernel, KernelConfig};
use crate::platform::{Console, FileSystem, Loader, Machine, Platform, Scheduler, SpawnError};
use crate::process::Pid;

/// One host thread per process.
///
/// `park`/`unpark` already give the scheduler contract: an unpark before
/// the park leaves a token behind, and `park` may return spuriously.
#[derive(Default)]
pub struct ThreadScheduler {
    threads: Arc<Mutex<BTreeMap<Pid, Thread>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread as process `pid`.
    pub fn adopt_current(&self, pid: Pid) {
        self.threads.lock().insert(pid, thread::current());
    }

    /// Join every thread spawned so far, including ones spawned while
    /// joining.
    pub fn join_all(&self) {
        loop {
            let next = self.handles.lock().pop();
            let Some(handle) = next else {
                break;
            };
            if handle.join().is_err() {
                log::warn!("[PROCESS] a process thread panicked");
            }
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn spawn(
        &self,
        pid: Pid,
        name: &str,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<(), SpawnError> {
        let threads = Arc::clone(&self.threads);
        let handle = thread::Builder::new()
            .name(format!("{}#{}", name, pid))
            .spawn(move || {
                threads.lock().insert(pid, thread::current());
                entry();
                threads.lock().remove(&pid);
            })
            .map_err(|_| SpawnError)?;
        self.handles.lock().push(handle);
        Ok(())
    }

    fn block_current(&self) {
        thread::park();
    }

    fn unblock(&self, pid: Pid) {
        let thread = self.threads.lock().get(&pid).cloned();
        if let Some(thread) = thread {
            thread.unpark();
        }
    }

    fn yield_now(&self) {
        thread::yield_now();
    }
}

/// Console that records every write and serves input from a queue.
///
/// `read_byte` waits on an empty queue until input is pushed or the input
/// is closed. Nothing else wakes it, a halt included, so queue input up
/// front or call [`close_input`](Self::close_input).
#[derive(Default)]
pub struct CaptureConsole {
    input: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl CaptureConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: &[u8]) -> Self {
        let console = Self::new();
        console.push_input(input);
        console
    }

    pub fn push_input(&self, input: &[u8]) {
        self.input.lock().extend(input.iter().copied());
    }

    /// Once the queue runs dry, reads return 0 instead of waiting.
    pub fn close_input(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Bytes of input not consumed yet.
    pub fn pending_input(&self) -> usize {
        self.input.lock().len()
    }

    /// Every `write_bytes` call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Everything written, concatenated.
    pub fn output(&self) -> String {
        let bytes: Vec<u8> = self.writes.lock().concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Console for CaptureConsole {
    fn read_byte(&self) -> u8 {
        loop {
            if let Some(byte) = self.input.lock().pop_front() {
                return byte;
            }
            if self.closed.load(Ordering::SeqCst) {
                return 0;
            }
            thread::yield_now();
        }
    }

    fn write_bytes(&self, bytes: &[u8]) {
        self.writes.lock().push(bytes.to_vec());
    }
}

/// Console on the host's stdin and stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConsole;

impl Console for StdioConsole {
    /// End of input and read errors both read as 0.
    fn read_byte(&self) -> u8 {
        let mut byte = [0u8; 1];
        match std::io::stdin().lock().read_exact(&mut byte) {
            Ok(()) => byte[0],
            Err(err) => {
                log::warn!("[CONSOLE] stdin: {}", err);
                0
            }
        }
    }

    fn write_bytes(&self, bytes: &[u8]) {
        let mut out = std::io::stdout().lock();
        if let Err(err) = out.write_all(bytes).and_then(|()| out.flush()) {
            log::warn!("[CONSOLE] stdout: {}", err);
        }
    }
}

/// Power switch that remembers being turned off.
#[derive(Debug, Default)]
pub struct PowerSwitch {
    off: AtomicBool,
}

impl PowerSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_off(&self) -> bool {
        self.off.load(Ordering::SeqCst)
    }
}

impl Machine for PowerSwitch {
    fn power_off(&self) {
        self.off.store(true, Ordering::SeqCst);
    }
}

/// A kernel booted on the hosted platform, with the calling thread as
/// the initial pseudo-process.
pub struct Host {
    pub kernel: Arc<Kernel>,
    pub scheduler: Arc<ThreadScheduler>,
    pub power: Arc<PowerSwitch>,
}

impl Host {
    pub fn boot(
        loader: Arc<dyn Loader>,
        console: Arc<dyn Console>,
        files: Arc<dyn FileSystem>,
        config: KernelConfig,
    ) -> Self {
        let scheduler = Arc::new(ThreadScheduler::new());
        scheduler.adopt_current(Pid::INIT);
        let power = Arc::new(PowerSwitch::new());

        let platform = Platform {
            scheduler: scheduler.clone(),
            loader,
            console,
            files,
            machine: power.clone(),
        };

        Self {
            kernel: Kernel::new(platform, config),
            scheduler,
            power,
        }
    }

    /// Wait for every process thread to finish.
    pub fn shutdown(&self) {
        self.scheduler.join_all();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::loader::ProgramTable;
    use crate::platform::NullFileSystem;

    pub(crate) fn boot_with(programs: ProgramTable, console: Arc<CaptureConsole>, config: KernelConfig) -> Host {
        Host::boot(Arc::new(programs), console, Arc::new(NullFileSystem), config)
    }

    pub(crate) fn boot(programs: ProgramTable) -> (Host, Arc<CaptureConsole>) {
        let console = Arc::new(CaptureConsole::new());
        let host = boot_with(programs, Arc::clone(&console), KernelConfig::default());
        (host, console)
    }
}
