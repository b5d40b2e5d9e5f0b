//! Launch, wait and terminate
//!
//! # Launch
//! 1. Allocate a pid and a process record under the table lock
//! 2. Ask the scheduler for a thread of control that loads and runs the child
//! 3. Block on the load rendezvous until the child has tried to load
//! 4. Loaded: record the parent–child link and hand out the pid.
//!    Failed: the child has already torn itself down; report failure
//!
//! # Termination
//! Removes the record, drops the links the process held as a parent,
//! releases its address space and file state, prints the exit trace and
//! signals the exit rendezvous, in that order.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use super::table::AllocError;
use super::{OneShot, Pid};
use crate::kernel::Kernel;
use crate::kprintln;
use crate::mm::AddressSpace;
use crate::platform::SpawnError;
use crate::user::Syscalls;

/// Outcome delivered through the load rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    Loaded,
    Failed,
}

/// Why a launch returned no pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchError {
    /// The command line has no program name.
    EmptyCommand,
    /// The launching process is gone.
    NoParent,
    /// No pids left.
    PidsExhausted,
    /// The scheduler could not start a thread of control.
    Spawn(SpawnError),
    /// The program could not be loaded.
    LoadFailed,
}

impl From<AllocError> for LaunchError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::NoParent => LaunchError::NoParent,
            AllocError::Exhausted => LaunchError::PidsExhausted,
        }
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty command line"),
            Self::NoParent => write!(f, "launching process is gone"),
            Self::PidsExhausted => write!(f, "out of process ids"),
            Self::Spawn(err) => write!(f, "spawn failed: {}", err),
            Self::LoadFailed => write!(f, "load failed"),
        }
    }
}

/// Split a command line into words.
fn parse_command_line(command_line: &str) -> Vec<String> {
    command_line.split_whitespace().map(String::from).collect()
}

/// Terminates its process with -1 on drop. A no-op once the process has
/// already exited.
struct ExitGuard<'k> {
    kernel: &'k Kernel,
    pid: Pid,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.kernel.terminate(self.pid, -1);
    }
}

impl Kernel {
    /// Launch `command_line` as a child of `parent`.
    ///
    /// Blocks `parent` until the child's load attempt is over; a pid is
    /// only ever returned for a child that loaded.
    pub fn launch(self: &Arc<Self>, parent: Pid, command_line: &str) -> Result<Pid, LaunchError> {
        let argv = parse_command_line(command_line);
        let name = argv.first().cloned().ok_or(LaunchError::EmptyCommand)?;

        let exit = Arc::new(OneShot::new());
        let load = Arc::new(OneShot::new());
        let pid = self.table.lock().allocate(parent, name.clone(), Arc::clone(&exit))?;
        log::debug!("[PROCESS] pid {} launching {:?} as pid {}", parent, command_line, pid);

        let kernel = Arc::clone(self);
        let child_load = Arc::clone(&load);
        let entry = Box::new(move || kernel.start_process(pid, argv, child_load));
        if let Err(err) = self.platform().scheduler.spawn(pid, &name, entry) {
            log::warn!("[PROCESS] pid {} ({}): {}", pid, name, err);
            self.table.lock().remove(pid);
            return Err(LaunchError::Spawn(err));
        }

        match load.wait(parent, &*self.platform().scheduler) {
            Some(LoadOutcome::Loaded) => {
                self.table.lock().link(parent, pid, exit);
                Ok(pid)
            }
            _ => Err(LaunchError::LoadFailed),
        }
    }

    /// Body of a new thread of control: load, report, run, exit.
    fn start_process(self: Arc<Self>, pid: Pid, argv: Vec<String>, load: Arc<OneShot<LoadOutcome>>) {
        let scheduler = Arc::clone(&self.platform().scheduler);
        let mut space = AddressSpace::new(Arc::clone(&self.frames));

        let image = match self.platform().loader.load(&argv, &mut space) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("[LOADER] pid {}: {}: {}", pid, argv[0], err);
                drop(space);
                self.terminate(pid, -1);
                let _ = load.signal(LoadOutcome::Failed, &*scheduler);
                return;
            }
        };

        log::debug!(
            "[LOADER] pid {}: {} loaded, {} pages, esp {}",
            pid,
            argv[0],
            space.mapped_pages(),
            image.esp
        );
        if let Some(process) = self.table.lock().get_mut(pid) {
            process.install(space);
        }
        let _ = load.signal(LoadOutcome::Loaded, &*scheduler);

        // Terminates with -1 unless `main` got as far as exit, unwinding included.
        let _guard = ExitGuard { kernel: &self, pid };
        let mut sys = Syscalls::new(&self, pid, image.esp);
        match image.program.main(&mut sys) {
            Ok(status) => {
                sys.exit(status);
            }
            Err(stopped) => log::debug!("[PROCESS] pid {} stopped: {}", pid, stopped),
        }
    }

    /// Wait for `child` of `parent` to exit and return its status.
    ///
    /// Returns -1 at once if `child` is not a child of `parent` or has
    /// already been waited on.
    pub fn wait(&self, parent: Pid, child: Pid) -> i32 {
        let claimed = self.table.lock().claim_wait(parent, child);
        let Some(exit) = claimed else {
            log::debug!("[PROCESS] pid {} wait({}): not a waitable child", parent, child);
            return -1;
        };

        let status = exit.wait(parent, &*self.platform().scheduler).unwrap_or(-1);
        self.table.lock().release_link(parent, child);
        log::debug!("[PROCESS] pid {} reaped pid {}: {}", parent, child, status);
        status
    }

    /// Terminate `pid` with `status`. A second call is a no-op.
    pub fn terminate(&self, pid: Pid, status: i32) {
        let removed = self.table.lock().remove(pid);
        let Some(mut process) = removed else {
            return;
        };

        let (space, exit) = process.release();
        let pages = space.as_ref().map_or(0, AddressSpace::mapped_pages);
        drop(space);
        self.platform().files.release(pid);

        if !self.is_halted() {
            kprintln!(&*self.platform().console, "{}: exit({})", process.name(), status);
        }
        log::debug!(
            "[PROCESS] pid {} ({}) terminated: status {}, parent {:?}, {} pages freed",
            pid,
            process.name(),
            status,
            process.parent(),
            pages
        );

        if exit.signal(status, &*self.platform().scheduler).is_err() {
            log::warn!("[PROCESS] pid {} exit signaled twice", pid);
        }
    }
}
