//! Kernel state
//!
//! [`Kernel`] ties the pieces together: the collaborators it was built
//! with, the frame pool every address space draws from, and the process
//! table. Process lifecycle operations live in [`crate::process::lifecycle`],
//! trap entry in [`crate::trap`].

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::mm::{AddressSpace, FrameAllocator, VirtAddr, PAGE_SIZE};
use crate::platform::Platform;
use crate::process::{Pid, ProcessTable};
use crate::syscall::validate::{self, Access, Fault};

/// Runtime tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Physical frames available to user address spaces.
    pub frame_count: usize,
    /// Largest single console write issued for a `write` call.
    pub console_chunk: usize,
    /// Bytes scanned for the NUL of a user string (command line, file name).
    pub max_user_string: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            frame_count: 256,
            console_chunk: 512,
            max_user_string: PAGE_SIZE,
        }
    }
}

pub struct Kernel {
    platform: Platform,
    config: KernelConfig,
    pub(crate) frames: Arc<FrameAllocator>,
    pub(crate) table: Mutex<ProcessTable>,
    halted: AtomicBool,
}

impl Kernel {
    pub fn new(platform: Platform, config: KernelConfig) -> Arc<Self> {
        log::debug!("[MM] frame pool: {} frames", config.frame_count);
        Arc::new(Self {
            platform,
            config,
            frames: Arc::new(FrameAllocator::new(config.frame_count)),
            table: Mutex::new(ProcessTable::new()),
            halted: AtomicBool::new(false),
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Run `command_line` as the initial program and wait for it.
    ///
    /// Returns its exit status, or -1 if it could not be launched.
    pub fn run(self: &Arc<Self>, command_line: &str) -> i32 {
        match self.launch(Pid::INIT, command_line) {
            Ok(pid) => self.wait(Pid::INIT, pid),
            Err(err) => {
                log::warn!("[PROCESS] cannot run {:?}: {}", command_line, err);
                -1
            }
        }
    }

    /// Power off. Every process traps out with [`Stopped::Halted`] from
    /// here on.
    ///
    /// [`Stopped::Halted`]: crate::trap::Stopped::Halted
    pub(crate) fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            log::debug!("[PROCESS] powering off");
            self.platform.machine.power_off();
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Run `f` on the address space of `pid`.
    ///
    /// A process with no address space (the initial pseudo-process, or a
    /// process already torn down) has nothing user code may touch.
    pub(crate) fn with_user_space<R>(
        &self,
        pid: Pid,
        f: impl FnOnce(&mut AddressSpace) -> Result<R, Fault>,
    ) -> Result<R, Fault> {
        let mut table = self.table.lock();
        let space = table
            .get_mut(pid)
            .and_then(|process| process.space_mut())
            .ok_or(Fault::Unmapped(VirtAddr::NULL))?;
        f(space)
    }

    /// User-mode load of `len` bytes at `addr`.
    pub(crate) fn user_load(&self, pid: Pid, addr: VirtAddr, len: usize) -> Result<Vec<u8>, Fault> {
        self.with_user_space(pid, |space| {
            validate::check_user_access(space, addr, len, Access::Read)?;
            let mut data = alloc::vec![0u8; len];
            space.read(addr, &mut data).map_err(|_| Fault::Unmapped(addr))?;
            Ok(data)
        })
    }

    /// User-mode store of `data` at `addr`.
    pub(crate) fn user_store(&self, pid: Pid, addr: VirtAddr, data: &[u8]) -> Result<(), Fault> {
        self.with_user_space(pid, |space| {
            validate::check_user_access(space, addr, data.len(), Access::Write)?;
            space.write(addr, data).map_err(|_| Fault::Unmapped(addr))
        })
    }

    /// Live user processes.
    pub fn process_count(&self) -> usize {
        self.table.lock().user_count()
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        self.table.lock().contains(pid)
    }

    /// Parent–child links still waiting to be consumed.
    pub fn link_count(&self) -> usize {
        self.table.lock().link_count()
    }

    /// Children `parent` may still wait on.
    pub fn children_of(&self, parent: Pid) -> Vec<Pid> {
        self.table.lock().children_of(parent)
    }

    pub fn free_frames(&self) -> usize {
        self.frames.free_frames()
    }
}
