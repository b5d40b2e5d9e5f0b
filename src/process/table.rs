//! Process table
//!
//! Live processes keyed by pid, plus the parent–child links a parent may
//! still wait on. A link is keyed by `(parent, child)` and holds its own
//! handle to the child's exit rendezvous, so it outlives the child's record.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use super::{OneShot, Pid};
use crate::mm::AddressSpace;

/// Progress of a process's load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
}

/// Kernel-side record of one process.
pub struct Process {
    pid: Pid,
    name: String,
    parent: Option<Pid>,
    space: Option<AddressSpace>,
    load: LoadState,
    exit: Arc<OneShot<i32>>,
}

impl Process {
    fn new(pid: Pid, name: String, parent: Option<Pid>, exit: Arc<OneShot<i32>>) -> Self {
        Self {
            pid,
            name,
            parent,
            space: None,
            load: LoadState::Pending,
            exit,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Program name: the first word of the command line.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    pub fn space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    pub fn space_mut(&mut self) -> Option<&mut AddressSpace> {
        self.space.as_mut()
    }

    /// Install a freshly loaded image and mark the load as done.
    pub(crate) fn install(&mut self, space: AddressSpace) {
        self.space = Some(space);
        self.load = LoadState::Loaded;
    }

    /// Hand back the pieces termination still has to release.
    pub(crate) fn release(&mut self) -> (Option<AddressSpace>, Arc<OneShot<i32>>) {
        (self.space.take(), Arc::clone(&self.exit))
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("load", &self.load)
            .field("pages", &self.space.as_ref().map(AddressSpace::mapped_pages))
            .finish()
    }
}

/// Claim a parent holds on one of its children.
struct ChildLink {
    exit: Arc<OneShot<i32>>,
    waited: bool,
}

/// Why a new process record could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The parent is not (or no longer) a live process.
    NoParent,
    /// Pid space exhausted; pids are never reused.
    Exhausted,
}

pub struct ProcessTable {
    processes: BTreeMap<Pid, Process>,
    links: BTreeMap<(Pid, Pid), ChildLink>,
    next_pid: i32,
}

impl ProcessTable {
    /// Create a table holding only the initial pseudo-process.
    pub fn new() -> Self {
        let mut processes = BTreeMap::new();
        let mut init = Process::new(Pid::INIT, String::from("main"), None, Arc::new(OneShot::new()));
        init.load = LoadState::Loaded;
        processes.insert(Pid::INIT, init);

        Self {
            processes,
            links: BTreeMap::new(),
            next_pid: Pid::FIRST_USER.as_raw(),
        }
    }

    /// Create a record for a new child of `parent`.
    pub fn allocate(
        &mut self,
        parent: Pid,
        name: String,
        exit: Arc<OneShot<i32>>,
    ) -> Result<Pid, AllocError> {
        if !self.processes.contains_key(&parent) {
            return Err(AllocError::NoParent);
        }
        let pid = Pid::from_raw(self.next_pid);
        self.next_pid = self.next_pid.checked_add(1).ok_or(AllocError::Exhausted)?;
        self.processes.insert(pid, Process::new(pid, name, Some(parent), exit));
        Ok(pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Remove `pid` along with every link it holds as a parent.
    ///
    /// Its children keep running; they simply have nobody left to wait on
    /// them.
    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        let process = self.processes.remove(&pid)?;
        self.links.retain(|&(parent, _), _| parent != pid);
        Some(process)
    }

    /// Record that `parent` may wait on `child`.
    ///
    /// Does nothing if the parent is gone.
    pub fn link(&mut self, parent: Pid, child: Pid, exit: Arc<OneShot<i32>>) {
        if self.processes.contains_key(&parent) {
            self.links.insert((parent, child), ChildLink { exit, waited: false });
        }
    }

    /// Take the single wait `parent` is allowed on `child`.
    ///
    /// Returns `None` if `child` was never launched by `parent` or has
    /// already been waited on.
    pub fn claim_wait(&mut self, parent: Pid, child: Pid) -> Option<Arc<OneShot<i32>>> {
        let link = self.links.get_mut(&(parent, child))?;
        if link.waited {
            return None;
        }
        link.waited = true;
        Some(Arc::clone(&link.exit))
    }

    /// Drop a link once its wait has completed.
    pub fn release_link(&mut self, parent: Pid, child: Pid) {
        self.links.remove(&(parent, child));
    }

    /// Children `parent` may still wait on.
    pub fn children_of(&self, parent: Pid) -> Vec<Pid> {
        self.links
            .range((parent, Pid::from_raw(i32::MIN))..=(parent, Pid::from_raw(i32::MAX)))
            .filter(|(_, link)| !link.waited)
            .map(|(&(_, child), _)| child)
            .collect()
    }

    /// Live processes, the initial pseudo-process excluded.
    pub fn user_count(&self) -> usize {
        self.processes.len() - usize::from(self.processes.contains_key(&Pid::INIT))
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
