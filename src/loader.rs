//! Program Loader
//!
//! [`ProgramTable`] is a [`Loader`] over programs registered in memory. A
//! load maps two pages into the fresh address space:
//!
//! - the code page at `CODE_BASE`, read-only, holding the program name
//! - the stack page just below `PHYS_BASE`
//!
//! and builds the initial stack on the latter:
//!
//! ```text
//! PHYS_BASE ┌────────────────────┐
//!           │ argv[argc-1] bytes │
//!           │ ...                │
//!           │ argv[0] bytes      │
//!           │ pad to 4 bytes     │
//!           │ NULL               │ argv[argc]
//!           │ &argv[argc-1]      │
//!           │ ...                │
//!           │ &argv[0]           │ <- argv
//!           │ argv               │
//!           │ argc               │
//!    esp -> │ fake return addr   │
//!           └────────────────────┘
//! ```

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::mm::{
    AddressSpace, MappingError, PageFlags, VirtAddr, CODE_BASE, PAGE_SIZE, USER_STACK_TOP, WORD_SIZE,
};
use crate::platform::Loader;
use crate::trap::Stopped;
use crate::user::{Program, Syscalls};

/// Why a program could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// No program by that name.
    NotFound,
    /// The frame pool ran dry.
    OutOfMemory,
    /// The arguments do not fit on the stack page.
    ArgumentsTooLong,
    /// Page table error other than running out of frames.
    Mapping(MappingError),
}

impl From<MappingError> for LoadError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::OutOfMemory => LoadError::OutOfMemory,
            other => LoadError::Mapping(other),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such program"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::ArgumentsTooLong => write!(f, "arguments do not fit on the stack"),
            Self::Mapping(err) => write!(f, "mapping failed: {}", err),
        }
    }
}

/// A loaded program, ready to run.
pub struct LoadedImage {
    pub program: Arc<dyn Program>,
    /// Initial stack pointer.
    pub esp: VirtAddr,
}

impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedImage").field("esp", &self.esp).finish_non_exhaustive()
    }
}

/// Programs by name.
#[derive(Default)]
pub struct ProgramTable {
    programs: Mutex<BTreeMap<String, Arc<dyn Program>>>,
}

impl ProgramTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point under `name`, replacing any previous one.
    pub fn register<F>(&self, name: &str, main: F)
    where
        F: Fn(&mut Syscalls<'_>) -> Result<i32, Stopped> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(main));
    }

    /// Register `program` under `name`, replacing any previous one.
    pub fn insert(&self, name: &str, program: Arc<dyn Program>) {
        self.programs.lock().insert(String::from(name), program);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.programs.lock().keys().cloned().collect()
    }
}

impl Loader for ProgramTable {
    fn load(&self, argv: &[String], space: &mut AddressSpace) -> Result<LoadedImage, LoadError> {
        let name = argv.first().ok_or(LoadError::NotFound)?;
        let program = self
            .programs
            .lock()
            .get(name.as_str())
            .cloned()
            .ok_or(LoadError::NotFound)?;

        let code = VirtAddr::new(CODE_BASE);
        space.map_page(code, PageFlags::USER_CODE)?;
        let image = name.as_bytes();
        space.write(code, &image[..image.len().min(PAGE_SIZE)])?;

        let stack_page = VirtAddr::new(USER_STACK_TOP - PAGE_SIZE as u32);
        space.map_page(stack_page, PageFlags::USER_DATA)?;
        let esp = setup_stack(space, argv)?;

        Ok(LoadedImage { program, esp })
    }
}

/// Downward-growing cursor over the stack page.
struct StackBuilder<'a> {
    space: &'a mut AddressSpace,
    esp: u32,
    floor: u32,
}

impl StackBuilder<'_> {
    fn push(&mut self, bytes: &[u8]) -> Result<u32, LoadError> {
        let len = u32::try_from(bytes.len()).map_err(|_| LoadError::ArgumentsTooLong)?;
        if self.esp - self.floor < len {
            return Err(LoadError::ArgumentsTooLong);
        }
        self.esp -= len;
        self.space.write(VirtAddr::new(self.esp), bytes)?;
        Ok(self.esp)
    }

    fn push_word(&mut self, word: u32) -> Result<u32, LoadError> {
        self.push(&word.to_le_bytes())
    }

    fn align(&mut self) -> Result<(), LoadError> {
        let pad = (self.esp % WORD_SIZE) as usize;
        self.push(&[0u8; WORD_SIZE as usize][..pad]).map(|_| ())
    }
}

/// Lay out `argv` on the stack page. Returns the initial `esp`.
fn setup_stack(space: &mut AddressSpace, argv: &[String]) -> Result<VirtAddr, LoadError> {
    let mut stack = StackBuilder {
        space,
        esp: USER_STACK_TOP,
        floor: USER_STACK_TOP - PAGE_SIZE as u32,
    };

    let mut addrs = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        let mut bytes = Vec::with_capacity(arg.len() + 1);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);
        addrs.push(stack.push(&bytes)?);
    }
    stack.align()?;

    stack.push_word(0)?;
    // addrs runs argv[argc-1]..argv[0], the order they are pushed in.
    let mut argv_ptr = stack.esp;
    for &addr in &addrs {
        argv_ptr = stack.push_word(addr)?;
    }
    let argc = u32::try_from(argv.len()).map_err(|_| LoadError::ArgumentsTooLong)?;
    stack.push_word(argv_ptr)?;
    stack.push_word(argc)?;
    stack.push_word(0)?;

    Ok(VirtAddr::new(stack.esp))
}
