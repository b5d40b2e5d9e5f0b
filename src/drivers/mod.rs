//! Device-facing helpers
//!
//! Devices themselves are collaborators (see [`crate::platform`]); what
//! lives here is the kernel-side plumbing on top of them.

pub mod console;
