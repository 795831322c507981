//! Kprobe timing module.
//!
//! Attaches a single probe to a named kernel function, captures the string
//! argument of each call, and for calls made by a selected process reports
//! the wall time spent in the function.
//!
//! The interception itself is delegated to the host through
//! [`host::ProbeHost`]; the privileged copy out of the caller's address space
//! is delegated through [`capture::CallerMemory`].
//!
//! # Quick Start
//!
//! ```ignore
//! use kprobe_lkm::{HeapAllocator, ProbeConfig, ProbeModule};
//!
//! // Load: validate parameters, allocate the capture buffer, register.
//! let module = ProbeModule::load(
//!     host,
//!     HeapAllocator,
//!     Arc::new(user_copy),
//!     ProbeConfig::new("do_sys_open").with_verbose(true),
//! )?;
//!
//! // ... the host now runs the handlers around every do_sys_open() call ...
//!
//! // Unload: unregister, then free the buffer.
//! drop(module);
//! ```

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

// =============================================================================
// Platform Abstraction (for testing support)
// =============================================================================

pub mod platform;

// =============================================================================
// Probe Engine
// =============================================================================

pub mod capture;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod probe;
pub mod timing;

// Re-export key types for convenience
pub use capture::{
    BufferAllocator, CallerMemory, CaptureBuffer, CaptureSlot, CountingAllocator, HeapAllocator,
};
pub use config::ProbeConfig;
pub use context::{ContextKind, ExecContext, ProbeContext, PtRegs};
pub use error::{ConfigError, CopyError, Error};
pub use host::{HostError, MockHost, ProbeHost};
pub use probe::{FaultStatus, ModuleState, PreStatus, ProbeDescriptor, ProbeHandlers, ProbeModule};
pub use timing::{TimingSnapshot, TimingState};
