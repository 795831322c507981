//! Single-probe engine: the callback set and its lifecycle.
//!
//! - `handler`: the probe descriptor and its pre/post/fault handlers
//! - `manager`: configure, register and tear down the one probe

pub mod handler;
pub mod manager;

pub use handler::{ProbeDescriptor, ProbeStats, StatsSnapshot};
pub use manager::{ModuleState, ProbeModule};

use crate::context::ProbeContext;
use crate::error::CopyError;

/// Handler functions a host must never place a probe on.
pub const NOKPROBE_SYMBOLS: &[&str] = &[
    "kprobe_lkm::probe::handler::ProbeDescriptor::pre_handler",
    "kprobe_lkm::probe::handler::ProbeDescriptor::post_handler",
    "kprobe_lkm::probe::handler::ProbeDescriptor::fault_handler",
];

/// Outcome of a pre-handler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreStatus {
    /// Probe accepted; let the probed function run and call the post-handler.
    Continue,
    /// Argument capture failed; this hit is aborted.
    Fault(CopyError),
}

impl PreStatus {
    pub fn is_continue(&self) -> bool {
        matches!(self, PreStatus::Continue)
    }

    /// Numeric status for the host: 0 or `-EFAULT`.
    pub fn code(&self) -> i32 {
        match self {
            PreStatus::Continue => 0,
            PreStatus::Fault(e) => e.code(),
        }
    }
}

/// Outcome of a fault-handler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStatus {
    /// Fault left to the host's default policy.
    NotHandled,
}

impl FaultStatus {
    pub fn code(&self) -> i32 {
        0
    }
}

/// Callback set a host dispatches to on every hit of the probed symbol.
///
/// All three run in atomic context: they must not block or sleep, and the
/// host may run them concurrently on several CPUs.
pub trait ProbeHandlers: Send + Sync {
    /// Symbol this callback set is bound to.
    fn symbol(&self) -> &str;

    /// Runs immediately before the probed function.
    fn pre_handler(&self, ctx: &ProbeContext) -> PreStatus;

    /// Runs immediately after the probed function returns.
    fn post_handler(&self, ctx: &ProbeContext, flags: u64);

    /// Runs if the probe's own handler code faults.
    fn fault_handler(&self, ctx: &ProbeContext, trapnr: u32) -> FaultStatus;
}
