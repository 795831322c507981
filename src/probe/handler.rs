//! Probe descriptor and its pre/post/fault handlers.
//!
//! The pre-handler captures the string argument of the probed call, filters
//! on the calling process name and stamps the entry time for matching calls.
//! The post-handler stamps the exit time and reports the delta.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::capture::{CallerMemory, CaptureBuffer, CaptureSlot};
use crate::config::ProbeConfig;
use crate::context::ProbeContext;
use crate::platform;
use crate::error::CopyError;
use crate::probe::{FaultStatus, PreStatus, ProbeHandlers};
use crate::timing::{self, TimingLock, TimingSnapshot};

/// Per-probe hit counters.
#[derive(Debug, Default)]
pub struct ProbeStats {
    hits: AtomicU64,
    filtered: AtomicU64,
    timed: AtomicU64,
    copy_faults: AtomicU64,
    post_hits: AtomicU64,
    faults: AtomicU64,
}

/// Point-in-time copy of [`ProbeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Pre-handler invocations
    pub hits: u64,
    /// Hits whose process name did not match the filter
    pub filtered: u64,
    /// Hits that stamped a start time
    pub timed: u64,
    /// Hits aborted by a failed argument copy
    pub copy_faults: u64,
    /// Post-handler invocations
    pub post_hits: u64,
    /// Fault-handler invocations
    pub faults: u64,
}

impl ProbeStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            timed: self.timed.load(Ordering::Relaxed),
            copy_faults: self.copy_faults.load(Ordering::Relaxed),
            post_hits: self.post_hits.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// The one probe this module attaches.
///
/// Owns the timing pair and the capture buffer slot; the host only ever sees
/// it through [`ProbeHandlers`].
pub struct ProbeDescriptor {
    symbol: String,
    addr: AtomicUsize,
    string_arg: usize,
    comm_filter: String,
    verbose: AtomicBool,
    timing: TimingLock,
    capture: CaptureSlot,
    memory: Arc<dyn CallerMemory>,
    stats: ProbeStats,
}

impl ProbeDescriptor {
    /// Bind a validated config, a capture buffer and the copy primitive.
    pub fn new(config: &ProbeConfig, buffer: CaptureBuffer, memory: Arc<dyn CallerMemory>) -> Self {
        Self {
            symbol: config.target_function.clone(),
            addr: AtomicUsize::new(0),
            string_arg: config.string_arg,
            comm_filter: config.comm_filter.clone(),
            verbose: AtomicBool::new(config.verbose),
            timing: TimingLock::new(),
            capture: CaptureSlot::new(buffer),
            memory,
            stats: ProbeStats::default(),
        }
    }

    /// Record the address the host attached the probe at.
    pub fn bind_addr(&self, addr: usize) {
        self.addr.store(addr, Ordering::Release);
    }

    pub fn addr(&self) -> usize {
        self.addr.load(Ordering::Acquire)
    }

    pub fn set_verbose(&self, enabled: bool) {
        self.verbose.store(enabled, Ordering::SeqCst);
        info!(
            "kprobe_lkm: verbose mode {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::SeqCst)
    }

    pub fn timing(&self) -> TimingSnapshot {
        self.timing.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Copy of the last captured argument, if the buffer is still held.
    pub fn captured(&self) -> Option<String> {
        let slot = self.capture.enter(platform::cpu_id()).ok()?;
        slot.as_ref().map(|buf| String::from(buf.as_str()))
    }

    /// Take the capture buffer back for release.
    ///
    /// Only valid once the host can no longer dispatch to this descriptor.
    pub(crate) fn take_buffer(&self) -> Option<CaptureBuffer> {
        self.capture.enter(platform::cpu_id()).ok()?.take()
    }

    /// Capture the string argument into the buffer.
    ///
    /// A hit landing on a CPU that is already mid-copy gets
    /// [`CopyError::Busy`] instead of waiting on itself.
    fn capture_arg(&self, ctx: &ProbeContext, matched: bool) -> Result<(), CopyError> {
        let src = ctx.regs.arg(self.string_arg);
        let mut slot = self.capture.enter(ctx.exec.cpu)?;
        let buf = slot.as_mut().ok_or(CopyError::NoBuffer)?;

        let len = buf.fill_from(&*self.memory, src).map_err(CopyError::Fault)?;
        if len == 0 {
            return Err(CopyError::Empty);
        }

        if matched {
            info!(
                "kprobe_lkm: pre_handler(): FILE being opened: ptr [arg{}]: {:#x}   name:{}",
                self.string_arg,
                src,
                buf.as_str()
            );
        }
        Ok(())
    }
}

impl ProbeHandlers for ProbeDescriptor {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline(never)]
    fn pre_handler(&self, ctx: &ProbeContext) -> PreStatus {
        ProbeStats::bump(&self.stats.hits);
        info!("kprobe_lkm: pre_handler(): {}", ctx.exec);

        let matched = ctx.exec.comm.starts_with(&self.comm_filter);
        if let Err(e) = self.capture_arg(ctx, matched) {
            ProbeStats::bump(&self.stats.copy_faults);
            warn!(
                "kprobe_lkm: pre_handler(): {} (pid {}): {}",
                ctx.exec.comm.as_str(),
                ctx.exec.pid,
                e
            );
            return PreStatus::Fault(e);
        }

        if !matched {
            ProbeStats::bump(&self.stats.filtered);
            return PreStatus::Continue;
        }

        self.timing.stamp_start();
        ProbeStats::bump(&self.stats.timed);
        PreStatus::Continue
    }

    // No filter re-check here: every return stamps `end_ns`, matching or not.
    #[inline(never)]
    fn post_handler(&self, ctx: &ProbeContext, _flags: u64) {
        ProbeStats::bump(&self.stats.post_hits);
        let snap = self.timing.stamp_end();

        if self.is_verbose() {
            info!("kprobe_lkm: post_handler(): {}", ctx.exec);
        }
        timing::show_delta(&self.symbol, &snap);
    }

    #[inline(never)]
    fn fault_handler(&self, _ctx: &ProbeContext, trapnr: u32) -> FaultStatus {
        ProbeStats::bump(&self.stats.faults);
        warn!(
            "kprobe_lkm: fault_handler(): p->addr = {:#x}, trap #{}",
            self.addr(),
            trapnr
        );
        FaultStatus::NotHandled
    }
}
