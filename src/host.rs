//! Host probe-dispatch facility.
//!
//! The host owns the actual interception technique (breakpoint injection,
//! trampolines, ...). This crate only asks it to attach a callback set to a
//! symbol and to detach it again.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, RwLock};

use crate::context::ProbeContext;
use crate::probe::{FaultStatus, NOKPROBE_SYMBOLS, PreStatus, ProbeHandlers};

/// Reasons a host refuses to register a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    /// Symbol could not be resolved.
    SymbolNotFound,
    /// Symbol is blacklisted from probing (inline, `__kprobes`, NOKPROBE).
    NotProbeable,
    /// A probe is already attached to this symbol.
    AlreadyRegistered,
}

impl core::fmt::Display for HostError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SymbolNotFound => write!(f, "symbol not found"),
            Self::NotProbeable => write!(f, "symbol cannot be probed"),
            Self::AlreadyRegistered => write!(f, "probe already registered at this symbol"),
        }
    }
}

impl core::error::Error for HostError {}

/// Probe registration capability provided by the host.
pub trait ProbeHost {
    /// Attach `probe` to `probe.symbol()`. Returns the probed address.
    fn register(&self, probe: Arc<dyn ProbeHandlers>) -> Result<usize, HostError>;

    /// Detach `probe`.
    ///
    /// Once this returns, no handler of `probe` is running or will run again.
    fn unregister(&self, probe: &Arc<dyn ProbeHandlers>);
}

impl<H: ProbeHost + ?Sized> ProbeHost for &H {
    fn register(&self, probe: Arc<dyn ProbeHandlers>) -> Result<usize, HostError> {
        (**self).register(probe)
    }

    fn unregister(&self, probe: &Arc<dyn ProbeHandlers>) {
        (**self).unregister(probe)
    }
}

fn same_probe(a: &Arc<dyn ProbeHandlers>, b: &Arc<dyn ProbeHandlers>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// An attached probe.
struct ActiveProbe {
    addr: usize,
    handlers: Arc<dyn ProbeHandlers>,
}

/// In-process host with a synthetic symbol table.
///
/// Dispatch holds the probe table for read across the whole invocation and
/// `unregister` takes it for write, so unregistration waits out in-flight
/// handlers the way a real host's synchronisation does. `spin`'s `RwLock`
/// does not prefer writers, so `unregister` first bumps `detaching` to turn
/// new hits away; it then only has to wait for the hits already running.
pub struct MockHost {
    symbols: Mutex<BTreeMap<String, usize>>,
    nokprobe: Mutex<BTreeSet<String>>,
    active: RwLock<BTreeMap<String, ActiveProbe>>,
    detaching: AtomicUsize,
    register_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
}

impl MockHost {
    /// Empty symbol table; the crate's own handlers are blacklisted.
    pub fn new() -> Self {
        let nokprobe = NOKPROBE_SYMBOLS.iter().map(|s| s.to_string()).collect();
        Self {
            symbols: Mutex::new(BTreeMap::new()),
            nokprobe: Mutex::new(nokprobe),
            active: RwLock::new(BTreeMap::new()),
            detaching: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            unregister_calls: AtomicUsize::new(0),
        }
    }

    /// Make `name` resolvable at `addr`.
    pub fn with_symbol(self, name: &str, addr: usize) -> Self {
        self.symbols.lock().insert(name.to_string(), addr);
        self
    }

    /// Resolvable, but refused for probing.
    pub fn with_nokprobe(self, name: &str, addr: usize) -> Self {
        self.nokprobe.lock().insert(name.to_string());
        self.with_symbol(name, addr)
    }

    pub fn is_registered(&self, symbol: &str) -> bool {
        self.active.read().contains_key(symbol)
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }

    /// Simulate one call of `symbol`.
    ///
    /// Returns `None` if no probe is attached or one is being detached. A
    /// non-`Continue` pre status aborts the hit before the post-handler, like
    /// a kprobe pre-handler returning non-zero.
    pub fn invoke(&self, symbol: &str, ctx: &ProbeContext) -> Option<PreStatus> {
        self.invoke_with(symbol, ctx, || {})
    }

    /// Like [`invoke`](Self::invoke), running `body` as the probed function.
    pub fn invoke_with<F: FnOnce()>(
        &self,
        symbol: &str,
        ctx: &ProbeContext,
        body: F,
    ) -> Option<PreStatus> {
        if self.detaching.load(Ordering::Acquire) > 0 {
            return None;
        }
        let active = self.active.read();
        let probe = active.get(symbol)?;

        let status = probe.handlers.pre_handler(ctx);
        body();
        if status.is_continue() {
            probe.handlers.post_handler(ctx, 0);
        }
        Some(status)
    }

    /// Simulate a fault inside the probe's own handlers.
    pub fn raise_fault(&self, symbol: &str, ctx: &ProbeContext, trapnr: u32) -> Option<FaultStatus> {
        let active = self.active.read();
        let probe = active.get(symbol)?;
        Some(probe.handlers.fault_handler(ctx, trapnr))
    }

    /// Address a symbol is attached at.
    pub fn probe_addr(&self, symbol: &str) -> Option<usize> {
        self.active.read().get(symbol).map(|p| p.addr)
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeHost for MockHost {
    fn register(&self, probe: Arc<dyn ProbeHandlers>) -> Result<usize, HostError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        let symbol = probe.symbol();

        if self.nokprobe.lock().contains(symbol) {
            return Err(HostError::NotProbeable);
        }
        let addr = *self
            .symbols
            .lock()
            .get(symbol)
            .ok_or(HostError::SymbolNotFound)?;

        let mut active = self.active.write();
        if active.contains_key(symbol) {
            return Err(HostError::AlreadyRegistered);
        }
        active.insert(
            symbol.to_string(),
            ActiveProbe {
                addr,
                handlers: probe.clone(),
            },
        );
        debug!("mock_host: attached {} at {:#x}", symbol, addr);
        Ok(addr)
    }

    fn unregister(&self, probe: &Arc<dyn ProbeHandlers>) {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        self.detaching.fetch_add(1, Ordering::AcqRel);
        {
            let mut active = self.active.write();
            let symbol = probe.symbol();
            if active
                .get(symbol)
                .is_some_and(|p| same_probe(&p.handlers, probe))
            {
                active.remove(symbol);
                debug!("mock_host: detached {}", symbol);
            }
        }
        self.detaching.fetch_sub(1, Ordering::AcqRel);
    }
}
