//! Probe lifecycle: configure, register with the host, tear down.
//!
//! ```text
//! Unconfigured --configure--> Configured --register--> Registered --unload--> Unregistered
//! ```
//!
//! Failed transitions leave the module where it was, with nothing allocated
//! and nothing registered.

use alloc::sync::Arc;

use crate::capture::{BufferAllocator, CallerMemory};
use crate::config::{CAPTURE_BUF_LEN, ProbeConfig};
use crate::error::Error;
use crate::host::ProbeHost;
use crate::probe::handler::{ProbeDescriptor, StatsSnapshot};
use crate::probe::ProbeHandlers;
use crate::timing::TimingSnapshot;

/// Lifecycle state of the probe module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// No parameters accepted yet
    Unconfigured,
    /// Parameters validated, nothing allocated
    Configured,
    /// Probe attached, handlers live
    Registered,
    /// Probe detached and buffer released (terminal)
    Unregistered,
}

/// The single-probe module.
///
/// Dropping a registered module unregisters the probe and releases the
/// capture buffer.
pub struct ProbeModule<H: ProbeHost, A: BufferAllocator> {
    state: ModuleState,
    config: Option<ProbeConfig>,
    host: H,
    alloc: A,
    memory: Arc<dyn CallerMemory>,
    probe: Option<Arc<ProbeDescriptor>>,
}

impl<H: ProbeHost, A: BufferAllocator> ProbeModule<H, A> {
    pub fn new(host: H, alloc: A, memory: Arc<dyn CallerMemory>) -> Self {
        Self {
            state: ModuleState::Unconfigured,
            config: None,
            host,
            alloc,
            memory,
            probe: None,
        }
    }

    /// Configure and register in one step (module init).
    pub fn load(
        host: H,
        alloc: A,
        memory: Arc<dyn CallerMemory>,
        config: ProbeConfig,
    ) -> Result<Self, Error> {
        let mut module = Self::new(host, alloc, memory);
        module.configure(config)?;
        module.register()?;
        Ok(module)
    }

    /// Accept load-time parameters.
    pub fn configure(&mut self, config: ProbeConfig) -> Result<(), Error> {
        if self.state != ModuleState::Unconfigured {
            return Err(Error::InvalidState(self.state));
        }
        if let Err(e) = config.validate() {
            warn!("kprobe_lkm: {}", e);
            return Err(Error::Config(e));
        }
        self.config = Some(config);
        self.state = ModuleState::Configured;
        Ok(())
    }

    /// Allocate the capture buffer, build the descriptor and attach it.
    ///
    /// Returns the probed address.
    pub fn register(&mut self) -> Result<usize, Error> {
        let config = match (self.state, self.config.as_ref()) {
            (ModuleState::Configured, Some(config)) => config,
            _ => return Err(Error::InvalidState(self.state)),
        };

        let buffer = self.alloc.allocate(CAPTURE_BUF_LEN).ok_or_else(|| {
            error!("kprobe_lkm: failed to allocate {} byte capture buffer", CAPTURE_BUF_LEN);
            Error::Resource
        })?;

        let probe = Arc::new(ProbeDescriptor::new(config, buffer, self.memory.clone()));
        let handlers: Arc<dyn ProbeHandlers> = probe.clone();

        let addr = match self.host.register(handlers) {
            Ok(addr) => addr,
            Err(source) => {
                error!(
                    "kprobe_lkm: register_kprobe failed!\n\
                     Check: is function '{}' invalid, static, inline; or blacklisted: \
                     attribute-marked '__kprobes'\n\
                     or nokprobe_inline, or is marked with the NOKPROBE_SYMBOL macro? ({})",
                    config.target_function, source
                );
                if let Some(buf) = probe.take_buffer() {
                    self.alloc.release(buf);
                }
                return Err(Error::Registration {
                    symbol: config.target_function.clone(),
                    source,
                });
            }
        };

        probe.bind_addr(addr);
        info!(
            "kprobe_lkm: registering kernel probe @ '{}' ({:#x})",
            config.target_function, addr
        );
        self.probe = Some(probe);
        self.state = ModuleState::Registered;
        Ok(addr)
    }

    /// Detach the probe, then release the capture buffer (module exit).
    ///
    /// A no-op unless the module is registered.
    pub fn unload(&mut self) {
        if self.state != ModuleState::Registered {
            return;
        }
        let Some(probe) = self.probe.take() else {
            return;
        };

        let handlers: Arc<dyn ProbeHandlers> = probe.clone();
        self.host.unregister(&handlers);

        if let Some(buf) = probe.take_buffer() {
            self.alloc.release(buf);
        }
        self.state = ModuleState::Unregistered;
        info!(
            "kprobe_lkm: bye, unregistering kernel probe @ '{}'",
            probe.symbol()
        );
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn config(&self) -> Option<&ProbeConfig> {
        self.config.as_ref()
    }

    /// The live descriptor, while registered.
    pub fn probe(&self) -> Option<&Arc<ProbeDescriptor>> {
        self.probe.as_ref()
    }

    /// Probed address, while registered.
    pub fn addr(&self) -> Option<usize> {
        self.probe.as_ref().map(|p| p.addr())
    }

    pub fn timing(&self) -> Option<TimingSnapshot> {
        self.probe.as_ref().map(|p| p.timing())
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.probe.as_ref().map(|p| p.stats())
    }

    /// Flip verbose logging at runtime. Returns false if not registered.
    pub fn set_verbose(&self, enabled: bool) -> bool {
        match self.probe.as_ref() {
            Some(p) => {
                p.set_verbose(enabled);
                true
            }
            None => false,
        }
    }
}

impl<H: ProbeHost, A: BufferAllocator> Drop for ProbeModule<H, A> {
    fn drop(&mut self) {
        self.unload();
    }
}
