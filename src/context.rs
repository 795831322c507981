//! Probe context passed to the handlers.
//!
//! The host builds one [`ProbeContext`] per hit: the raw argument registers
//! of the probed call plus a snapshot of the execution context it ran in.

use crate::platform;

/// Number of argument registers exposed to the handlers.
pub const NUM_ARG_REGS: usize = 6;

/// Size of a task name, including the terminating NUL.
pub const TASK_COMM_LEN: usize = 16;

/// Argument registers at the probe point.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PtRegs {
    /// Function arguments in calling-convention order
    pub args: [u64; NUM_ARG_REGS],
}

impl PtRegs {
    /// Create a register set with the given arguments.
    pub fn with_args(args: &[u64]) -> Self {
        let mut regs = Self::default();
        let n = args.len().min(NUM_ARG_REGS);
        regs.args[..n].copy_from_slice(&args[..n]);
        regs
    }

    /// Argument register `idx`, or 0 past the register file.
    #[inline]
    pub fn arg(&self, idx: usize) -> u64 {
        self.args.get(idx).copied().unwrap_or(0)
    }
}

/// Kind of context the probe fired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Process context
    Process,
    /// Softirq / bottom half
    SoftIrq,
    /// Hardware interrupt
    HardIrq,
    /// Non-maskable interrupt
    Nmi,
}

impl ContextKind {
    /// One-character marker used in the context line.
    pub fn marker(&self) -> char {
        match self {
            ContextKind::Process => '.',
            ContextKind::SoftIrq => 's',
            ContextKind::HardIrq => 'h',
            ContextKind::Nmi => 'N',
        }
    }
}

/// Fixed-size task name, NUL padded.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Comm([u8; TASK_COMM_LEN]);

impl Comm {
    /// Build from a string, truncating to `TASK_COMM_LEN - 1` bytes.
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; TASK_COMM_LEN];
        let n = name.len().min(TASK_COMM_LEN - 1);
        buf[..n].copy_from_slice(&name.as_bytes()[..n]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN);
        &self.0[..len]
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("?")
    }

    /// Same comparison as `strncmp(comm, prefix, strlen(prefix)) == 0`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.as_bytes().starts_with(prefix.as_bytes())
    }
}

impl core::fmt::Debug for Comm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Snapshot of the execution context a handler runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    /// CPU the probe fired on
    pub cpu: u32,
    /// Current task id
    pub pid: i32,
    /// Current task name
    pub comm: Comm,
    /// Process / softirq / hardirq / NMI
    pub kind: ContextKind,
    /// Preemption nesting depth
    pub preempt_count: u32,
    /// Local interrupts disabled
    pub irqs_disabled: bool,
}

impl ExecContext {
    /// Process context on the current CPU.
    pub fn process(pid: i32, comm: &str) -> Self {
        Self {
            cpu: platform::cpu_id(),
            pid,
            comm: Comm::new(comm),
            kind: ContextKind::Process,
            preempt_count: 1,
            irqs_disabled: false,
        }
    }

    /// Set the context kind.
    pub fn with_kind(mut self, kind: ContextKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set interrupt state and preempt count.
    pub fn with_irq_state(mut self, irqs_disabled: bool, preempt_count: u32) -> Self {
        self.irqs_disabled = irqs_disabled;
        self.preempt_count = preempt_count;
        self
    }

    /// Whether handlers are running inside an interrupt of any kind.
    pub fn in_interrupt(&self) -> bool {
        self.kind != ContextKind::Process
    }
}

/// Compact one-line rendering: `003) vi :1234 | d.1`.
impl core::fmt::Display for ExecContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:03}) {:>16} :{:<6} | {}{}{}",
            self.cpu,
            self.comm.as_str(),
            self.pid,
            if self.irqs_disabled { 'd' } else { '.' },
            self.kind.marker(),
            self.preempt_count
        )
    }
}

/// Everything a handler gets from the host for one hit.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext {
    pub regs: PtRegs,
    pub exec: ExecContext,
}

impl ProbeContext {
    pub fn new(regs: PtRegs, exec: ExecContext) -> Self {
        Self { regs, exec }
    }
}
