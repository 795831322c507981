//! Load-time parameters of the probe module.

use alloc::string::{String, ToString};

use crate::context::{NUM_ARG_REGS, TASK_COMM_LEN};
use crate::error::ConfigError;

/// Maximum size of the target function name, including the terminating NUL.
pub const MAX_FUNCNAME_LEN: usize = 64;

/// Longest path the capture buffer is sized for.
pub const PATH_MAX: usize = 4096;

/// Capacity of the argument capture buffer.
pub const CAPTURE_BUF_LEN: usize = PATH_MAX + 1;

/// Only callers whose process name starts with this are timed.
pub const DEFAULT_COMM_FILTER: &str = "vi";

/// Argument register holding the string to capture (`filename` of `do_sys_open`).
pub const DEFAULT_STRING_ARG: usize = 1;

/// Probe module parameters.
///
/// Immutable once the module is configured, except for `verbose`, which the
/// descriptor copies into an atomic so it can be flipped at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Function name to attach the probe to.
    pub target_function: String,
    /// Log the execution context from the post-handler as well.
    pub verbose: bool,
    /// Index of the argument register that points at the string to capture.
    pub string_arg: usize,
    /// Process name prefix selecting which invocations get timed.
    pub comm_filter: String,
}

impl ProbeConfig {
    pub fn new(target_function: &str) -> Self {
        Self {
            target_function: target_function.to_string(),
            verbose: false,
            string_arg: DEFAULT_STRING_ARG,
            comm_filter: DEFAULT_COMM_FILTER.to_string(),
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_string_arg(mut self, idx: usize) -> Self {
        self.string_arg = idx;
        self
    }

    pub fn with_comm_filter(mut self, filter: &str) -> Self {
        self.comm_filter = filter.to_string();
        self
    }

    /// Check the parameters before anything is allocated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.target_function.len();
        if len == 0 {
            return Err(ConfigError::MissingTarget);
        }
        if len >= MAX_FUNCNAME_LEN {
            return Err(ConfigError::TargetTooLong(len));
        }
        if self.string_arg >= NUM_ARG_REGS {
            return Err(ConfigError::InvalidArgIndex(self.string_arg));
        }
        if self.comm_filter.len() >= TASK_COMM_LEN {
            return Err(ConfigError::FilterTooLong(self.comm_filter.len()));
        }
        Ok(())
    }
}
