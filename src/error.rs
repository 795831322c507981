//! Error types for probe configuration, registration and argument capture.

use alloc::string::String;
use axerrno::AxError;

use crate::host::HostError;
use crate::probe::manager::ModuleState;

/// Load-time configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No target function name was supplied.
    MissingTarget,
    /// Target function name does not fit in `MAX_FUNCNAME_LEN`.
    TargetTooLong(usize),
    /// String argument index is outside the argument register file.
    InvalidArgIndex(usize),
    /// Process name filter is longer than a task comm.
    FilterTooLong(usize),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingTarget => {
                write!(f, "expect a valid target_function=<func_name> parameter")
            }
            Self::TargetTooLong(len) => write!(f, "target function name too long ({} bytes)", len),
            Self::InvalidArgIndex(idx) => write!(f, "invalid string argument index: {}", idx),
            Self::FilterTooLong(len) => write!(f, "process name filter too long ({} bytes)", len),
        }
    }
}

impl core::error::Error for ConfigError {}

/// Errors returned by the probe lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid or missing configuration. Nothing was allocated.
    Config(ConfigError),
    /// Capture buffer allocation failed. Nothing was registered.
    Resource,
    /// The host refused the probe. The capture buffer was already released.
    Registration {
        symbol: String,
        source: HostError,
    },
    /// Operation not valid in the module's current state.
    InvalidState(ModuleState),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Resource => write!(f, "Out of memory allocating capture buffer"),
            Self::Registration { symbol, source } => {
                write!(f, "Failed to register probe at '{}': {}", symbol, source)
            }
            Self::InvalidState(state) => write!(f, "Invalid module state: {:?}", state),
        }
    }
}

impl core::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<Error> for AxError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(_) | Error::Registration { .. } => AxError::InvalidInput,
            Error::Resource => AxError::NoMemory,
            Error::InvalidState(_) => AxError::BadState,
        }
    }
}

/// Argument capture failure inside the pre-handler.
///
/// Aborts only the current invocation; the probe stays registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyError {
    /// The copy primitive reported an error.
    Fault(AxError),
    /// The copy returned no bytes.
    Empty,
    /// The capture buffer has already been released.
    NoBuffer,
    /// Another hit on this CPU is mid-copy (interrupt or nested call).
    Busy,
}

impl CopyError {
    /// Status code handed back to the host (`-EFAULT`).
    pub const fn code(&self) -> i32 {
        -14
    }
}

impl core::fmt::Display for CopyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Fault(e) => write!(f, "copy from caller failed: {:?}", e),
            Self::Empty => write!(f, "copy from caller returned an empty string"),
            Self::NoBuffer => write!(f, "capture buffer released"),
            Self::Busy => write!(f, "capture buffer in use by an interrupted hit"),
        }
    }
}

impl core::error::Error for CopyError {}
