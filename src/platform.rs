//! Platform abstraction layer for kernel operations.
//!
//! Provides the wall clock and CPU id used by the probe handlers, with a mock
//! backend so the handlers can be driven from user-space tests.

use core::sync::atomic::{AtomicU64, Ordering};

/// Platform operations trait.
///
/// Abstracts over kernel-specific operations to enable mock testing.
pub trait PlatformOps {
    /// Get current real (wall-clock) time in nanoseconds.
    fn realtime_ns() -> u64;

    /// Get current CPU ID.
    fn cpu_id() -> u32;
}

// =============================================================================
// Real Implementation (kernel environment with axhal)
// =============================================================================

/// Real platform operations using axhal.
#[cfg(all(not(test), feature = "axhal"))]
pub struct RealPlatform;

#[cfg(all(not(test), feature = "axhal"))]
impl PlatformOps for RealPlatform {
    fn realtime_ns() -> u64 {
        axhal::time::wall_time().as_nanos() as u64
    }

    fn cpu_id() -> u32 {
        axhal::percpu::this_cpu_id() as u32
    }
}

// =============================================================================
// Mock Implementation (test environment or no axhal)
// =============================================================================

/// Mock wall clock, starting at 1 second.
static MOCK_TIME_NS: AtomicU64 = AtomicU64::new(1_000_000_000);

/// Mock CPU ID for testing.
static MOCK_CPU_ID: AtomicU64 = AtomicU64::new(0);

/// Mock platform operations for testing.
///
/// The clock only moves when a test advances it.
#[cfg(any(test, not(feature = "axhal")))]
pub struct MockPlatform;

#[cfg(any(test, not(feature = "axhal")))]
impl PlatformOps for MockPlatform {
    fn realtime_ns() -> u64 {
        MOCK_TIME_NS.load(Ordering::Relaxed)
    }

    fn cpu_id() -> u32 {
        MOCK_CPU_ID.load(Ordering::Relaxed) as u32
    }
}

/// Advance mock time by given nanoseconds.
pub fn advance_mock_time(ns: u64) {
    MOCK_TIME_NS.fetch_add(ns, Ordering::Relaxed);
}

/// Set mock CPU ID for testing.
pub fn set_mock_cpu_id(id: u32) {
    MOCK_CPU_ID.store(id as u64, Ordering::Relaxed);
}

// =============================================================================
// Platform Type Alias
// =============================================================================

/// The active platform implementation.
///
/// In kernel environment with axhal: RealPlatform (uses axhal)
/// In test environment or without axhal: MockPlatform (uses atomic counters)
#[cfg(all(not(test), feature = "axhal"))]
pub type Platform = RealPlatform;

#[cfg(any(test, not(feature = "axhal")))]
pub type Platform = MockPlatform;

// =============================================================================
// Convenience Functions
// =============================================================================

/// Get current real (wall-clock) time in nanoseconds.
#[inline]
pub fn realtime_ns() -> u64 {
    Platform::realtime_ns()
}

/// Get current CPU ID.
#[inline]
pub fn cpu_id() -> u32 {
    Platform::cpu_id()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advances() {
        let before = realtime_ns();
        advance_mock_time(1000);
        assert!(realtime_ns() >= before + 1000);
    }

    #[test]
    fn test_mock_cpu_id() {
        set_mock_cpu_id(3);
        assert_eq!(cpu_id(), 3);

        set_mock_cpu_id(0);
        assert_eq!(cpu_id(), 0);
    }
}
