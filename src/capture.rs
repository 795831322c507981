//! Argument capture: a buffer owned by the module, filled from the caller's
//! address space on probe entry.

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axerrno::AxResult;
use spin::{Mutex, MutexGuard};

use crate::error::CopyError;

/// Privileged copy of a NUL-terminated string out of the caller's address space.
///
/// Implementations behave like `strncpy_from_user`: copy at most `dst.len()`
/// bytes from `src` and return the string length without the NUL. This may be
/// called from atomic context; it is the one place the pre-handler can fault.
pub trait CallerMemory: Send + Sync {
    fn strncpy_from_caller(&self, dst: &mut [u8], src: u64) -> AxResult<usize>;
}

/// Fixed-capacity, zero-initialised capture buffer.
#[derive(Debug)]
pub struct CaptureBuffer {
    data: Vec<u8>,
    len: usize,
}

impl CaptureBuffer {
    /// Allocate `capacity` zeroed bytes, or `None` when out of memory.
    pub fn try_zeroed(capacity: usize) -> Option<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).ok()?;
        data.resize(capacity, 0);
        Some(Self { data, len: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Fill the buffer from `src` through `mem`. Returns the captured length.
    ///
    /// On error the previous contents are considered stale (`len` is reset).
    pub fn fill_from(&mut self, mem: &dyn CallerMemory, src: u64) -> AxResult<usize> {
        self.len = 0;
        let copied = mem.strncpy_from_caller(&mut self.data, src)?;
        self.len = copied.min(self.data.len());
        Ok(self.len)
    }

    /// Captured bytes, without the terminating NUL.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Captured text, cut back to the longest valid UTF-8 prefix.
    ///
    /// A path truncated at capacity may end mid-character.
    pub fn as_str(&self) -> &str {
        let bytes = self.as_bytes();
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

const SLOT_FREE: usize = 0;

struct OwnerRelease<'a>(&'a AtomicUsize);

impl Drop for OwnerRelease<'_> {
    fn drop(&mut self) {
        self.0.store(SLOT_FREE, Ordering::Release);
    }
}

/// The capture buffer slot every hit of the probe shares.
///
/// One CPU owns the slot at a time. Other CPUs wait for the owner to finish;
/// the owning CPU itself (an interrupt or nested call landing mid-copy) is
/// turned away with [`CopyError::Busy`] so it never spins on itself.
pub struct CaptureSlot {
    /// `SLOT_FREE`, or the owning CPU id plus one
    owner: AtomicUsize,
    buf: Mutex<Option<CaptureBuffer>>,
}

/// Exclusive access to the slot contents. Dropping it frees the slot.
pub struct CaptureGuard<'a> {
    // Declaration order: the mutex is released before ownership is dropped.
    buf: MutexGuard<'a, Option<CaptureBuffer>>,
    _owner: OwnerRelease<'a>,
}

impl CaptureSlot {
    pub const fn new(buf: CaptureBuffer) -> Self {
        Self {
            owner: AtomicUsize::new(SLOT_FREE),
            buf: Mutex::new(Some(buf)),
        }
    }

    /// Take the slot on behalf of `cpu`.
    pub fn enter(&self, cpu: u32) -> Result<CaptureGuard<'_>, CopyError> {
        let me = cpu as usize + 1;
        loop {
            match self
                .owner
                .compare_exchange_weak(SLOT_FREE, me, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(owner) if owner == me => return Err(CopyError::Busy),
                Err(_) => core::hint::spin_loop(),
            }
        }
        let owner = OwnerRelease(&self.owner);
        // Every path to `buf` goes through `owner`, so this never contends.
        let buf = self.buf.try_lock().ok_or(CopyError::Busy)?;
        Ok(CaptureGuard { buf, _owner: owner })
    }
}

impl Deref for CaptureGuard<'_> {
    type Target = Option<CaptureBuffer>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for CaptureGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

/// Source of capture buffers.
///
/// The lifecycle manager allocates exactly one buffer before registration and
/// hands it back through `release` once the probe can no longer run.
pub trait BufferAllocator {
    fn allocate(&self, capacity: usize) -> Option<CaptureBuffer>;
    fn release(&self, buf: CaptureBuffer);
}

/// Global-heap allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, capacity: usize) -> Option<CaptureBuffer> {
        CaptureBuffer::try_zeroed(capacity)
    }

    fn release(&self, buf: CaptureBuffer) {
        drop(buf);
    }
}

/// Heap allocator that counts allocations and releases, and can be told to
/// fail the next allocation.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocated: AtomicUsize,
    released: AtomicUsize,
    fail_next: AtomicBool,
}

impl CountingAllocator {
    pub const fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next `allocate` call return `None`.
    pub fn fail_next_allocation(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.allocated() - self.released()
    }
}

impl BufferAllocator for CountingAllocator {
    fn allocate(&self, capacity: usize) -> Option<CaptureBuffer> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return None;
        }
        let buf = CaptureBuffer::try_zeroed(capacity)?;
        self.allocated.fetch_add(1, Ordering::SeqCst);
        Some(buf)
    }

    fn release(&self, buf: CaptureBuffer) {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(buf);
    }
}

impl<A: BufferAllocator + ?Sized> BufferAllocator for &A {
    fn allocate(&self, capacity: usize) -> Option<CaptureBuffer> {
        (**self).allocate(capacity)
    }

    fn release(&self, buf: CaptureBuffer) {
        (**self).release(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedString(&'static [u8]);

    impl CallerMemory for FixedString {
        fn strncpy_from_caller(&self, dst: &mut [u8], _src: u64) -> AxResult<usize> {
            let n = self.0.len().min(dst.len());
            dst[..n].copy_from_slice(&self.0[..n]);
            if n < dst.len() {
                dst[n] = 0;
            }
            Ok(n)
        }
    }

    struct Faulting;

    impl CallerMemory for Faulting {
        fn strncpy_from_caller(&self, _dst: &mut [u8], _src: u64) -> AxResult<usize> {
            axerrno::ax_err!(BadAddress, "unmapped")
        }
    }

    #[test]
    fn test_buffer_is_zeroed() {
        let buf = CaptureBuffer::try_zeroed(16).unwrap();
        assert_eq!(buf.capacity(), 16);
        assert!(buf.as_bytes().is_empty());
    }

    #[test]
    fn test_fill_truncates_to_capacity() {
        let mut buf = CaptureBuffer::try_zeroed(4).unwrap();
        let n = buf.fill_from(&FixedString(b"/etc/passwd"), 0x1000).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf.as_str(), "/etc");
    }

    #[test]
    fn test_failed_fill_clears_contents() {
        let mut buf = CaptureBuffer::try_zeroed(32).unwrap();
        buf.fill_from(&FixedString(b"/tmp/a"), 0x1000).unwrap();
        assert!(buf.fill_from(&Faulting, 0x1000).is_err());
        assert!(buf.as_bytes().is_empty());
    }

    #[test]
    fn test_truncated_multibyte_keeps_valid_prefix() {
        // "é" is two bytes; capacity 6 cuts it in half.
        let mut buf = CaptureBuffer::try_zeroed(6).unwrap();
        let n = buf.fill_from(&FixedString("/tmp/é".as_bytes()), 0x1000).unwrap();
        assert_eq!(n, 6);
        assert_eq!(buf.as_str(), "/tmp/");
    }

    #[test]
    fn test_slot_turns_away_owning_cpu() {
        let slot = CaptureSlot::new(CaptureBuffer::try_zeroed(8).unwrap());

        let guard = slot.enter(2).unwrap();
        assert!(guard.is_some());
        assert!(matches!(slot.enter(2), Err(CopyError::Busy)));

        drop(guard);
        assert!(slot.enter(2).is_ok());
        assert!(slot.enter(5).is_ok());
    }

    #[test]
    fn test_slot_guard_gives_mutable_access() {
        let slot = CaptureSlot::new(CaptureBuffer::try_zeroed(32).unwrap());
        {
            let mut guard = slot.enter(0).unwrap();
            let buf = guard.as_mut().unwrap();
            buf.fill_from(&FixedString(b"/etc/fstab"), 0x1000).unwrap();
        }
        let mut guard = slot.enter(1).unwrap();
        assert_eq!(guard.as_ref().map(|b| b.as_str()), Some("/etc/fstab"));
        assert!(guard.take().is_some());
        assert!(guard.is_none());
    }

    #[test]
    fn test_counting_allocator() {
        let alloc = CountingAllocator::new();
        let buf = alloc.allocate(8).unwrap();
        assert_eq!(alloc.outstanding(), 1);

        alloc.release(buf);
        assert_eq!(alloc.released(), 1);
        assert_eq!(alloc.outstanding(), 0);

        alloc.fail_next_allocation();
        assert!(alloc.allocate(8).is_none());
        assert_eq!(alloc.allocated(), 1);
        assert!(alloc.allocate(8).is_some());
    }
}
