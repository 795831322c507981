//! Integration tests for handlers running on several CPUs at once.
//!
//! Tests that the shared timing pair stays consistent under load and that
//! unregistration fences every in-flight invocation while callers keep
//! hitting the probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use axerrno::AxResult;
use kprobe_lkm::{
    CallerMemory, CountingAllocator, ExecContext, MockHost, PreStatus, ProbeConfig, ProbeContext,
    ProbeModule, PtRegs, platform,
};

const TARGET: &str = "do_sys_open";
const THREADS: usize = 4;
const CALLS_PER_THREAD: usize = 2_000;
const AFTER_UNLOAD_CALLS: usize = 100;

/// Every address reads back as "/tmp/file".
struct AnyString;

impl CallerMemory for AnyString {
    fn strncpy_from_caller(&self, dst: &mut [u8], _src: u64) -> AxResult<usize> {
        let s = b"/tmp/file";
        dst[..s.len()].copy_from_slice(s);
        dst[s.len()] = 0;
        Ok(s.len())
    }
}

fn call(cpu: u32, comm: &str) -> ProbeContext {
    let mut exec = ExecContext::process(1000 + cpu as i32, comm);
    exec.cpu = cpu;
    ProbeContext::new(PtRegs::with_args(&[0, 0x4000]), exec)
}

// =============================================================================
// Shared State Under Load
// =============================================================================

#[test]
fn test_concurrent_hits_are_all_counted() {
    let host = MockHost::new().with_symbol(TARGET, 0x1000);
    let alloc = CountingAllocator::new();
    let module =
        ProbeModule::load(&host, &alloc, Arc::new(AnyString), ProbeConfig::new(TARGET)).unwrap();

    thread::scope(|s| {
        for cpu in 0..THREADS as u32 {
            let host = &host;
            s.spawn(move || {
                let comm = if cpu % 2 == 0 { "vi" } else { "bash" };
                for _ in 0..CALLS_PER_THREAD {
                    let status = host.invoke_with(TARGET, &call(cpu, comm), || {
                        platform::advance_mock_time(1);
                    });
                    assert_eq!(status, Some(PreStatus::Continue));
                }
            });
        }
    });

    let total = (THREADS * CALLS_PER_THREAD) as u64;
    let stats = module.stats().unwrap();
    assert_eq!(stats.hits, total);
    assert_eq!(stats.post_hits, total);
    assert_eq!(stats.timed + stats.filtered, total);
    assert_eq!(stats.timed, total / 2);
    assert_eq!(stats.copy_faults, 0);

    // Last writer wins, but the pair is never torn: the final post-handler
    // stamped end after every start.
    let snap = module.timing().unwrap();
    assert!(snap.end_ns >= snap.start_ns);
    assert_eq!(snap.delta_ns(), Some(snap.end_ns - snap.start_ns));
}

// =============================================================================
// Teardown Under Load
// =============================================================================

#[test]
fn test_unload_fences_in_flight_invocations() {
    let host = MockHost::new().with_symbol(TARGET, 0x1000);
    let alloc = CountingAllocator::new();
    let mut module =
        ProbeModule::load(&host, &alloc, Arc::new(AnyString), ProbeConfig::new(TARGET)).unwrap();
    let probe = module.probe().unwrap().clone();

    let dispatched = AtomicUsize::new(0);
    let missed = AtomicUsize::new(0);

    let hits_at_unload = thread::scope(|s| {
        for cpu in 0..THREADS as u32 {
            let host = &host;
            let dispatched = &dispatched;
            let missed = &missed;
            s.spawn(move || {
                // Call the target until the hit is missed, then check it stays missed.
                while host.invoke(TARGET, &call(cpu, "vi")).is_some() {
                    dispatched.fetch_add(1, Ordering::SeqCst);
                }
                missed.fetch_add(1, Ordering::SeqCst);
                for _ in 0..AFTER_UNLOAD_CALLS {
                    assert!(host.invoke(TARGET, &call(cpu, "vi")).is_none());
                    missed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        while probe.stats().hits < 100 {
            std::hint::spin_loop();
        }
        // Callers are still running; unregister must not wait for them to stop.
        module.unload();

        // Every in-flight invocation has completed by the time unload returns.
        let at_unload = probe.stats();
        assert_eq!(at_unload.hits, at_unload.post_hits);
        assert!(!host.is_registered(TARGET));
        assert_eq!(alloc.released(), 1);
        assert!(probe.captured().is_none(), "buffer must already be released");
        at_unload.hits
    });

    // Nothing reached the handlers after unload returned.
    let stats = probe.stats();
    assert_eq!(stats.hits, hits_at_unload);
    assert!(stats.hits >= 100);
    assert_eq!(stats.hits as usize, dispatched.load(Ordering::SeqCst));
    assert_eq!(
        missed.load(Ordering::SeqCst),
        THREADS * (AFTER_UNLOAD_CALLS + 1)
    );
    assert_eq!(stats.copy_faults, 0);
    assert_eq!(alloc.released(), 1);
    assert_eq!(alloc.outstanding(), 0);

    drop(module);
    assert_eq!(alloc.released(), 1);
    assert_eq!(host.unregister_calls(), 1);
}
