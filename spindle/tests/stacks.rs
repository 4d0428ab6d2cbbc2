//! Every fiber stack is allocated once and freed exactly once.
//!
//! Lives in its own test binary: the counting allocator is global.

use spindle::SchedulerBuilder;

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

const STACK_SIZE: usize = 128 * 1024;

/// Counts page-aligned allocations at least as large as a fiber stack.
struct CountingAlloc;

static STACK_ALLOCS: AtomicUsize = AtomicUsize::new(0);
static STACK_FREES: AtomicUsize = AtomicUsize::new(0);

fn is_stack(layout: &Layout) -> bool {
    layout.align() >= 4096 && layout.size() >= STACK_SIZE
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if is_stack(&layout) {
            STACK_ALLOCS.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if is_stack(&layout) {
            STACK_FREES.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

#[test]
fn test_every_stack_is_freed_exactly_once() {
    let scheduler = SchedulerBuilder::new()
        .stack_size(STACK_SIZE)
        .build()
        .unwrap();

    for i in 0..16u64 {
        scheduler.spawn(move |s| {
            s.yield_now();
            s.sleep_ms(i % 4);

            s.spawn(move |s| {
                s.yield_now();
            });

            s.yield_now();
        });
    }

    assert_eq!(STACK_ALLOCS.load(Ordering::SeqCst), 16);
    assert_eq!(STACK_FREES.load(Ordering::SeqCst), 0);

    scheduler.run();

    assert_eq!(STACK_ALLOCS.load(Ordering::SeqCst), 32);
    assert_eq!(STACK_FREES.load(Ordering::SeqCst), 32);
    assert_eq!(scheduler.stats().fibers, 0);
}
