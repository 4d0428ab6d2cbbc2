use libc::{PROT_NONE, PROT_READ, PROT_WRITE, _SC_PAGESIZE, c_void, mprotect, sysconf};
use log::warn;

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::OnceLock;

/// Smallest stack a fiber may be given, guard page excluded.
pub(crate) const MIN_STACK_SIZE: usize = 16 * 1024;

/// An owned, fixed-size fiber stack.
///
/// The lowest page of the allocation is a guard page (`PROT_NONE`), so
/// running off the end of the stack faults instead of silently
/// scribbling over a neighbouring allocation. The memory comes from the
/// global allocator and is returned to it exactly once, on drop.
pub(crate) struct Stack {
    /// Lowest address of the allocation (start of the guard page).
    base: NonNull<u8>,

    /// Layout the memory was allocated with.
    layout: Layout,

    /// Size of the protected region at `base`; zero if protection failed.
    guard: usize,
}

impl Stack {
    /// Allocates a stack with at least `size` usable bytes.
    ///
    /// Aborts the process if the allocation fails.
    pub(crate) fn new(size: usize) -> Self {
        let page = page_size();
        let usable = size.max(MIN_STACK_SIZE).next_multiple_of(page);

        let layout = match Layout::from_size_align(usable + page, page) {
            Ok(layout) => layout,
            Err(_) => {
                log::error!("fiber stack of {size} bytes is not representable");
                std::process::abort();
            }
        };

        let Some(base) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
            alloc::handle_alloc_error(layout);
        };

        let rc = unsafe { mprotect(base.as_ptr() as *mut c_void, page, PROT_NONE) };
        let guard = if rc == 0 {
            page
        } else {
            warn!(
                "could not install stack guard page: {}",
                std::io::Error::last_os_error()
            );
            0
        };

        Self {
            base,
            layout,
            guard,
        }
    }

    /// One past the highest usable address. Stacks grow down from here.
    pub(crate) fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.layout.size()) }
    }

    /// Usable bytes between the guard page and [`top`](Self::top).
    pub(crate) fn size(&self) -> usize {
        self.layout.size() - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if self.guard > 0 {
            unsafe {
                mprotect(
                    self.base.as_ptr() as *mut c_void,
                    self.guard,
                    PROT_READ | PROT_WRITE,
                );
            }
        }

        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// System page size, queried once.
fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();

    *PAGE.get_or_init(|| {
        let n = unsafe { sysconf(_SC_PAGESIZE) };
        if n > 0 { n as usize } else { 4096 }
    })
}
