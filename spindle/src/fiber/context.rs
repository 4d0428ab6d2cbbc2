//! Saved execution contexts and the stack switch.
//!
//! This is the only architecture-specific code in the crate. A
//! [`Context`] is nothing more than a saved stack pointer: the
//! callee-saved registers live on the suspended stack itself, pushed by
//! `spindle_context_switch` right before the pointer is stored.
//!
//! A fresh context is prepared so that the first switch into it "returns"
//! into `spindle_context_trampoline`, which moves the entry argument into
//! the first-argument register and calls the entry function. The entry
//! function must never return.

use super::stack::Stack;

use libc::c_void;
use std::cell::Cell;
use std::ptr;

/// Entry point of a freshly prepared context.
pub(crate) type Entry = unsafe extern "C" fn(*mut c_void) -> !;

unsafe extern "C" {
    /// Saves the callee-saved registers on the current stack, stores the
    /// stack pointer into `*save`, then loads `load` and restores the
    /// registers found there.
    fn spindle_context_switch(save: *mut *mut u8, load: *mut u8);

    /// First frame of every fiber; never called directly.
    fn spindle_context_trampoline();
}

/// A suspended execution context.
///
/// The stack pointer is kept in a [`Cell`] because it is written by the
/// switch routine through a raw pointer while only shared references to
/// the owning fiber exist.
pub(crate) struct Context {
    sp: Cell<*mut u8>,
}

impl Context {
    /// A context with no saved state, to be filled by the first switch
    /// away from it (the scheduler's own context starts like this).
    pub(crate) const fn empty() -> Self {
        Self {
            sp: Cell::new(ptr::null_mut()),
        }
    }

    /// Prepares a context that starts `entry(arg)` on `stack`.
    ///
    /// # Safety
    ///
    /// `stack` must outlive every switch into the returned context, and
    /// `entry` must never return.
    pub(crate) unsafe fn prepare(stack: &Stack, entry: Entry, arg: *mut c_void) -> Self {
        let top = (stack.top() as usize) & !15;
        let sp = unsafe { arch::initial_frame(top as *mut usize, entry, arg) };

        Self { sp: Cell::new(sp) }
    }

    /// Suspends the running code into `from` and resumes `to`.
    ///
    /// Returns when some other context switches back into `from`.
    ///
    /// # Safety
    ///
    /// `to` must hold a context saved by a previous switch or produced by
    /// [`prepare`](Self::prepare), whose stack is still alive. No borrow
    /// that the resumed side may conflict with can be held across the call.
    pub(crate) unsafe fn switch(from: &Context, to: &Context) {
        let load = to.sp.get();
        debug_assert!(!load.is_null(), "switching into an empty context");

        unsafe { spindle_context_switch(from.sp.as_ptr(), load) };
    }
}

#[cfg(target_arch = "x86_64")]
mod arch {
    use super::{Entry, c_void, spindle_context_trampoline};

    // System V: rbx, rbp, r12-r15 are callee-saved. The trampoline finds
    // the entry argument in rbx and the entry function in r12.
    std::arch::global_asm!(
        ".text",
        ".p2align 4",
        ".globl spindle_context_switch",
        ".hidden spindle_context_switch",
        ".type spindle_context_switch,@function",
        "spindle_context_switch:",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        ".size spindle_context_switch, .-spindle_context_switch",
        "",
        ".p2align 4",
        ".globl spindle_context_trampoline",
        ".hidden spindle_context_trampoline",
        ".type spindle_context_trampoline,@function",
        "spindle_context_trampoline:",
        "mov rdi, rbx",
        "call r12",
        "ud2",
        ".size spindle_context_trampoline, .-spindle_context_trampoline",
    );

    /// Lays out the frame popped by the first switch: r15, r14, r13, r12,
    /// rbx, rbp, then the return address. After the `ret` the stack
    /// pointer is 16-byte aligned, as `call` in the trampoline requires.
    pub(super) unsafe fn initial_frame(top: *mut usize, entry: Entry, arg: *mut c_void) -> *mut u8 {
        unsafe {
            let frame = top.sub(9);

            frame.add(0).write(0); // r15
            frame.add(1).write(0); // r14
            frame.add(2).write(0); // r13
            frame.add(3).write(entry as *const () as usize); // r12
            frame.add(4).write(arg as usize); // rbx
            frame.add(5).write(0); // rbp
            frame.add(6).write(spindle_context_trampoline as *const () as usize);
            frame.add(7).write(0);
            frame.add(8).write(0);

            frame as *mut u8
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use super::{Entry, c_void, spindle_context_trampoline};

    // AAPCS64: x19-x28, fp, lr and the low halves of v8-v15 are
    // callee-saved. The trampoline finds the entry argument in x19 and
    // the entry function in x20.
    std::arch::global_asm!(
        ".text",
        ".p2align 4",
        ".globl spindle_context_switch",
        ".hidden spindle_context_switch",
        ".type spindle_context_switch,%function",
        "spindle_context_switch:",
        "sub sp, sp, #0xa0",
        "stp x19, x20, [sp, #0x00]",
        "stp x21, x22, [sp, #0x10]",
        "stp x23, x24, [sp, #0x20]",
        "stp x25, x26, [sp, #0x30]",
        "stp x27, x28, [sp, #0x40]",
        "stp x29, x30, [sp, #0x50]",
        "stp d8, d9, [sp, #0x60]",
        "stp d10, d11, [sp, #0x70]",
        "stp d12, d13, [sp, #0x80]",
        "stp d14, d15, [sp, #0x90]",
        "mov x9, sp",
        "str x9, [x0]",
        "mov sp, x1",
        "ldp x19, x20, [sp, #0x00]",
        "ldp x21, x22, [sp, #0x10]",
        "ldp x23, x24, [sp, #0x20]",
        "ldp x25, x26, [sp, #0x30]",
        "ldp x27, x28, [sp, #0x40]",
        "ldp x29, x30, [sp, #0x50]",
        "ldp d8, d9, [sp, #0x60]",
        "ldp d10, d11, [sp, #0x70]",
        "ldp d12, d13, [sp, #0x80]",
        "ldp d14, d15, [sp, #0x90]",
        "add sp, sp, #0xa0",
        "ret",
        ".size spindle_context_switch, .-spindle_context_switch",
        "",
        ".p2align 4",
        ".globl spindle_context_trampoline",
        ".hidden spindle_context_trampoline",
        ".type spindle_context_trampoline,%function",
        "spindle_context_trampoline:",
        "mov x0, x19",
        "blr x20",
        "brk #0",
        ".size spindle_context_trampoline, .-spindle_context_trampoline",
    );

    /// Lays out the 0xa0-byte frame restored by the first switch, with
    /// the trampoline as the saved link register.
    pub(super) unsafe fn initial_frame(top: *mut usize, entry: Entry, arg: *mut c_void) -> *mut u8 {
        unsafe {
            let frame = top.sub(20);

            for i in 0..20 {
                frame.add(i).write(0);
            }

            frame.add(0).write(arg as usize); // x19
            frame.add(1).write(entry as *const () as usize); // x20
            frame.add(11).write(spindle_context_trampoline as *const () as usize); // x30

            frame as *mut u8
        }
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("spindle supports x86_64 and aarch64 only");
