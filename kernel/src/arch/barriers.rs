//! Architecture-independent memory barrier abstractions.
//!
//! Centralizes memory barrier/fence operations so that driver code does not
//! need scattered `#[cfg(target_arch)]` blocks with inline assembly.
//!
//! [`data_sync_barrier`] is the barrier the interrupt controller and timer
//! issue around posted register writes and counter reads.

/// Data synchronization barrier.
///
/// Completes every outstanding memory access, including posted device
/// writes, before the next instruction executes. The simulated interrupt
/// controller tracks acknowledgment through posted writes, so mask/unmask
/// writes are preceded by this barrier and status reads are followed by it.
///
/// * **AArch64**: `dsb sy`.
/// * **ARM**: `dsb` (ARMv7).
/// * **Others** (including hosted simulation): `fence(SeqCst)`.
#[inline(always)]
pub fn data_sync_barrier() {
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `dsb sy` waits for outstanding memory accesses to
        // complete. No side effects beyond ordering.
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, preserves_flags));
        }
    }

    #[cfg(target_arch = "arm")]
    {
        // SAFETY: `dsb` waits for outstanding memory accesses to complete.
        // No side effects beyond ordering.
        unsafe {
            core::arch::asm!("dsb", options(nostack, preserves_flags));
        }
    }

    #[cfg(not(any(target_arch = "aarch64", target_arch = "arm")))]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}
