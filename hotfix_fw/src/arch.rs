//! Barriers and critical sections.
//!
//! On the target these map onto `cortex-m`; elsewhere they degrade to a fence
//! and a plain call so the simulator can share the same code paths.

/// DSB + ISB: prior writes (including to code) are visible before the next
/// instruction fetch.
#[inline(always)]
pub(crate) fn code_barrier() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Runs `f` with interrupts masked.
#[inline(always)]
pub(crate) fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        cortex_m::interrupt::free(|_| f())
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        f()
    }
}
