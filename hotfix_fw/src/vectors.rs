//! Vector table relocation.
//!
//! The table in flash is copied into an aligned RAM array, the HardFault and
//! UsageFault entries are pointed at the dispatcher trampoline, and VTOR is
//! switched to the copy. The copy is never modified afterwards.

use crate::thumb;

/// Architectural exception vectors, including the initial stack pointer.
pub const CORE_VECTORS: usize = 16;

/// Peripheral interrupt vectors of the nRF52840.
pub const PERIPHERAL_VECTORS: usize = 48;

pub const VECTOR_COUNT: usize = CORE_VECTORS + PERIPHERAL_VECTORS;

pub const HARD_FAULT: usize = 3;
pub const USAGE_FAULT: usize = 6;

/// Copies `active` into `relocated` and routes both fault vectors to
/// `handler`, forcing the Thumb bit.
pub fn relocate(active: &[u32], relocated: &mut [u32], handler: u32) {
    relocated.copy_from_slice(active);
    relocated[HARD_FAULT] = thumb::thumb_entry(handler);
    relocated[USAGE_FAULT] = thumb::thumb_entry(handler);
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::target::{install, DISPATCHER};

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod target {
    use core::ptr::{addr_of, addr_of_mut};

    use cortex_m::peripheral::SCB;

    use super::{relocate, VECTOR_COUNT};
    use crate::arch;
    use crate::dispatch::{ExceptionFrame, FaultDispatcher};

    /// The one dispatcher the fault vectors reach.
    pub static DISPATCHER: FaultDispatcher = FaultDispatcher::new();

    /// VTOR needs the table aligned to its size rounded up to a power of two.
    #[repr(C, align(256))]
    struct VectorTable([u32; VECTOR_COUNT]);

    static mut RELOCATED: VectorTable = VectorTable([0; VECTOR_COUNT]);

    const SHCSR_USGFAULTENA: u32 = 1 << 18;

    extern "C" {
        /// Provided by `cortex-m-rt`'s `link.x`.
        static __vector_table: u32;
        fn hotfix_fault_entry();
    }

    // Picks the stack the frame was pushed to (EXC_RETURN bit 2) and tail
    // calls the dispatcher, so the return through EXC_RETURN is the
    // exception return.
    core::arch::global_asm!(
        ".section .text.hotfix_fault_entry,\"ax\",%progbits",
        ".global hotfix_fault_entry",
        ".type hotfix_fault_entry,%function",
        ".thumb_func",
        "hotfix_fault_entry:",
        "    tst lr, #4",
        "    ite eq",
        "    mrseq r0, msp",
        "    mrsne r0, psp",
        "    b hotfix_fault_dispatch",
        ".size hotfix_fault_entry, . - hotfix_fault_entry",
    );

    #[no_mangle]
    unsafe extern "C" fn hotfix_fault_dispatch(frame: *mut ExceptionFrame) {
        DISPATCHER.on_fault(&mut *frame);
        clear_fault_status();
    }

    /// CFSR and HFSR are write-one-to-clear.
    fn clear_fault_status() {
        // SAFETY: only sticky status bits are written back.
        unsafe {
            let scb = &*SCB::PTR;
            scb.cfsr.write(scb.cfsr.read());
            scb.hfsr.write(scb.hfsr.read());
        }
        arch::code_barrier();
    }

    /// Binds [`DISPATCHER`] to `slot_addr` and activates the relocated table.
    ///
    /// # Safety
    ///
    /// Call once, from thread mode, before any slot call. The active vector
    /// table must hold at least `VECTOR_COUNT` entries.
    pub unsafe fn install(slot_addr: u32) {
        DISPATCHER.bind(slot_addr);

        let scb = &*SCB::PTR;
        let vtor = scb.vtor.read();
        let active: *const u32 = if vtor == 0 {
            addr_of!(__vector_table)
        } else {
            vtor as *const u32
        };
        let active = core::slice::from_raw_parts(active, VECTOR_COUNT);
        let table = &mut *addr_of_mut!(RELOCATED);
        relocate(active, &mut table.0, hotfix_fault_entry as usize as u32);

        arch::code_barrier();
        scb.vtor.write(table.0.as_ptr() as u32);
        arch::code_barrier();

        // UDF escalates to HardFault unless UsageFault is enabled.
        scb.shcsr.modify(|r| r | SHCSR_USGFAULTENA);
        arch::code_barrier();

        log::info!(
            "vector table relocated from {:#010x} to {:#010x}",
            vtor,
            table.0.as_ptr() as u32
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fault_vectors_change() {
        let active: Vec<u32> = (0..VECTOR_COUNT as u32).map(|i| 0x100 + i * 4 + 1).collect();
        let mut relocated = [0u32; VECTOR_COUNT];

        relocate(&active, &mut relocated, 0x2000_0100);

        for (i, (&old, &new)) in active.iter().zip(&relocated).enumerate() {
            match i {
                HARD_FAULT | USAGE_FAULT => assert_eq!(new, 0x2000_0101),
                _ => assert_eq!(new, old, "vector {i}"),
            }
        }
    }

    #[test]
    fn table_covers_nrf52840_interrupts() {
        assert_eq!(VECTOR_COUNT, 64);
        assert_eq!((VECTOR_COUNT * 4).next_power_of_two(), 256);
    }
}
