//! Fault dispatcher and RAM thunk.
//!
//! The dispatcher is the only code that runs on HardFault/UsageFault once the
//! relocated vector table is active. It decides, from the stacked program
//! counter alone, where the interrupted code resumes:
//!
//! | faulting pc        | redirection | status         | resumes at          |
//! |--------------------|-------------|----------------|---------------------|
//! | slot or slot + 2   | enabled     | `PatchOk`      | RAM thunk           |
//! | slot or slot + 2   | disabled    | `InvalidFault` | slot + 2 (`bx lr`)  |
//! | anything else      | either      | `InvalidFault` | stacked lr          |
//!
//! Faults are synchronous to the instruction stream and nest on the context
//! that called the slot, so the caller observes `status()` and
//! `fault_count()` strictly after the handler has returned. Plain atomics are
//! enough; nothing here is shared with a second execution context.
//!
//! On the target exactly one dispatcher exists, `vectors::DISPATCHER`, since
//! the exception entry has no way to receive a context pointer. The type is
//! still instantiable so the simulator and tests can own private copies.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::arch;
use crate::thumb::{self, BX_LR, MOVS_R0_R0};

/// How the most recent fault was resolved.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultStatus {
    #[default]
    None = 0,
    /// The slot faulted with redirection off, or an unrelated fault was
    /// bounced back to its caller.
    InvalidFault = 1,
    /// The slot faulted and was redirected into the thunk.
    PatchOk = 2,
}

impl FaultStatus {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::InvalidFault,
            2 => Self::PatchOk,
            _ => Self::None,
        }
    }
}

/// Registers stacked by the processor on exception entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Where [`FaultDispatcher::on_fault`] sent the interrupted code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Thunk,
    SkipSlot,
    ReturnToCaller,
}

/// Two executable halfwords in RAM: `[replacement][bx lr]`.
///
/// The trailer is written together with every replacement so it always reads
/// `bx lr`.
#[repr(C, align(4))]
pub struct RamThunk {
    code: UnsafeCell<[u16; 2]>,
}

// SAFETY: the buffer is written only through `RamThunk::write`, which callers
// invoke while redirection is disabled, so the fault handler never executes a
// half-written thunk. There is no second core.
unsafe impl Sync for RamThunk {}

impl RamThunk {
    pub const fn new() -> Self {
        Self {
            code: UnsafeCell::new([MOVS_R0_R0, BX_LR]),
        }
    }

    /// Base address as seen by the processor.
    pub fn addr(&self) -> u32 {
        self.code.get() as usize as u32
    }

    /// Replaces the thunk body and makes it visible to instruction fetch.
    ///
    /// # Safety
    ///
    /// Redirection must be disabled: nothing may execute the thunk while it
    /// is rewritten.
    pub unsafe fn write(&self, hw: u16) {
        let code = self.code.get().cast::<u16>();
        // SAFETY: `code` points at two aligned, owned halfwords; the caller
        // guarantees no concurrent execution.
        unsafe {
            code.write_volatile(hw);
            code.add(1).write_volatile(BX_LR);
        }
        arch::code_barrier();
    }

    pub fn read(&self) -> [u16; 2] {
        let code = self.code.get().cast::<u16>();
        // SAFETY: aligned and always initialised.
        unsafe { [code.read_volatile(), code.add(1).read_volatile()] }
    }
}

impl Default for RamThunk {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot address `0` means "not bound"; page 0 holds the vector table and is
/// never a bench page.
const UNBOUND: u32 = 0;

pub struct FaultDispatcher {
    patch_enabled: AtomicBool,
    last_status: AtomicU8,
    fault_count: AtomicU32,
    slot: AtomicU32,
    unexpected_count: AtomicU32,
    last_unexpected_pc: AtomicU32,
    thunk: RamThunk,
}

impl FaultDispatcher {
    pub const fn new() -> Self {
        Self {
            patch_enabled: AtomicBool::new(false),
            last_status: AtomicU8::new(FaultStatus::None as u8),
            fault_count: AtomicU32::new(0),
            slot: AtomicU32::new(UNBOUND),
            unexpected_count: AtomicU32::new(0),
            last_unexpected_pc: AtomicU32::new(0),
            thunk: RamThunk::new(),
        }
    }

    /// Resets all state and binds the dispatcher to the slot at `slot_addr`.
    pub fn bind(&self, slot_addr: u32) {
        self.patch_enabled.store(false, Ordering::Release);
        self.last_status.store(FaultStatus::None as u8, Ordering::Release);
        self.fault_count.store(0, Ordering::Release);
        self.unexpected_count.store(0, Ordering::Release);
        self.last_unexpected_pc.store(0, Ordering::Release);
        self.slot.store(slot_addr, Ordering::Release);
        // SAFETY: redirection was disabled above.
        unsafe { self.thunk.write(MOVS_R0_R0) };
        log::info!("fault dispatcher bound to slot {:#010x}", slot_addr);
    }

    pub fn enable(&self) {
        self.patch_enabled.store(true, Ordering::Release);
        arch::code_barrier();
    }

    pub fn disable(&self) {
        self.patch_enabled.store(false, Ordering::Release);
        arch::code_barrier();
    }

    pub fn reset_status(&self) {
        self.last_status.store(FaultStatus::None as u8, Ordering::Release);
    }

    /// Loads `hw` into the thunk and turns redirection on.
    pub fn arm(&self, hw: u16) {
        self.disable();
        // SAFETY: redirection is disabled.
        unsafe { self.thunk.write(hw) };
        self.enable();
    }

    /// Turns redirection off and parks the thunk on `movs r0, r0`.
    pub fn disarm(&self) {
        self.disable();
        // SAFETY: redirection is disabled.
        unsafe { self.thunk.write(MOVS_R0_R0) };
    }

    pub fn is_enabled(&self) -> bool {
        self.patch_enabled.load(Ordering::Acquire)
    }

    pub fn status(&self) -> FaultStatus {
        FaultStatus::from_u8(self.last_status.load(Ordering::Acquire))
    }

    pub fn fault_count(&self) -> u32 {
        self.fault_count.load(Ordering::Acquire)
    }

    pub fn bound_slot(&self) -> Option<u32> {
        match self.slot.load(Ordering::Acquire) {
            UNBOUND => None,
            slot => Some(slot),
        }
    }

    /// Faults that matched neither slot address.
    pub fn unexpected_count(&self) -> u32 {
        self.unexpected_count.load(Ordering::Acquire)
    }

    pub fn last_unexpected_pc(&self) -> u32 {
        self.last_unexpected_pc.load(Ordering::Acquire)
    }

    pub fn thunk(&self) -> &RamThunk {
        &self.thunk
    }

    /// Branch target of the thunk, Thumb bit set.
    pub fn thunk_entry(&self) -> u32 {
        thumb::thumb_entry(self.thunk.addr())
    }

    /// Fault entry point: decodes the stacked pc and rewrites it.
    ///
    /// Called from the exception trampoline with interrupts implicitly
    /// prioritised below the fault. Clearing the sticky fault status
    /// registers is left to the caller since it is architecture specific.
    pub fn on_fault(&self, frame: &mut ExceptionFrame) -> Resolution {
        self.fault_count.fetch_add(1, Ordering::AcqRel);

        let faulting_pc = thumb::strip_thumb(frame.pc);
        let slot = self.slot.load(Ordering::Acquire);

        if slot != UNBOUND && (faulting_pc == slot || faulting_pc == slot.wrapping_add(2)) {
            if self.patch_enabled.load(Ordering::Acquire) {
                self.set_status(FaultStatus::PatchOk);
                frame.pc = self.thunk_entry();
                return Resolution::Thunk;
            }
            self.set_status(FaultStatus::InvalidFault);
            // Skip the undefined halfword; the trailing `bx lr` returns.
            frame.pc = thumb::thumb_entry(slot.wrapping_add(2));
            return Resolution::SkipSlot;
        }

        // Unrelated fault. Redirection state is left as is.
        self.unexpected_count.fetch_add(1, Ordering::AcqRel);
        self.last_unexpected_pc.store(faulting_pc, Ordering::Release);
        self.set_status(FaultStatus::InvalidFault);
        frame.pc = thumb::thumb_entry(frame.lr);
        Resolution::ReturnToCaller
    }

    fn set_status(&self, status: FaultStatus) {
        self.last_status.store(status as u8, Ordering::Release);
    }
}

impl Default for FaultDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOT: u32 = 0x000F_F000;
    const CALLER: u32 = 0x0000_2345;

    fn frame_at(pc: u32) -> ExceptionFrame {
        ExceptionFrame {
            lr: CALLER,
            pc,
            ..Default::default()
        }
    }

    #[test]
    fn bind_resets_state() {
        let d = FaultDispatcher::new();
        d.arm(0x1C00);
        d.on_fault(&mut frame_at(SLOT));
        d.bind(SLOT);

        assert!(!d.is_enabled());
        assert_eq!(d.status(), FaultStatus::None);
        assert_eq!(d.fault_count(), 0);
        assert_eq!(d.bound_slot(), Some(SLOT));
        assert_eq!(d.thunk().read(), [MOVS_R0_R0, BX_LR]);
    }

    #[test]
    fn disabled_slot_fault_skips_to_bx_lr() {
        let d = FaultDispatcher::new();
        d.bind(SLOT);
        let mut frame = frame_at(SLOT);

        assert_eq!(d.on_fault(&mut frame), Resolution::SkipSlot);
        assert_eq!(frame.pc, SLOT + 2 + 1);
        assert_eq!(frame.lr, CALLER);
        assert_eq!(d.status(), FaultStatus::InvalidFault);
        assert_eq!(d.fault_count(), 1);
        assert_eq!(d.unexpected_count(), 0);
    }

    #[test]
    fn enabled_slot_fault_enters_thunk() {
        let d = FaultDispatcher::new();
        d.bind(SLOT);
        d.arm(0x4040);
        let mut frame = frame_at(SLOT);

        assert_eq!(d.on_fault(&mut frame), Resolution::Thunk);
        assert_eq!(frame.pc, d.thunk_entry());
        assert_eq!(frame.pc & 1, 1);
        assert_eq!(d.status(), FaultStatus::PatchOk);
        assert_eq!(d.thunk().read(), [0x4040, BX_LR]);
    }

    #[test]
    fn upper_halfword_is_recognised_as_slot() {
        let d = FaultDispatcher::new();
        d.bind(SLOT);
        let mut frame = frame_at(SLOT + 2);

        assert_eq!(d.on_fault(&mut frame), Resolution::SkipSlot);
        d.enable();
        let mut frame = frame_at(SLOT + 2);
        assert_eq!(d.on_fault(&mut frame), Resolution::Thunk);
    }

    #[test]
    fn thumb_bit_in_stacked_pc_is_ignored() {
        let d = FaultDispatcher::new();
        d.bind(SLOT);
        let mut frame = frame_at(SLOT | 1);
        assert_eq!(d.on_fault(&mut frame), Resolution::SkipSlot);
    }

    #[test]
    fn unrelated_fault_returns_to_caller() {
        let d = FaultDispatcher::new();
        d.bind(SLOT);
        d.enable();
        let mut frame = frame_at(0x0000_1000);

        assert_eq!(d.on_fault(&mut frame), Resolution::ReturnToCaller);
        assert_eq!(frame.pc, CALLER | 1);
        assert_eq!(d.status(), FaultStatus::InvalidFault);
        assert_eq!(d.fault_count(), 1);
        assert_eq!(d.unexpected_count(), 1);
        assert_eq!(d.last_unexpected_pc(), 0x0000_1000);
        // Left enabled.
        assert!(d.is_enabled());
    }

    #[test]
    fn unbound_dispatcher_treats_everything_as_unexpected() {
        let d = FaultDispatcher::new();
        let mut frame = frame_at(0);
        assert_eq!(d.on_fault(&mut frame), Resolution::ReturnToCaller);
        assert_eq!(d.bound_slot(), None);
    }

    #[test]
    fn disarm_parks_thunk() {
        let d = FaultDispatcher::new();
        d.bind(SLOT);
        d.arm(0x1C00);
        assert!(d.is_enabled());
        d.disarm();
        assert!(!d.is_enabled());
        assert_eq!(d.thunk().read(), [MOVS_R0_R0, BX_LR]);
    }

    #[test]
    fn thunk_is_word_aligned() {
        let d = FaultDispatcher::new();
        assert_eq!(d.thunk().addr() % 4, 0);
    }
}
