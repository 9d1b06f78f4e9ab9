//! Everything a trial touches, bundled.

use crate::clock::CycleSource;
use crate::dispatch::{FaultDispatcher, FaultStatus};
use crate::error::{NvmError, Phase, TrialError};
use crate::slot::{NonVolatileController, SlotStore};

/// Calls the slot as a Thumb function.
///
/// A call may fault internally; it always returns to the caller before the
/// next statement runs.
pub trait SlotInvoker {
    fn invoke(&mut self, slot_addr: u32);
}

impl<X: SlotInvoker + ?Sized> SlotInvoker for &mut X {
    fn invoke(&mut self, slot_addr: u32) {
        (**self).invoke(slot_addr)
    }
}

pub struct Rig<'d, N, C, X> {
    pub slots: SlotStore<N>,
    pub clock: C,
    pub cpu: X,
    pub dispatcher: &'d FaultDispatcher,
    /// Undefined instruction the slot holds between trials.
    pub sentinel: u16,
}

impl<'d, N, C, X> Rig<'d, N, C, X>
where
    N: NonVolatileController,
    C: CycleSource,
    X: SlotInvoker,
{
    pub fn new(
        slots: SlotStore<N>,
        clock: C,
        cpu: X,
        dispatcher: &'d FaultDispatcher,
        sentinel: u16,
    ) -> Self {
        Self {
            slots,
            clock,
            cpu,
            dispatcher,
            sentinel,
        }
    }

    /// With redirection off, one call must fault exactly once and be resolved
    /// as `InvalidFault`. This is what proves the slot holds the sentinel and
    /// the dispatcher is bound to it.
    pub fn probe(&mut self, page: u32, phase: Phase) -> Result<(), TrialError> {
        self.dispatcher.disable();
        self.dispatcher.reset_status();
        let before = self.dispatcher.fault_count();

        self.cpu.invoke(page);

        let faults = self.dispatcher.fault_count().wrapping_sub(before);
        let status = self.dispatcher.status();
        if faults != 1 || status != FaultStatus::InvalidFault {
            return Err(TrialError::Probe {
                phase,
                status,
                faults,
            });
        }
        Ok(())
    }

    /// Calls the slot `n` times and returns the number of faults raised.
    #[inline(never)]
    pub fn hit(&mut self, page: u32, n: u32) -> u32 {
        let before = self.dispatcher.fault_count();
        for _ in 0..n {
            self.dispatcher.reset_status();
            self.cpu.invoke(page);
        }
        self.dispatcher.fault_count().wrapping_sub(before)
    }

    pub fn program_sentinel(&mut self, page: u32) -> Result<(), NvmError> {
        self.slots.erase_and_program(page, self.sentinel)
    }

    /// Redirection off, status cleared, slot at the sentinel. Only touches
    /// flash when the slot word differs.
    pub fn ensure_start_state(&mut self, page: u32) -> Result<(), NvmError> {
        self.dispatcher.disarm();
        self.dispatcher.reset_status();
        if self.slots.is_programmed_with(page, self.sentinel) {
            return Ok(());
        }
        log::debug!("slot at {:#010x} not at sentinel, reprogramming", page);
        self.program_sentinel(page)
    }

    /// Best effort after a failed trial.
    pub fn recover(&mut self, page: u32) {
        if let Err(e) = self.program_sentinel(page) {
            log::error!("recovery of slot {:#010x} failed: {}", page, e);
        }
        self.dispatcher.disarm();
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Phase;
    use crate::sim::SimBoard;
    use crate::thumb::UDF_SENTINEL;
    use crate::FaultStatus;

    #[test]
    fn probe_is_deterministic() {
        let board = SimBoard::new(1024, 8);
        let page = board.bench_page();
        let mut rig = board.rig(UDF_SENTINEL);
        rig.program_sentinel(page).unwrap();

        for _ in 0..5 {
            let before = rig.dispatcher.fault_count();
            rig.probe(page, Phase::Before).unwrap();
            assert_eq!(rig.dispatcher.fault_count() - before, 1);
            assert_eq!(rig.dispatcher.status(), FaultStatus::InvalidFault);
        }
    }

    #[test]
    fn probe_fails_on_executable_slot() {
        let board = SimBoard::new(1024, 8);
        let page = board.bench_page();
        let mut rig = board.rig(UDF_SENTINEL);
        rig.slots.erase_and_program(page, 0x0000).unwrap();

        let err = rig.probe(page, Phase::After).unwrap_err();
        assert_eq!(
            err,
            crate::TrialError::Probe {
                phase: Phase::After,
                status: FaultStatus::None,
                faults: 0
            }
        );
    }

    #[test]
    fn start_state_skips_flash_when_already_sentinel() {
        let board = SimBoard::new(1024, 8);
        let page = board.bench_page();
        let mut rig = board.rig(UDF_SENTINEL);

        rig.ensure_start_state(page).unwrap();
        assert_eq!(board.erase_count(), 1);
        rig.ensure_start_state(page).unwrap();
        assert_eq!(board.erase_count(), 1);
        assert!(!rig.dispatcher.is_enabled());
    }
}
