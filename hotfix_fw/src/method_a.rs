//! Method A: reversible, exception-driven hotfix.
//!
//! Flash is never touched. The slot keeps its undefined instruction, every
//! call faults, and the dispatcher sends the fault into the RAM thunk which
//! runs the replacement and returns straight to the caller. Applying and
//! removing the fix are two RAM writes.
//!
//! The fault is the only point where this method gains control, so each trial
//! checks that every single call faulted rather than assuming it.

use crate::clock::{CycleSource, Stopwatch};
use crate::dispatch::FaultStatus;
use crate::error::{Phase, TrialError};
use crate::rig::{Rig, SlotInvoker};
use crate::slot::NonVolatileController;

/// Applies `hw` through the thunk, calls the slot `n` times and restores.
/// Returns the cycles spent from apply to restore.
pub fn measure<N, C, X>(
    rig: &mut Rig<'_, N, C, X>,
    page: u32,
    hw: u16,
    n: u32,
) -> Result<u32, TrialError>
where
    N: NonVolatileController,
    C: CycleSource,
    X: SlotInvoker,
{
    rig.probe(page, Phase::Before)?;

    let watch = Stopwatch::start(&rig.clock);
    rig.dispatcher.arm(hw);

    let faults = rig.hit(page, n);
    let status = rig.dispatcher.status();

    rig.dispatcher.disarm();
    let cycles = watch.elapsed(&rig.clock);

    if faults != n {
        return Err(TrialError::FaultCount {
            expected: n,
            observed: faults,
        });
    }
    if n > 0 && status != FaultStatus::PatchOk {
        return Err(TrialError::Status(status));
    }
    rig.probe(page, Phase::After)?;

    log::trace!("A hw={:#06x} n={} cycles={}", hw, n, cycles);
    Ok(cycles)
}
