//! Method B: classic flash rewrite.
//!
//! Erase + program the replacement, call it, erase + program the sentinel
//! back. Two page erases per trial. Once programmed the slot is an ordinary
//! instruction, so the hit loop must not fault at all; the dispatcher is only
//! consulted for its fault count.

use crate::clock::{CycleSource, Stopwatch};
use crate::error::{Phase, TrialError};
use crate::rig::{Rig, SlotInvoker};
use crate::slot::NonVolatileController;

/// Programs `hw` into the slot, calls it `n` times and programs the sentinel
/// back. Returns the cycles spent from the first erase to the end of the
/// restore.
///
/// A failed erase/program aborts immediately; recovering the slot is the
/// caller's job.
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
    rig.dispatcher.disable();
    rig.probe(page, Phase::Before)?;

    let watch = Stopwatch::start(&rig.clock);
    rig.slots.erase_and_program(page, hw)?;

    let faults = rig.hit(page, n);

    rig.program_sentinel(page)?;
    let cycles = watch.elapsed(&rig.clock);

    if faults != 0 {
        return Err(TrialError::FaultCount {
            expected: 0,
            observed: faults,
        });
    }

    log::trace!("B hw={:#06x} n={} cycles={}", hw, n, cycles);
    Ok(cycles)
}
