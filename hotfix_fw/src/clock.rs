//! Cycle clock.
//!
//! The DWT `CYCCNT` register is a free-running 32-bit counter, so every
//! interval is computed with wrapping subtraction. A single interval must stay
//! below 2^32 cycles (about 67 s at 64 MHz); sweep-wide totals are accumulated
//! in `u64` by the caller.

/// A free-running cycle counter.
pub trait CycleSource {
    fn now(&self) -> u32;

    /// Counter frequency, `0` if unknown.
    fn frequency_hz(&self) -> u32;
}

impl<C: CycleSource + ?Sized> CycleSource for &C {
    fn now(&self) -> u32 {
        (**self).now()
    }

    fn frequency_hz(&self) -> u32 {
        (**self).frequency_hz()
    }
}

/// Converts a cycle count to microseconds, truncating. Returns `0` when the
/// frequency is unknown.
pub fn cycles_to_us(cycles: u64, hz: u32) -> u64 {
    if hz == 0 {
        return 0;
    }
    ((cycles as u128 * 1_000_000) / hz as u128) as u64
}

/// A started interval.
#[derive(Copy, Clone, Debug)]
pub struct Stopwatch {
    start: u32,
}

impl Stopwatch {
    pub fn start(clock: &impl CycleSource) -> Self {
        Self { start: clock.now() }
    }

    /// Cycles elapsed since [`Stopwatch::start`].
    pub fn elapsed(&self, clock: &impl CycleSource) -> u32 {
        clock.now().wrapping_sub(self.start)
    }
}
