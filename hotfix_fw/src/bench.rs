//! Benchmark harness.
//!
//! For every candidate halfword that can be reached from the sentinel by
//! clearing bits (the only edit a flash cell allows without an erase) and that
//! is safe to execute, runs method A then method B for each repeat count of
//! the sweep and prints one row per successful pair.
//!
//! A failing trial never stops the sweep: the slot is forced back to the
//! sentinel, redirection is disabled, and the next row starts from a clean
//! state. Only failing to reach the sentinel before the first trial is fatal.

use core::fmt;

use crate::clock::CycleSource;
use crate::config::{BenchConfig, SafetyFilter};
use crate::error::BenchError;
use crate::report::{self, Row};
use crate::rig::{Rig, SlotInvoker};
use crate::slot::NonVolatileController;
use crate::{method_a, method_b};

/// A halfword reachable from the sentinel by clearing bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Candidate {
    Safe(u16),
    /// Reachable, but could branch, touch memory or otherwise disturb the
    /// harness if executed.
    Skipped(u16),
}

/// `hw` only has bits that are also set in `sentinel`, and differs from it.
pub const fn is_bit_clear_reachable(hw: u16, sentinel: u16) -> bool {
    hw & !sentinel == 0 && hw != sentinel
}

/// All reachable candidates in ascending order.
pub struct Candidates {
    next: u32,
    sentinel: u16,
    filter: SafetyFilter,
}

impl Candidates {
    pub fn new(sentinel: u16, filter: SafetyFilter) -> Self {
        Self {
            next: 0,
            sentinel,
            filter,
        }
    }
}

impl Iterator for Candidates {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        while self.next <= u16::MAX as u32 {
            let hw = self.next as u16;
            self.next += 1;
            if !is_bit_clear_reachable(hw, self.sentinel) {
                continue;
            }
            return Some(if self.filter.is_exec_safe(hw) {
                Candidate::Safe(hw)
            } else {
                Candidate::Skipped(hw)
            });
        }
        None
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TrialResult {
    pub candidate_value: u16,
    pub repeat_count: u32,
    pub method_a_cycles: u32,
    pub method_b_cycles: u32,
    pub ok: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub ok_rows: u32,
    pub fail_rows: u32,
    pub safe_candidates: u32,
    pub skipped: u32,
    /// Sum over successful rows.
    pub total_a_cycles: u64,
    pub total_b_cycles: u64,
    pub unexpected_faults: u32,
    pub last_unexpected_pc: u32,
}

impl Summary {
    fn record(&mut self, result: &TrialResult) {
        if result.ok {
            self.ok_rows += 1;
            self.total_a_cycles += result.method_a_cycles as u64;
            self.total_b_cycles += result.method_b_cycles as u64;
        } else {
            self.fail_rows += 1;
        }
    }
}

/// Runs the full sweep, writing rows and the summary to `out`.
pub fn run<N, C, X, W>(
    rig: &mut Rig<'_, N, C, X>,
    cfg: &BenchConfig,
    page: u32,
    out: &mut W,
) -> Result<Summary, BenchError>
where
    N: NonVolatileController,
    C: CycleSource,
    X: SlotInvoker,
    W: fmt::Write,
{
    run_with(rig, cfg, page, out, |_| {})
}

/// [`run`], additionally handing every trial (failed ones included) to
/// `on_trial`.
pub fn run_with<N, C, X, W>(
    rig: &mut Rig<'_, N, C, X>,
    cfg: &BenchConfig,
    page: u32,
    out: &mut W,
    mut on_trial: impl FnMut(&TrialResult),
) -> Result<Summary, BenchError>
where
    N: NonVolatileController,
    C: CycleSource,
    X: SlotInvoker,
    W: fmt::Write,
{
    report::write_banner(out, page, cfg.sentinel)?;

    if let Err(e) = rig.ensure_start_state(page) {
        log::error!("initialisation failed: {}", e);
        write!(out, "ERR: cannot init slot to sentinel ({})\r\n", e)?;
        return Err(BenchError::Init(e));
    }

    let unexpected_before = rig.dispatcher.unexpected_count();
    let mut summary = Summary::default();

    for candidate in Candidates::new(cfg.sentinel, cfg.filter) {
        let hw = match candidate {
            Candidate::Safe(hw) => hw,
            Candidate::Skipped(_) => {
                summary.skipped += 1;
                continue;
            }
        };
        summary.safe_candidates += 1;

        for &n in cfg.loop_counts {
            let result = run_trial(rig, page, hw, n);
            summary.record(&result);
            on_trial(&result);
            if result.ok {
                write!(out, "{}\r\n", Row(&result))?;
            }
        }
    }

    summary.unexpected_faults = rig
        .dispatcher
        .unexpected_count()
        .wrapping_sub(unexpected_before);
    if summary.unexpected_faults > 0 {
        summary.last_unexpected_pc = rig.dispatcher.last_unexpected_pc();
        log::error!(
            "{} fault(s) outside the slot, last at {:#010x}",
            summary.unexpected_faults,
            summary.last_unexpected_pc
        );
    }

    report::write_summary(out, &summary, rig.clock.frequency_hz())?;
    Ok(summary)
}

/// One row: start state, method A, method B. Recovers the slot on failure.
pub fn run_trial<N, C, X>(rig: &mut Rig<'_, N, C, X>, page: u32, hw: u16, n: u32) -> TrialResult
where
    N: NonVolatileController,
    C: CycleSource,
    X: SlotInvoker,
{
    let mut result = TrialResult {
        candidate_value: hw,
        repeat_count: n,
        ..Default::default()
    };

    if let Err(e) = rig.ensure_start_state(page) {
        log::warn!("hw={:#06x} N={}: start state: {}", hw, n, e);
        rig.recover(page);
        return result;
    }

    let a = method_a::measure(rig, page, hw, n);
    let b = method_b::measure(rig, page, hw, n);

    match (a, b) {
        (Ok(a), Ok(b)) => {
            result.method_a_cycles = a;
            result.method_b_cycles = b;
            result.ok = true;
        }
        (a, b) => {
            if let Err(e) = a {
                log::warn!("hw={:#06x} N={}: method A: {}", hw, n, e);
            }
            if let Err(e) = b {
                log::warn!("hw={:#06x} N={}: method B: {}", hw, n, e);
            }
            rig.recover(page);
        }
    }
    result
}
